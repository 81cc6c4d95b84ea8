//! Running per-category duration statistics.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::Category;

/// Unit used when reporting elapsed times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
}

impl TimeUnit {
    /// Convert a duration to this unit.
    pub fn convert(&self, duration: Duration) -> f64 {
        match self {
            Self::Seconds => duration.as_secs_f64(),
            Self::Millis => duration.as_secs_f64() * 1_000.0,
            Self::Micros => duration.as_secs_f64() * 1_000_000.0,
        }
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        Self::Millis
    }
}

/// Running mean of completed-trial durations for one category.
///
/// Total and count only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeEstimate {
    total: Duration,
    count: u32,
}

impl TimeEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed-trial duration into the estimate.
    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.count += 1;
    }

    /// Mean duration, `None` until at least one sample lands.
    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        Some(self.total / self.count)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Combine two estimates (e.g. when merging pools).
    pub fn merge(self, other: TimeEstimate) -> TimeEstimate {
        TimeEstimate {
            total: self.total + other.total,
            count: self.count + other.count,
        }
    }
}

/// Book of estimates keyed by category. Owned and mutated only by the
/// Manager while draining done tasks.
#[derive(Debug, Default)]
pub struct EstimateBook {
    by_category: HashMap<Category, TimeEstimate>,
}

impl EstimateBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: &Category, elapsed: Duration) {
        self.by_category
            .entry(category.clone())
            .or_default()
            .record(elapsed);
    }

    pub fn get(&self, category: &Category) -> Option<&TimeEstimate> {
        self.by_category.get(category)
    }

    /// Mean for one category, `None` without samples.
    pub fn category_mean(&self, category: &Category) -> Option<Duration> {
        self.by_category.get(category)?.mean()
    }

    /// Mean across all category means, `None` when no category has samples.
    pub fn global_mean(&self) -> Option<Duration> {
        let means: Vec<Duration> = self
            .by_category
            .values()
            .filter_map(TimeEstimate::mean)
            .collect();
        if means.is_empty() {
            return None;
        }
        let total: Duration = means.iter().sum();
        Some(total / means.len() as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_category.len()
    }
}
