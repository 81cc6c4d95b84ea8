//! Pool configuration.

use std::time::Duration;

use crate::estimate::TimeUnit;

/// Tunable scheduling parameters.
///
/// Fixed-interval polling is a deliberate latency/simplicity tradeoff; both
/// intervals are explicit knobs rather than constants.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sleep between empty-queue polls in the worker loop.
    pub idle_backoff: Duration,
    /// Manager monitoring tick (drain + progress re-render).
    pub monitor_interval: Duration,
    /// Unit used when reporting elapsed times.
    pub time_unit: TimeUnit,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(25),
            monitor_interval: Duration::from_millis(100),
            time_unit: TimeUnit::Millis,
        }
    }
}
