//! Worker identity and status reporting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Monotonic worker id, fresh per pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Lifecycle status of a worker.
///
/// Always reflects the worker's last queue interaction: `Active` after a
/// successful claim, `Idle` after an empty poll, `Ended` after a
/// cooperative exit. `Terminated` is written by the Manager on a forced
/// kill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Started,
    Active,
    Idle,
    Ended,
    Terminated,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Ended => "ended",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Aggregate worker counts for the progress line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: usize,
    pub idle: usize,
    pub ended: usize,
}

impl StatusCounts {
    /// Render as `"N active, M idle, K ended"`, omitting empty groups.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.active > 0 {
            parts.push(format!("{} active", self.active));
        }
        if self.idle > 0 {
            parts.push(format!("{} idle", self.idle));
        }
        if self.ended > 0 {
            parts.push(format!("{} ended", self.ended));
        }
        parts.join(", ")
    }
}

/// Shared board of worker statuses, written by the workers themselves and
/// by the Manager on terminate.
#[derive(Default)]
pub struct StatusBoard {
    inner: RwLock<BTreeMap<WorkerId, WorkerStatus>>,
}

impl StatusBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set(&self, id: WorkerId, status: WorkerStatus) {
        self.inner.write().await.insert(id, status);
    }

    /// Set `status` unless the worker already self-reported `Ended`.
    /// Returns the status that ends up on the board.
    pub async fn set_unless_ended(&self, id: WorkerId, status: WorkerStatus) -> WorkerStatus {
        let mut inner = self.inner.write().await;
        match inner.get(&id) {
            Some(WorkerStatus::Ended) => WorkerStatus::Ended,
            _ => {
                inner.insert(id, status);
                status
            }
        }
    }

    pub async fn get(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.inner.read().await.get(&id).copied()
    }

    pub async fn snapshot(&self) -> BTreeMap<WorkerId, WorkerStatus> {
        self.inner.read().await.clone()
    }

    /// Bucketed counts: started|active → active, idle → idle,
    /// ended|terminated → ended.
    pub async fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for status in self.inner.read().await.values() {
            match status {
                WorkerStatus::Started | WorkerStatus::Active => counts.active += 1,
                WorkerStatus::Idle => counts.idle += 1,
                WorkerStatus::Ended | WorkerStatus::Terminated => counts.ended += 1,
            }
        }
        counts
    }
}
