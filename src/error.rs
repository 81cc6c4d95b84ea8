//! Error types for the trial pool.

use crate::task::TaskId;
use crate::worker::WorkerId;

/// Top-level error type for the pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Task identity and lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task identity: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Task {id} already exists")]
    Duplicate { id: TaskId },

    #[error("Task {id} cannot end without an evaluation")]
    MissingEvaluation { id: TaskId },

    /// A stored trial failure re-raised during a drain.
    #[error("Task {id} failed: {message}")]
    Execution { id: TaskId, message: String },
}

/// Shared data store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Data {key} already exists in the store")]
    DuplicateKey { key: String },

    #[error("Data {key} not found in the store")]
    KeyNotFound { key: String },

    #[error("Data {key} holds a different payload type")]
    WrongType { key: String },
}

/// Worker registry errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Unknown worker {id}")]
    NotFound { id: WorkerId },
}
