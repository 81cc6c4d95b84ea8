//! Collaborator contracts: the per-trial "do" operation and metric
//! evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::store::SharedStore;
use crate::task::{TaskId, TrialError};

/// Metric name → value mapping produced by a completed trial.
pub type Evaluation = BTreeMap<String, f64>;

/// Maps (actual, predicted) to named metrics, e.g. `{"rmse": 0.42}`.
pub type EvalFn = Arc<dyn Fn(&[f64], &[f64]) -> Evaluation + Send + Sync>;

/// Everything a trial needs to produce its evaluation.
pub struct TrialContext<'a> {
    /// Identity of the trial being executed.
    pub id: &'a TaskId,
    /// Free-form trial parameters from the submission.
    pub params: &'a Value,
    /// Shared inputs, looked up by `id.data_key` (or any other key).
    pub store: &'a SharedStore,
    /// The pool-wide evaluation function.
    pub evaluate: &'a EvalFn,
}

/// The domain "do" operation: fit, predict, evaluate.
///
/// Implementations read their inputs from the store by key and return the
/// evaluation mapping; the worker records it on the task. Failures should
/// be returned, not panicked, though panics are caught and stored too.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn execute(&self, ctx: TrialContext<'_>) -> Result<Evaluation, TrialError>;
}
