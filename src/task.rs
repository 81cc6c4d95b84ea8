//! Trial tasks and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::error::TaskError;
use crate::estimate::TimeUnit;
use crate::exec::Evaluation;

/// Grouping key for time-estimation statistics.
///
/// Supplied explicitly by the submitter (typically the kind of model being
/// fitted), never inferred at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Create a category key. Fails on an empty or blank name.
    pub fn new(name: impl Into<String>) -> Result<Self, TaskError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TaskError::Validation {
                field: "category",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a task: unique across the whole pool at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    /// Grouping key used for time estimation.
    pub category: Category,
    /// Which instance of the category (e.g. a hyperparameter draw).
    pub instance: String,
    /// Store key of the input data this trial reads.
    pub data_key: String,
    /// Field of the data the trial predicts.
    pub target: String,
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.category, self.instance, self.data_key, self.target
        )
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in to-do (also the state a requeued task returns to).
    New,
    /// Claimed by a worker and executing.
    Started,
    /// Finished with an evaluation.
    Done,
    /// Finished with a captured failure.
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Done => "done",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Captured failure from domain logic, stored on the task.
///
/// Never raised synchronously; the Manager re-raises it during a drain only
/// when asked to.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TrialError {
    /// Failure class, e.g. `fit`, `predict`, `panic`.
    pub kind: String,
    pub message: String,
    pub trace: Option<String>,
}

impl TrialError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// A unit of work: one fit-and-evaluate trial.
///
/// Created by the submitter, mutated only by the worker executing it, read
/// by the Manager for aggregation. Never destroyed: it moves between the
/// handoff containers until archived in processed history.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    /// Free-form trial parameters (not part of the identity).
    params: Value,
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    evaluation: Option<Evaluation>,
    error: Option<TrialError>,
}

impl Task {
    /// Build a task, validating every identity field.
    pub fn new(
        category: impl Into<String>,
        instance: impl Into<String>,
        data_key: impl Into<String>,
        target: impl Into<String>,
        params: Value,
    ) -> Result<Self, TaskError> {
        let id = TaskId {
            category: Category::new(category)?,
            instance: non_empty("instance", instance.into())?,
            data_key: non_empty("data_key", data_key.into())?,
            target: non_empty("target", target.into())?,
        };
        Ok(Self {
            id,
            params,
            status: TaskStatus::New,
            started_at: None,
            ended_at: None,
            evaluation: None,
            error: None,
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn category(&self) -> &Category {
        &self.id.category
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn error(&self) -> Option<&TrialError> {
        self.error.as_ref()
    }

    /// Mark the task started and record the timestamp.
    pub fn start(&mut self) {
        self.status = TaskStatus::Started;
        self.started_at = Some(Utc::now());
    }

    /// Attach the evaluation produced by the trial.
    pub fn set_evaluation(&mut self, evaluation: Evaluation) {
        self.evaluation = Some(evaluation);
    }

    /// Mark the task done and record the timestamp.
    ///
    /// The evaluation must already be set.
    pub fn end(&mut self) -> Result<(), TaskError> {
        if self.evaluation.is_none() {
            return Err(TaskError::MissingEvaluation {
                id: self.id.clone(),
            });
        }
        self.ended_at = Some(Utc::now());
        self.status = TaskStatus::Done;
        Ok(())
    }

    /// Record a captured failure. Valid from any state, never fails.
    pub fn set_error(&mut self, error: TrialError) {
        self.error = Some(error);
        self.status = TaskStatus::Error;
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Measured duration, only once both timestamps are set.
    ///
    /// `None` is the missing-value sentinel; a missing duration is never
    /// reported as zero.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.ended_at?;
        end.signed_duration_since(start).to_std().ok()
    }

    /// Measured duration converted to `unit`.
    pub fn elapsed_in(&self, unit: TimeUnit) -> Option<f64> {
        self.elapsed().map(|d| unit.convert(d))
    }

    /// Flat field→value record for reporting.
    ///
    /// Evaluation metrics are merged at the top level and take precedence
    /// over identity/timing fields on a key collision.
    pub fn record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("category".to_string(), json!(self.id.category.as_str()));
        record.insert("instance".to_string(), json!(self.id.instance));
        record.insert("data_key".to_string(), json!(self.id.data_key));
        record.insert("target".to_string(), json!(self.id.target));
        record.insert("status".to_string(), json!(self.status.to_string()));
        record.insert("started_at".to_string(), json!(self.started_at));
        record.insert("ended_at".to_string(), json!(self.ended_at));
        record.insert(
            "elapsed_ms".to_string(),
            json!(self.elapsed_in(TimeUnit::Millis)),
        );
        if let Some(error) = &self.error {
            record.insert("error".to_string(), json!(error.to_string()));
        }
        if let Some(evaluation) = &self.evaluation {
            for (name, value) in evaluation {
                record.insert(name.clone(), json!(value));
            }
        }
        record
    }

    /// Return a requeued task to the state a fresh submission has.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = TaskStatus::New;
        self.started_at = None;
        self.ended_at = None;
        self.evaluation = None;
        self.error = None;
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, TaskError> {
    if value.trim().is_empty() {
        return Err(TaskError::Validation {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}
