//! The worker pull loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::exec::{EvalFn, Evaluation, TrialContext, TrialExecutor};
use crate::queue::TaskQueues;
use crate::store::SharedStore;
use crate::task::{Task, TrialError};
use crate::worker::status::{StatusBoard, WorkerId, WorkerStatus};

/// Everything one worker needs to run its loop.
pub(crate) struct WorkerRuntime {
    pub id: WorkerId,
    pub queues: Arc<TaskQueues>,
    pub statuses: Arc<StatusBoard>,
    pub store: SharedStore,
    pub executor: Arc<dyn TrialExecutor>,
    pub evaluate: EvalFn,
    /// Cooperative shutdown flag; the loop exits when it reads false.
    pub proceed: Arc<AtomicBool>,
    /// Sleep between empty-queue polls.
    pub idle_backoff: Duration,
}

impl WorkerRuntime {
    /// Pull-execute-report until the proceed flag goes false.
    ///
    /// An empty to-do queue is a normal condition: the worker reports idle
    /// and polls again. A single trial's failure is recorded on the task
    /// and never exits the loop.
    pub(crate) async fn run(self) {
        self.statuses.set(self.id, WorkerStatus::Started).await;
        debug!(worker = %self.id, "worker started");

        while self.proceed.load(Ordering::Acquire) {
            let Some(mut task) = self.queues.claim(self.id).await else {
                self.statuses.set(self.id, WorkerStatus::Idle).await;
                tokio::time::sleep(self.idle_backoff).await;
                continue;
            };

            self.statuses.set(self.id, WorkerStatus::Active).await;
            task.start();
            // keep the doing entry in step with the started task
            self.queues.set_doing(self.id, task.clone()).await;

            match self.execute(&task).await {
                Ok(evaluation) => {
                    task.set_evaluation(evaluation);
                    if let Err(err) = task.end() {
                        task.set_error(TrialError::new("lifecycle", err.to_string()));
                    }
                }
                Err(err) => {
                    warn!(worker = %self.id, task = %task.id(), error = %err, "trial failed");
                    task.set_error(err);
                }
            }

            self.queues.push_done(task).await;
            self.queues.take_doing(self.id).await;
        }

        self.statuses.set(self.id, WorkerStatus::Ended).await;
        debug!(worker = %self.id, "worker ended");
    }

    /// Run the trial, converting a panic into a captured error.
    async fn execute(&self, task: &Task) -> Result<Evaluation, TrialError> {
        let ctx = TrialContext {
            id: task.id(),
            params: task.params(),
            store: &self.store,
            evaluate: &self.evaluate,
        };
        match AssertUnwindSafe(self.executor.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(TrialError::new("panic", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "trial panicked".to_string()
    }
}
