//! Integration tests for the trial pool.
//!
//! Each test drives the public Manager API with a stub executor — no real
//! model fitting — and polls with explicit timeouts, so no test depends on
//! scheduler luck.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;

use trialpool::config::PoolConfig;
use trialpool::error::{Error, TaskError};
use trialpool::exec::{EvalFn, Evaluation, TrialContext, TrialExecutor};
use trialpool::manager::Manager;
use trialpool::task::{TaskStatus, TrialError};
use trialpool::worker::WorkerStatus;

/// Maximum time any polling loop is allowed to run before the test fails.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub executor driven entirely by task params:
/// `sleep_ms` (default 10), `fail` and `panic` flags.
struct StubTrial;

#[async_trait]
impl TrialExecutor for StubTrial {
    async fn execute(&self, ctx: TrialContext<'_>) -> Result<Evaluation, TrialError> {
        let sleep_ms = ctx.params["sleep_ms"].as_u64().unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

        if ctx.params["fail"].as_bool().unwrap_or(false) {
            return Err(TrialError::new("fit", "synthetic failure"));
        }
        if ctx.params["panic"].as_bool().unwrap_or(false) {
            panic!("synthetic panic");
        }

        let actual = [1.0, 2.0, 3.0];
        Ok((ctx.evaluate)(&actual, &actual))
    }
}

/// Stub executor that reads its inputs from the shared store.
struct StoreReadingTrial;

#[async_trait]
impl TrialExecutor for StoreReadingTrial {
    async fn execute(&self, ctx: TrialContext<'_>) -> Result<Evaluation, TrialError> {
        let actual: Arc<Vec<f64>> = ctx
            .store
            .get(&ctx.id.data_key)
            .await
            .map_err(|e| TrialError::new("data", e.to_string()))?;
        Ok((ctx.evaluate)(&actual, &actual))
    }
}

fn evaluate() -> EvalFn {
    Arc::new(|actual, predicted| {
        let n = actual.len().max(1) as f64;
        let sq: f64 = actual
            .iter()
            .zip(predicted)
            .map(|(y, p)| (y - p).powi(2))
            .sum();
        let mut evaluation = Evaluation::new();
        evaluation.insert("rmse".to_string(), (sq / n).sqrt());
        evaluation
    })
}

fn manager(executor: Arc<dyn TrialExecutor>) -> Manager {
    let config = PoolConfig {
        idle_backoff: Duration::from_millis(5),
        ..PoolConfig::default()
    };
    Manager::new(executor, evaluate(), config)
}

/// Poll until `count_done` reaches `expected` (without draining).
async fn wait_for_done(manager: &Manager, expected: usize) {
    timeout(TEST_TIMEOUT, async {
        while manager.count_done().await < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for task completion");
}

/// Poll until one task is in flight.
async fn wait_for_in_flight(manager: &Manager) {
    timeout(TEST_TIMEOUT, async {
        while manager.doing_len().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for a claim");
}

#[tokio::test]
async fn full_run_drains_everything() {
    let mut manager = manager(Arc::new(StubTrial));
    for i in 0..6 {
        manager
            .add_task("xgb", format!("t{i}"), "sales", "units", json!({"sleep_ms": 15}))
            .await
            .unwrap();
    }
    assert_eq!(manager.count_to_do().await, 6);

    manager.start_workers(2).await;
    wait_for_done(&manager, 6).await;

    manager.stop(None).unwrap();
    manager.join_stopped().await;

    let drained = manager.process_done(true).await.unwrap();
    assert!(drained <= 6);
    assert_eq!(manager.processed().len(), 6);
    assert!(manager.processed().iter().all(|t| t.is_done()));
    assert_eq!(manager.count_to_do().await, 0);

    // every worker ended on its own
    for (_, status) in manager.worker_status_table().await {
        assert_eq!(status, WorkerStatus::Ended);
    }

    // with samples everywhere, progress is time-based and complete
    let progress = manager.progress().await;
    assert!(progress.is_time_based());
    assert_eq!(progress.remaining(), 0);
    assert_eq!(progress.done_time, progress.total_time);
}

#[tokio::test]
async fn time_estimate_fallback_chain() {
    let mut manager = manager(Arc::new(StubTrial));
    manager
        .add_task("xgb", "a", "sales", "units", json!({"sleep_ms": 30}))
        .await
        .unwrap();

    manager.start_workers(1).await;
    wait_for_done(&manager, 1).await;
    manager.stop(None).unwrap();
    manager.join_stopped().await;
    manager.process_done(true).await.unwrap();

    let finished = &manager.processed()[0];
    let e1 = finished.elapsed().expect("finished task has an elapsed");

    // one sample: count and mean match the measured duration
    let estimate = manager
        .estimates()
        .get(finished.category())
        .expect("category has an estimate");
    assert_eq!(estimate.count(), 1);
    assert_eq!(estimate.mean(), Some(e1));

    // a finished task always reports its own measurement
    assert_eq!(manager.get_time_estimate(finished), Some(e1));

    // an unfinished task of the same category gets the category mean
    let b = trialpool::task::Task::new("xgb", "b", "sales", "units", json!({})).unwrap();
    assert_eq!(manager.get_time_estimate(&b), Some(e1));

    // an unfinished task of an unseen category falls back to the global mean
    let c = trialpool::task::Task::new("linear", "c", "sales", "units", json!({})).unwrap();
    assert_eq!(manager.get_time_estimate(&c), Some(e1));
}

#[tokio::test]
async fn stop_finishes_the_in_flight_task() {
    let mut manager = manager(Arc::new(StubTrial));
    manager
        .add_task("xgb", "slow", "sales", "units", json!({"sleep_ms": 200}))
        .await
        .unwrap();
    manager
        .add_task("xgb", "later", "sales", "units", json!({"sleep_ms": 200}))
        .await
        .unwrap();

    manager.start_workers(1).await;
    wait_for_in_flight(&manager).await;

    // stop mid-task: the worker must finish, report, and exit
    manager.stop(None).unwrap();
    manager.join_stopped().await;

    manager.process_done(true).await.unwrap();
    assert_eq!(manager.processed().len(), 1);
    assert_eq!(manager.processed()[0].id().instance, "slow");
    assert!(manager.processed()[0].is_done());

    // the second task was never picked up
    assert_eq!(manager.to_do_len().await, 1);
    for (_, status) in manager.worker_status_table().await {
        assert_eq!(status, WorkerStatus::Ended);
    }
}

#[tokio::test]
async fn terminate_requeues_the_in_flight_task() {
    let mut manager = manager(Arc::new(StubTrial));
    let id = manager
        .add_task("xgb", "stuck", "sales", "units", json!({"sleep_ms": 60_000}))
        .await
        .unwrap();

    let workers = manager.start_workers(1).await;
    wait_for_in_flight(&manager).await;

    manager.terminate(Some(workers[0]), false).await.unwrap();

    // the exact task is back in to-do, exactly once
    let requeued = manager.to_do_ids().await;
    assert_eq!(requeued, vec![id]);
    assert_eq!(manager.doing_len().await, 0);
    assert_eq!(manager.count_to_do().await, 1);

    let table = manager.worker_status_table().await;
    assert_eq!(table[0].1, WorkerStatus::Terminated);
}

#[tokio::test]
async fn errored_trial_is_recorded_not_fatal() {
    let mut manager = manager(Arc::new(StubTrial));
    manager
        .add_task("xgb", "bad", "sales", "units", json!({"fail": true, "sleep_ms": 5}))
        .await
        .unwrap();
    manager
        .add_task("xgb", "good", "sales", "units", json!({"sleep_ms": 5}))
        .await
        .unwrap();

    manager.start_workers(1).await;
    wait_for_done(&manager, 2).await;
    manager.stop(None).unwrap();
    manager.join_stopped().await;

    // a strict drain re-raises the stored failure...
    let err = manager.process_done(false).await.unwrap_err();
    assert!(matches!(err, Error::Task(TaskError::Execution { .. })));

    // ...after archiving the errored task; a lenient drain takes the rest
    manager.process_done(true).await.unwrap();
    assert_eq!(manager.processed().len(), 2);

    let errored = manager
        .processed()
        .iter()
        .find(|t| t.id().instance == "bad")
        .unwrap();
    assert_eq!(errored.status(), TaskStatus::Error);
    assert_eq!(errored.error().unwrap().kind, "fit");
    let record = errored.record();
    assert_eq!(record["status"], json!("error"));
    assert!(record["error"].as_str().unwrap().contains("synthetic failure"));
}

#[tokio::test]
async fn panic_is_captured_and_the_worker_survives() {
    let mut manager = manager(Arc::new(StubTrial));
    manager
        .add_task("xgb", "boom", "sales", "units", json!({"panic": true, "sleep_ms": 5}))
        .await
        .unwrap();
    manager
        .add_task("xgb", "after", "sales", "units", json!({"sleep_ms": 5}))
        .await
        .unwrap();

    manager.start_workers(1).await;
    // both outcomes arriving proves the worker outlived the panic
    wait_for_done(&manager, 2).await;
    manager.stop(None).unwrap();
    manager.join_stopped().await;
    manager.process_done(true).await.unwrap();

    let panicked = manager
        .processed()
        .iter()
        .find(|t| t.id().instance == "boom")
        .unwrap();
    assert_eq!(panicked.status(), TaskStatus::Error);
    assert_eq!(panicked.error().unwrap().kind, "panic");

    let survivor = manager
        .processed()
        .iter()
        .find(|t| t.id().instance == "after")
        .unwrap();
    assert!(survivor.is_done());
}

#[tokio::test]
async fn executor_reads_shared_inputs_from_the_store() {
    let mut manager = manager(Arc::new(StoreReadingTrial));
    manager
        .add_data("sales", vec![1.0f64, 2.0, 3.0, 4.0], false)
        .await
        .unwrap();

    manager
        .add_task("xgb", "a", "sales", "units", json!({}))
        .await
        .unwrap();
    manager.start_workers(1).await;
    wait_for_done(&manager, 1).await;
    manager.stop(None).unwrap();
    manager.join_stopped().await;
    manager.process_done(true).await.unwrap();

    let task = &manager.processed()[0];
    assert!(task.is_done());
    // identical actual/predicted → zero error, merged into the record
    assert_eq!(task.record()["rmse"], json!(0.0));

    // a task pointing at a missing key errors instead of crashing anything
    manager
        .add_task("xgb", "b", "absent", "units", json!({}))
        .await
        .unwrap();
    manager.start_workers(1).await;
    wait_for_done(&manager, 2).await;
    manager.stop(None).unwrap();
    manager.join_stopped().await;
    manager.process_done(true).await.unwrap();

    let missing = manager
        .processed()
        .iter()
        .find(|t| t.id().instance == "b")
        .unwrap();
    assert_eq!(missing.status(), TaskStatus::Error);
    assert_eq!(missing.error().unwrap().kind, "data");
}
