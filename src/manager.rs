//! Pool manager: spawns workers, drains results, estimates time, renders
//! progress.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, TaskError, WorkerError};
use crate::estimate::EstimateBook;
use crate::exec::{EvalFn, TrialExecutor};
use crate::queue::TaskQueues;
use crate::store::SharedStore;
use crate::task::{Task, TaskId, TaskStatus};
use crate::worker::{StatusBoard, StatusCounts, WorkerId, WorkerRuntime, WorkerStatus};

/// Handle to one spawned worker.
struct WorkerHandle {
    join: JoinHandle<()>,
    proceed: Arc<AtomicBool>,
}

/// One sample of overall pool progress.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Tasks finished (processed history plus undrained done).
    pub done_count: usize,
    /// All tasks the pool has ever accepted.
    pub total_count: usize,
    /// Estimated time already spent; `None` in count-based mode.
    pub done_time: Option<Duration>,
    /// Estimated total time; `None` in count-based mode.
    pub total_time: Option<Duration>,
    /// Worker-status counts at sampling time.
    pub workers: StatusCounts,
}

impl Progress {
    /// Whether enough samples exist to report time-based progress.
    pub fn is_time_based(&self) -> bool {
        self.done_time.is_some() && self.total_time.is_some()
    }

    pub fn remaining(&self) -> usize {
        self.total_count - self.done_count
    }

    /// The progress-line text: `tasks: done/total | workers: …`.
    pub fn message(&self) -> String {
        let workers = self.workers.summary();
        if workers.is_empty() {
            format!("tasks: {}/{}", self.done_count, self.total_count)
        } else {
            format!(
                "tasks: {}/{} | workers: {}",
                self.done_count, self.total_count, workers
            )
        }
    }
}

/// Owns the worker registry, the shared containers, and the estimate book.
///
/// The Manager is single-threaded by construction: every mutating operation
/// takes `&mut self`, and monitoring is pull-based polling rather than push
/// notification.
pub struct Manager {
    config: PoolConfig,
    store: SharedStore,
    queues: Arc<TaskQueues>,
    statuses: Arc<StatusBoard>,
    executor: Arc<dyn TrialExecutor>,
    evaluate: EvalFn,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    next_worker: u64,
    /// Every identity ever accepted; duplicates are rejected against this.
    tracked: HashSet<TaskId>,
    /// Archived outcomes, in drain order.
    processed: Vec<Task>,
    estimates: EstimateBook,
}

impl Manager {
    pub fn new(executor: Arc<dyn TrialExecutor>, evaluate: EvalFn, config: PoolConfig) -> Self {
        Self {
            config,
            store: SharedStore::new(),
            queues: TaskQueues::new(),
            statuses: StatusBoard::new(),
            executor,
            evaluate,
            workers: BTreeMap::new(),
            next_worker: 0,
            tracked: HashSet::new(),
            processed: Vec::new(),
            estimates: EstimateBook::new(),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Store passthrough for large shared inputs.
    pub async fn add_data<T: std::any::Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        overwrite: bool,
    ) -> Result<(), Error> {
        self.store.add(key, value, overwrite).await?;
        Ok(())
    }

    // ── submission ──────────────────────────────────────────────────────

    /// Validate, dedupe, and enqueue one trial.
    pub async fn add_task(
        &mut self,
        category: impl Into<String>,
        instance: impl Into<String>,
        data_key: impl Into<String>,
        target: impl Into<String>,
        params: Value,
    ) -> Result<TaskId, Error> {
        let task = Task::new(category, instance, data_key, target, params)?;
        self.submit(task).await
    }

    /// Enqueue a batch of pre-built trials.
    pub async fn add_tasks(
        &mut self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Vec<TaskId>, Error> {
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(self.submit(task).await?);
        }
        Ok(ids)
    }

    async fn submit(&mut self, task: Task) -> Result<TaskId, Error> {
        let id = task.id().clone();
        if self.tracked.contains(&id) {
            return Err(TaskError::Duplicate { id }.into());
        }
        self.tracked.insert(id.clone());
        self.queues.push_to_do(task).await;
        debug!(task = %id, "task enqueued");
        Ok(id)
    }

    // ── workers ─────────────────────────────────────────────────────────

    /// Spawn `count` workers with fresh monotonic ids, each with
    /// `proceed = true`.
    pub async fn start_workers(&mut self, count: usize) -> Vec<WorkerId> {
        // pick up anything already finished before growing the pool
        let _ = self.process_done(true).await;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            self.next_worker += 1;
            let id = WorkerId::new(self.next_worker);
            let proceed = Arc::new(AtomicBool::new(true));
            let runtime = WorkerRuntime {
                id,
                queues: Arc::clone(&self.queues),
                statuses: Arc::clone(&self.statuses),
                store: self.store.clone(),
                executor: Arc::clone(&self.executor),
                evaluate: Arc::clone(&self.evaluate),
                proceed: Arc::clone(&proceed),
                idle_backoff: self.config.idle_backoff,
            };
            let join = tokio::spawn(runtime.run());
            self.workers.insert(id, WorkerHandle { join, proceed });
            debug!(worker = %id, "worker spawned");
            ids.push(id);
        }
        ids
    }

    /// Ids of workers the Manager still holds a handle for.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Request cooperative shutdown: the worker finishes its current task,
    /// then exits on its own. `None` stops all workers.
    pub fn stop(&mut self, worker: Option<WorkerId>) -> Result<(), Error> {
        match worker {
            Some(id) => {
                let handle = self
                    .workers
                    .get(&id)
                    .ok_or(WorkerError::NotFound { id })?;
                handle.proceed.store(false, Ordering::Release);
                debug!(worker = %id, "stop requested");
                Ok(())
            }
            None => {
                for (id, handle) in &self.workers {
                    handle.proceed.store(false, Ordering::Release);
                    debug!(worker = %id, "stop requested");
                }
                Ok(())
            }
        }
    }

    /// Await every worker whose proceed flag has been lowered.
    pub async fn join_stopped(&mut self) {
        let stopped: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, handle)| !handle.proceed.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();
        for id in stopped {
            if let Some(handle) = self.workers.remove(&id) {
                let _ = handle.join.await;
            }
        }
    }

    /// Forced shutdown: abort the worker task and requeue its in-flight
    /// trial. `None` terminates all workers.
    pub async fn terminate(
        &mut self,
        worker: Option<WorkerId>,
        echo: bool,
    ) -> Result<(), Error> {
        match worker {
            Some(id) => self.terminate_one(id, echo).await,
            None => {
                let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
                for id in ids {
                    self.terminate_one(id, echo).await?;
                }
                Ok(())
            }
        }
    }

    async fn terminate_one(&mut self, id: WorkerId, echo: bool) -> Result<(), Error> {
        let handle = self
            .workers
            .remove(&id)
            .ok_or(WorkerError::NotFound { id })?;
        handle.proceed.store(false, Ordering::Release);
        handle.join.abort();

        // recover the in-flight trial, unless its outcome already landed
        if let Some(mut task) = self.queues.take_doing(id).await {
            if self.queues.done_contains(task.id()).await {
                debug!(worker = %id, task = %task.id(), "outcome already reported, not requeued");
            } else {
                task.reset_for_retry();
                debug!(worker = %id, task = %task.id(), "in-flight task requeued");
                self.queues.push_to_do(task).await;
            }
        }

        let status = self
            .statuses
            .set_unless_ended(id, WorkerStatus::Terminated)
            .await;
        if echo {
            info!(worker = %id, status = %status, "worker terminated");
        }
        Ok(())
    }

    // ── draining and estimation ─────────────────────────────────────────

    /// Drain the done queue fully into processed history.
    ///
    /// Successful trials feed the category's time estimate. Errored trials
    /// are archived, then either recorded silently (`ignore_errors`) or
    /// re-raised, aborting the drain. Returns the number drained.
    pub async fn process_done(&mut self, ignore_errors: bool) -> Result<usize, Error> {
        let mut drained = 0;
        while let Some(task) = self.queues.pop_done().await {
            drained += 1;
            match task.status() {
                TaskStatus::Done => {
                    if let Some(elapsed) = task.elapsed() {
                        self.estimates.record(task.category(), elapsed);
                    }
                    self.processed.push(task);
                }
                TaskStatus::Error => {
                    let id = task.id().clone();
                    let message = task
                        .error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    self.processed.push(task);
                    if !ignore_errors {
                        return Err(TaskError::Execution { id, message }.into());
                    }
                }
                status => {
                    warn!(task = %task.id(), %status, "unexpected status in done queue");
                    self.processed.push(task);
                }
            }
        }
        Ok(drained)
    }

    pub fn estimates(&self) -> &EstimateBook {
        &self.estimates
    }

    pub fn processed(&self) -> &[Task] {
        &self.processed
    }

    /// Estimated duration for one task.
    ///
    /// A finished task reports its measured elapsed. Otherwise fall back to
    /// the category mean, then the global mean across categories. `None`
    /// when no sample exists anywhere; the caller must propagate it, not
    /// treat it as zero.
    pub fn get_time_estimate(&self, task: &Task) -> Option<Duration> {
        if task.is_done() {
            return task.elapsed();
        }
        if let Some(mean) = self.estimates.category_mean(task.category()) {
            return Some(mean);
        }
        self.estimates.global_mean()
    }

    // ── counts and times ────────────────────────────────────────────────

    /// Tasks not yet finished: waiting in to-do plus in flight.
    pub async fn count_to_do(&self) -> usize {
        self.queues.to_do_len().await + self.queues.doing_len().await
    }

    /// Tasks finished: archived plus waiting in done.
    pub async fn count_done(&self) -> usize {
        self.processed.len() + self.queues.done_len().await
    }

    pub async fn to_do_len(&self) -> usize {
        self.queues.to_do_len().await
    }

    pub async fn doing_len(&self) -> usize {
        self.queues.doing_len().await
    }

    /// Identities currently waiting in to-do, oldest first.
    pub async fn to_do_ids(&self) -> Vec<TaskId> {
        self.queues
            .to_do_snapshot()
            .await
            .into_iter()
            .map(|task| task.id().clone())
            .collect()
    }

    /// Estimated time left over doing ∪ to-do. `Some(0)` when nothing is
    /// pending; `None` when any pending task has no estimate.
    pub async fn to_do_time(&self) -> Option<Duration> {
        let mut pending = self.queues.doing_snapshot().await;
        pending.extend(self.queues.to_do_snapshot().await);
        if pending.is_empty() {
            return Some(Duration::ZERO);
        }
        let mut total = Duration::ZERO;
        for task in &pending {
            total += self.get_time_estimate(task)?;
        }
        Some(total)
    }

    /// Estimated time spent over processed ∪ done; `None` when any finished
    /// task has no estimate (e.g. errored with no samples yet).
    pub async fn done_time(&self) -> Option<Duration> {
        let mut total = Duration::ZERO;
        for task in &self.processed {
            total += self.get_time_estimate(task)?;
        }
        for task in self.queues.done_snapshot().await {
            total += self.get_time_estimate(&task)?;
        }
        Some(total)
    }

    // ── progress ────────────────────────────────────────────────────────

    /// Drain done, then sample progress. Time-based when every task has an
    /// estimate, count-based otherwise.
    pub async fn progress(&mut self) -> Progress {
        let _ = self.process_done(true).await;

        let to_do_count = self.count_to_do().await;
        let done_count = self.count_done().await;
        let workers = self.statuses.counts().await;

        let (done_time, total_time) =
            match (self.done_time().await, self.to_do_time().await) {
                (Some(done), Some(to_do)) => (Some(done), Some(done + to_do)),
                _ => (None, None),
            };

        Progress {
            done_count,
            total_count: to_do_count + done_count,
            done_time,
            total_time,
            workers,
        }
    }

    /// Poll-and-render loop: drains done and redraws a single in-place
    /// progress line every monitor tick until the backlog is empty, the
    /// optional time limit passes, or Ctrl-C lands. The interrupt still
    /// gets one final drain-and-render before control returns.
    pub async fn show_progress(&mut self, time_limit: Option<Duration>) {
        if self.workers.is_empty() {
            warn!("no workers running; progress would never advance");
            return;
        }

        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {percent:>3}% {msg}")
                .unwrap(),
        );

        let started = Instant::now();
        let mut tick = tokio::time::interval(self.config.monitor_interval);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let remaining = self.render_tick(&bar).await;
                    if remaining == 0 {
                        bar.finish();
                        break;
                    }
                    if let Some(limit) = time_limit {
                        if started.elapsed() > limit {
                            bar.abandon();
                            break;
                        }
                    }
                }
                _ = &mut ctrl_c => {
                    self.render_tick(&bar).await;
                    bar.abandon();
                    break;
                }
            }
        }
    }

    /// One monitor tick: drain, compute, redraw. Returns tasks remaining.
    async fn render_tick(&mut self, bar: &ProgressBar) -> usize {
        let progress = self.progress().await;
        if let (Some(done), Some(total)) = (progress.done_time, progress.total_time) {
            bar.set_length((total.as_millis() as u64).max(1));
            bar.set_position(done.as_millis() as u64);
        } else {
            bar.set_length(progress.total_count.max(1) as u64);
            bar.set_position(progress.done_count as u64);
        }
        bar.set_message(progress.message());
        progress.remaining()
    }

    // ── reporting ───────────────────────────────────────────────────────

    /// Flat records for every tracked task, deduplicated across containers.
    pub async fn task_records(&self) -> Vec<Map<String, Value>> {
        let done = self.queues.done_snapshot().await;
        let doing = self.queues.doing_snapshot().await;
        let to_do = self.queues.to_do_snapshot().await;

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for task in self
            .processed
            .iter()
            .chain(done.iter())
            .chain(doing.iter())
            .chain(to_do.iter())
        {
            if seen.insert(task.id().clone()) {
                records.push(task.record());
            }
        }
        records
    }

    /// Worker id and status, in id order.
    pub async fn worker_status_table(&self) -> Vec<(WorkerId, WorkerStatus)> {
        self.statuses.snapshot().await.into_iter().collect()
    }

    /// The progress-line worker summary, e.g. `"2 active, 1 idle"`.
    pub async fn worker_summary(&self) -> String {
        self.statuses.counts().await.summary()
    }
}
