//! Task handoff queues: to-do, doing, done.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::task::{Task, TaskId};
use crate::worker::WorkerId;

/// The three handoff containers tracking a task's stage.
///
/// This is the pool's shared-state service: callers only see atomic
/// operations, never the raw collections. Each operation takes one lock
/// round, so no partial task is ever observed. No cross-operation
/// transaction is guaranteed. The one compound operation is `claim`, which
/// pops and assigns in a single step so a task cannot vanish between the
/// two.
#[derive(Default)]
pub struct TaskQueues {
    to_do: Mutex<VecDeque<Task>>,
    doing: RwLock<HashMap<WorkerId, Task>>,
    done: Mutex<VecDeque<Task>>,
}

impl TaskQueues {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── to-do: FIFO, multi-producer, multi-consumer ─────────────────────

    pub async fn push_to_do(&self, task: Task) {
        self.to_do.lock().await.push_back(task);
    }

    /// Pop the oldest waiting task. Returns `None` immediately when empty;
    /// an empty queue is a normal signal, never an error.
    pub async fn pop_to_do(&self) -> Option<Task> {
        self.to_do.lock().await.pop_front()
    }

    /// Pop the oldest waiting task and assign it to `worker` in `doing`,
    /// as a single service operation.
    pub async fn claim(&self, worker: WorkerId) -> Option<Task> {
        let mut to_do = self.to_do.lock().await;
        let task = to_do.pop_front()?;
        self.doing.write().await.insert(worker, task.clone());
        Some(task)
    }

    pub async fn to_do_len(&self) -> usize {
        self.to_do.lock().await.len()
    }

    pub async fn to_do_snapshot(&self) -> Vec<Task> {
        self.to_do.lock().await.iter().cloned().collect()
    }

    // ── doing: one writer per worker id ─────────────────────────────────

    pub async fn set_doing(&self, worker: WorkerId, task: Task) {
        self.doing.write().await.insert(worker, task);
    }

    pub async fn get_doing(&self, worker: WorkerId) -> Option<Task> {
        self.doing.read().await.get(&worker).cloned()
    }

    /// Remove and return `worker`'s in-flight task, if any.
    pub async fn take_doing(&self, worker: WorkerId) -> Option<Task> {
        self.doing.write().await.remove(&worker)
    }

    pub async fn doing_len(&self) -> usize {
        self.doing.read().await.len()
    }

    pub async fn doing_snapshot(&self) -> Vec<Task> {
        self.doing.read().await.values().cloned().collect()
    }

    // ── done: multi-producer, single consumer (the Manager) ─────────────

    pub async fn push_done(&self, task: Task) {
        self.done.lock().await.push_back(task);
    }

    pub async fn pop_done(&self) -> Option<Task> {
        self.done.lock().await.pop_front()
    }

    pub async fn done_len(&self) -> usize {
        self.done.lock().await.len()
    }

    pub async fn done_snapshot(&self) -> Vec<Task> {
        self.done.lock().await.iter().cloned().collect()
    }

    /// Whether an outcome for `id` is already waiting in done. Used by the
    /// terminate path to avoid requeuing a task whose result raced ahead.
    pub async fn done_contains(&self, id: &TaskId) -> bool {
        self.done.lock().await.iter().any(|task| task.id() == id)
    }
}
