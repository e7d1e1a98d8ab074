// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Single-worker FIFO task executor. Long-running operations (camera
//! provisioning, bulk zone re-import, license re-validation sweeps) are
//! submitted here instead of run inline, so an API handler can return
//! immediately with a task id and poll for completion.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{TaskRecord, TaskState};

/// A unit of work submitted to the executor. Receives a progress callback
/// it may call zero or more times before returning.
pub type TaskFn = Box<dyn FnOnce(ProgressReporter) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send>;

#[derive(Clone)]
pub struct ProgressReporter {
    task_id: String,
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl ProgressReporter {
    pub fn report(&self, progress: f32, message: impl Into<String>) {
        let mut tasks = self.tasks.lock();
        if let Some(record) = tasks.get_mut(&self.task_id) {
            record.progress = progress.clamp(0.0, 1.0);
            record.message = message.into();
            record.updated_at = Utc::now();
        }
    }
}

struct Submission {
    task_id: String,
    task_type: String,
    target_id: String,
    work: TaskFn,
}

/// Default age after which completed/failed tasks are evicted from the
/// in-memory table by [`TaskExecutor::cleanup_old_tasks`].
const DEFAULT_CLEANUP_AGE_SECONDS: i64 = 3600;

/// Runs submitted work one at a time, in submission order, on a single
/// background worker task. Queueing is unbounded in memory; callers that
/// need backpressure should track queue depth via [`TaskExecutor::get`]
/// on the tasks they submitted.
pub struct TaskExecutor {
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
    queue_tx: mpsc::UnboundedSender<Submission>,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskExecutor {
    pub fn new() -> Arc<Self> {
        let tasks: Arc<Mutex<HashMap<String, TaskRecord>>> = Arc::new(Mutex::new(HashMap::new()));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Submission>();
        let running = Arc::new(AtomicBool::new(true));
        let stop_signal = Arc::new(Notify::new());

        let executor = Arc::new(TaskExecutor {
            tasks: tasks.clone(),
            queue_tx,
            running: running.clone(),
            stop_signal: stop_signal.clone(),
            worker: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::run_worker(tasks, queue_rx, running, stop_signal));
        *executor.worker.lock() = Some(handle);
        executor
    }

    /// Drains whatever is already enqueued, then exits once `running` is
    /// cleared and the queue is empty — a task already in flight always
    /// runs to completion before the worker stops.
    async fn run_worker(
        tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
        mut queue_rx: mpsc::UnboundedReceiver<Submission>,
        running: Arc<AtomicBool>,
        stop_signal: Arc<Notify>,
    ) {
        loop {
            if !running.load(Ordering::Acquire) {
                if let Ok(submission) = queue_rx.try_recv() {
                    Self::run_one(&tasks, submission).await;
                    continue;
                }
                break;
            }

            let submission = tokio::select! {
                submission = queue_rx.recv() => submission,
                _ = stop_signal.notified() => continue,
            };

            let Some(submission) = submission else { break };
            Self::run_one(&tasks, submission).await;
        }
        info!("task executor worker loop exited");
    }

    async fn run_one(tasks: &Arc<Mutex<HashMap<String, TaskRecord>>>, submission: Submission) {
        {
            let mut table = tasks.lock();
            if let Some(record) = table.get_mut(&submission.task_id) {
                record.state = TaskState::Running;
                record.updated_at = Utc::now();
            }
        }

        let reporter = ProgressReporter { task_id: submission.task_id.clone(), tasks: tasks.clone() };
        info!(task_id = %submission.task_id, task_type = %submission.task_type, "task started");
        let result = (submission.work)(reporter).await;

        let mut table = tasks.lock();
        if let Some(record) = table.get_mut(&submission.task_id) {
            match result {
                Ok(message) => {
                    record.state = TaskState::Completed;
                    record.progress = 1.0;
                    record.message = message;
                }
                Err(message) => {
                    warn!(task_id = %submission.task_id, %message, "task failed");
                    record.state = TaskState::Failed;
                    record.message = message;
                }
            }
            record.updated_at = Utc::now();
        }
    }

    /// Enqueue `work` and return the new task's id immediately. `work` runs
    /// on the single background worker once every earlier submission has
    /// completed.
    pub fn submit<F, Fut>(&self, task_type: impl Into<String>, target_id: impl Into<String>, work: F) -> String
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let task_type = task_type.into();
        let target_id = target_id.into();
        let now = Utc::now();

        self.tasks.lock().insert(
            task_id.clone(),
            TaskRecord {
                task_id: task_id.clone(),
                task_type: task_type.clone(),
                target_id: target_id.clone(),
                state: TaskState::Pending,
                progress: 0.0,
                message: String::new(),
                created_at: now,
                updated_at: now,
            },
        );

        let boxed: TaskFn = Box::new(move |reporter| Box::pin(work(reporter)));
        // The worker task always outlives this sender (it only exits once
        // every sender clone is dropped), so a send failure here would mean
        // the executor itself has already been torn down.
        if self.queue_tx.send(Submission { task_id: task_id.clone(), task_type, target_id, work: boxed }).is_err() {
            let mut table = self.tasks.lock();
            if let Some(record) = table.get_mut(&task_id) {
                record.state = TaskState::Failed;
                record.message = "task executor is shutting down".to_string();
            }
        }

        task_id
    }

    /// Current state of a task, or a synthetic not-found record.
    pub fn get(&self, task_id: &str) -> TaskRecord {
        self.tasks.lock().get(task_id).cloned().unwrap_or_else(|| TaskRecord::not_found(task_id))
    }

    pub fn list(&self) -> Vec<TaskRecord> {
        self.tasks.lock().values().cloned().collect()
    }

    /// Evict completed/failed tasks older than `max_age_seconds`
    /// (defaulting to [`DEFAULT_CLEANUP_AGE_SECONDS`]). Pending/running
    /// tasks are never evicted regardless of age.
    pub fn cleanup_old_tasks(&self, max_age_seconds: Option<i64>) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age_seconds.unwrap_or(DEFAULT_CLEANUP_AGE_SECONDS));
        let mut table = self.tasks.lock();
        let before = table.len();
        table.retain(|_, record| {
            let terminal = matches!(record.state, TaskState::Completed | TaskState::Failed);
            !(terminal && record.updated_at < cutoff)
        });
        before - table.len()
    }

    /// Cooperative shutdown: clears `running`, wakes the worker, and joins
    /// it. A task already running is allowed to finish; only the queue is
    /// stopped. Idempotent — a second call finds no handle left to join.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.stop_signal.notify_waiters();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "task executor worker did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submitted_task_runs_and_completes() {
        let executor = TaskExecutor::new();
        let task_id = executor.submit("zone_import", "cam-1", |reporter| async move {
            reporter.report(0.5, "halfway");
            Ok("done".to_string())
        });

        for _ in 0..50 {
            let record = executor.get(&task_id);
            if record.state == TaskState::Completed {
                assert_eq!(record.message, "done");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task did not complete in time");
    }

    #[tokio::test]
    async fn tasks_run_in_fifo_order() {
        let executor = TaskExecutor::new();
        let order = Arc::new(Mutex::new(Vec::<u32>::new()));

        for i in 0..5u32 {
            let order = order.clone();
            executor.submit("noop", "target", move |_reporter| async move {
                order.lock().push(i);
                Ok(String::new())
            });
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_task_is_marked_failed() {
        let executor = TaskExecutor::new();
        let task_id = executor.submit("noop", "target", |_reporter| async move { Err("boom".to_string()) });

        for _ in 0..50 {
            let record = executor.get(&task_id);
            if record.state == TaskState::Failed {
                assert_eq!(record.message, "boom");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task did not fail in time");
    }

    #[test]
    fn unknown_task_id_returns_not_found() {
        let executor = TaskExecutor::new();
        let record = executor.get("missing");
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.message, "Task not found");
    }
}
