//! Sync Queue - process-wide FIFO execution of sync jobs.
//!
//! One worker task drains the queue in enqueue order regardless of the
//! resource a job targets. The queue orders work; mutual exclusion per
//! resource is the lock manager's job.
//!
//! Each job runs under a timeout. A job that waited longer than the maximum
//! task age is rejected as expired without running. A panicking job is
//! reported as a failure and the worker carries on.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{SyncError, SyncResult};

type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, SyncResult<()>> + Send>;

struct QueuedTask {
    id: String,
    resource: String,
    run: TaskFn,
    enqueued_at: Instant,
    done: oneshot::Sender<SyncResult<()>>,
}

struct Shared {
    tasks: Mutex<VecDeque<QueuedTask>>,
    /// Resource of the task currently executing.
    current: Mutex<Option<String>>,
    notify: Notify,
    task_timeout: Duration,
    max_task_age: Duration,
}

/// Single-worker FIFO job queue.
pub struct SyncQueue {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl SyncQueue {
    /// Start the queue and its worker. Must be called inside a tokio runtime.
    pub fn start(task_timeout: Duration, max_task_age: Duration) -> Self {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            notify: Notify::new(),
            task_timeout,
            max_task_age,
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared)));
        Self { shared, worker }
    }

    /// Append a job. The returned future resolves with the job's outcome,
    /// or with a timeout, expiry, or cancellation error.
    ///
    /// The job is queued immediately, before the returned future is polled.
    pub fn enqueue<F, Fut>(&self, resource: &str, task: F) -> impl Future<Output = SyncResult<()>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let queued = QueuedTask {
            id: uuid::Uuid::new_v4().to_string(),
            resource: resource.to_string(),
            run: Box::new(move || task().boxed()),
            enqueued_at: Instant::now(),
            done,
        };

        let depth = {
            let mut tasks = self.shared.tasks.lock();
            tasks.push_back(queued);
            tasks.len()
        };
        self.shared.notify.notify_one();
        tracing::trace!(resource = %resource, depth, "Task enqueued");

        async move { rx.await.unwrap_or(Err(SyncError::QueueClosed)) }
    }

    /// Remove and reject every queued (not yet started) task for a resource.
    ///
    /// The task currently executing is not interrupted.
    pub fn cancel_pending(&self, resource: &str) -> usize {
        let cancelled: Vec<QueuedTask> = {
            let mut tasks = self.shared.tasks.lock();
            let (cancelled, kept): (Vec<_>, Vec<_>) =
                tasks.drain(..).partition(|t| t.resource == resource);
            tasks.extend(kept);
            cancelled
        };

        let count = cancelled.len();
        for task in cancelled {
            let _ = task.done.send(Err(SyncError::Cancelled));
        }
        if count > 0 {
            tracing::debug!(resource = %resource, count, "Cancelled pending tasks");
        }
        count
    }

    /// Whether a task for `resource` is queued or executing.
    pub fn has_pending(&self, resource: &str) -> bool {
        let tasks = self.shared.tasks.lock();
        if tasks.iter().any(|t| t.resource == resource) {
            return true;
        }
        self.shared.current.lock().as_deref() == Some(resource)
    }

    /// Number of queued (not yet started) tasks.
    pub fn len(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a task is executing right now.
    pub fn is_busy(&self) -> bool {
        self.shared.current.lock().is_some()
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut tasks = shared.tasks.lock();
            let next = tasks.pop_front();
            if let Some(task) = &next {
                *shared.current.lock() = Some(task.resource.clone());
            }
            next
        };

        let Some(task) = next else {
            shared.notify.notified().await;
            continue;
        };

        let waited = task.enqueued_at.elapsed();
        if waited > shared.max_task_age {
            tracing::warn!(
                task_id = %task.id,
                resource = %task.resource,
                waited_ms = waited.as_millis() as u64,
                "Task expired before execution"
            );
            *shared.current.lock() = None;
            let _ = task.done.send(Err(SyncError::Expired));
            continue;
        }

        tracing::debug!(task_id = %task.id, resource = %task.resource, "Task started");
        let execution = AssertUnwindSafe((task.run)()).catch_unwind();
        let outcome = match tokio::time::timeout(shared.task_timeout, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => {
                tracing::error!(task_id = %task.id, resource = %task.resource, "Task panicked");
                Err(SyncError::Transport("sync task panicked".to_string()))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    task_id = %task.id,
                    resource = %task.resource,
                    timeout_ms = shared.task_timeout.as_millis() as u64,
                    "Task timed out"
                );
                Err(SyncError::Timeout)
            }
        };

        *shared.current.lock() = None;
        let _ = task.done.send(outcome);
    }
}
