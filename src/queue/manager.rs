//! Priority queue with a rate-limited drain loop.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::task::QueuedTask;
use super::{QueueError, SentMessages, TaskExecutor, TaskHandle, TaskId, TaskKind, TaskStatus};
use crate::config::QueueSettings;
use crate::storage::{ActivityLog, LogStatus, Storage};
use crate::telegram::{RateLimiter, TelegramError};

/// Queue metrics for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub pending: usize,
    /// Whether a task is being executed right now.
    pub processing: bool,
    pub last_process_time: Option<DateTime<Utc>>,
    pub request_count: u32,
    pub max_requests: u32,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedTask>,

    /// A drain loop is running.
    draining: bool,

    /// No new tasks are accepted.
    closed: bool,

    /// Sequence handed to the next enqueued task.
    next_seq: i64,

    /// Sequence handed to the next retried task; decreases so retries run first.
    front_seq: i64,

    processing: bool,

    last_dispatch: Option<Instant>,

    last_process_time: Option<DateTime<Utc>>,
}

struct Inner {
    state: Mutex<QueueState>,
    limiter: Arc<RateLimiter>,
    executor: TaskExecutor,
    store: Arc<dyn Storage>,
    activity: ActivityLog,
    settings: QueueSettings,
    /// Signalled whenever the drain loop stops.
    idle: Notify,
}

/// Persistent priority queue of outgoing tasks.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Creates a queue with its own rate limiter.
    #[must_use]
    pub fn new(executor: TaskExecutor, store: Arc<dyn Storage>, settings: QueueSettings) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.window(), settings.max_requests));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                limiter,
                executor,
                activity: ActivityLog::new(Arc::clone(&store)),
                store,
                settings,
                idle: Notify::new(),
            }),
        }
    }

    /// Messages produced by this queue's tasks.
    #[must_use]
    pub fn sent_messages(&self) -> &SentMessages {
        self.inner.executor.sent()
    }

    /// Rate limiter gating the drain loop.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// Persists a task and schedules it for execution.
    ///
    /// The returned handle resolves once the task completes or exhausts
    /// its retries.
    pub async fn enqueue(&self, kind: TaskKind, priority: u32) -> Result<TaskHandle, QueueError> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.heap.len() >= self.inner.settings.max_depth {
            warn!("Rejecting {} task, queue is full", kind);
            return Err(QueueError::Full {
                capacity: self.inner.settings.max_depth,
            });
        }

        let record = self.inner.store.insert_task(&kind, priority)?;
        let (reply, rx) = oneshot::channel();

        debug!("Queued task {} ({}) with priority {}", record.id, kind, priority);
        state.next_seq += 1;
        let seq = state.next_seq;
        state.heap.push(QueuedTask {
            id: record.id,
            kind,
            priority,
            retry_count: 0,
            seq,
            reply,
        });

        if !state.draining {
            state.draining = true;
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        Ok(TaskHandle::new(record.id, rx))
    }

    /// Current queue and rate window metrics.
    pub async fn status(&self) -> QueueStatus {
        let (pending, processing, last_process_time) = {
            let state = self.inner.state.lock().await;
            (state.heap.len(), state.processing, state.last_process_time)
        };
        let rate = self.inner.limiter.snapshot().await;

        QueueStatus {
            pending,
            processing,
            last_process_time,
            request_count: rate.request_count,
            max_requests: rate.max_requests,
            window_start: rate.window_start,
        }
    }

    /// Deletes completed task records, returning how many were removed.
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        let removed = self.inner.store.clear_completed_tasks()?;
        info!("Cleared {} completed tasks", removed);
        Ok(removed)
    }

    /// Stops accepting new tasks; queued work keeps draining.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        info!("Task queue closed");
    }

    /// Waits until the drain loop has stopped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.inner.state.lock().await.draining {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// Runs queued tasks until the heap is empty.
async fn drain(inner: Arc<Inner>) {
    debug!("Drain loop started");

    loop {
        {
            // The flag is cleared under the same guard that saw the empty
            // heap, so a concurrent enqueue either lands before this check
            // or starts a new loop.
            let mut state = inner.state.lock().await;
            if state.heap.is_empty() {
                state.draining = false;
                break;
            }
        }

        if !inner.limiter.admit().await {
            debug!("Rate window exhausted, backing off");
            tokio::time::sleep(inner.settings.backoff()).await;
            continue;
        }

        let last_dispatch = inner.state.lock().await.last_dispatch;
        if let Some(last) = last_dispatch {
            let wait = inner.settings.task_delay().saturating_sub(last.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let task = {
            let mut state = inner.state.lock().await;
            let Some(task) = state.heap.pop() else {
                state.draining = false;
                break;
            };
            state.processing = true;
            state.last_dispatch = Some(Instant::now());
            task
        };

        inner.execute(task).await;

        let mut state = inner.state.lock().await;
        state.processing = false;
        state.last_process_time = Some(Utc::now());
    }

    inner.idle.notify_waiters();
    debug!("Drain loop stopped");
}

impl Inner {
    async fn execute(&self, mut task: QueuedTask) {
        self.set_status(task.id, TaskStatus::Processing, None);

        let err = match self.executor.execute(&task.kind).await {
            Ok(value) => {
                info!("Task {} ({}) completed", task.id, task.kind);
                self.set_status(task.id, TaskStatus::Completed, None);
                self.activity.task(
                    task.kind.name(),
                    LogStatus::Success,
                    &format!("task {} completed", task.id),
                );
                let _ = task.reply.send(Ok(value));
                return;
            }
            Err(err) => err,
        };

        if let TelegramError::FloodWait(seconds) = &err {
            self.limiter
                .hold_for(Duration::from_secs(u64::from(*seconds)))
                .await;
        }

        if task.retry_count < self.settings.max_retries {
            task.retry_count += 1;
            task.priority = task.priority.saturating_sub(1);
            warn!(
                "Task {} ({}) failed, retry {}/{}: {}",
                task.id, task.kind, task.retry_count, self.settings.max_retries, err
            );
            if let Err(e) =
                self.store
                    .record_retry(task.id, task.retry_count, task.priority, &err.to_string())
            {
                warn!("Failed to record retry of task {}: {}", task.id, e);
            }

            let mut state = self.state.lock().await;
            state.front_seq -= 1;
            task.seq = state.front_seq;
            state.heap.push(task);
            return;
        }

        error!(
            "Task {} ({}) failed after {} attempts: {}",
            task.id,
            task.kind,
            task.retry_count + 1,
            err
        );
        let message = err.to_string();
        self.set_status(task.id, TaskStatus::Failed, Some(&message));
        self.activity.task(
            task.kind.name(),
            LogStatus::Error,
            &format!("task {}: {}", task.id, message),
        );
        let _ = task.reply.send(Err(QueueError::Failed {
            id: task.id,
            kind: task.kind.name(),
            attempts: task.retry_count + 1,
            source: err,
        }));
    }

    fn set_status(&self, id: TaskId, status: TaskStatus, error: Option<&str>) {
        if let Err(e) = self.store.update_task_status(id, status, error) {
            warn!("Failed to mark task {} as {}: {}", id, status, e);
        }
    }
}
