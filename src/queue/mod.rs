//! Outgoing task queue.
//!
//! Every outgoing action goes through [`TaskQueue`]: it is persisted,
//! ordered by priority, admitted by the rate limiter, executed against the
//! account's client and retried with decaying priority when it fails.

mod executor;
mod manager;
mod task;

use thiserror::Error;

use crate::storage::StorageError;
use crate::telegram::TelegramError;

pub use executor::{SentMessages, SentRef, TaskExecutor};
pub use manager::{QueueStatus, TaskQueue};
pub use task::{TaskHandle, TaskId, TaskKind, TaskRecord, TaskResult, TaskStatus};

/// Errors surfaced by the task queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task queue is full ({capacity} pending tasks)")]
    Full { capacity: usize },

    #[error("Task queue is shutting down")]
    Closed,

    #[error("Failed to persist task: {0}")]
    Storage(#[from] StorageError),

    #[error("Task {id} ({kind}) failed after {attempts} attempts: {source}")]
    Failed {
        id: TaskId,
        kind: &'static str,
        attempts: u32,
        #[source]
        source: TelegramError,
    },

    #[error("Task {0} was dropped before completing")]
    Dropped(TaskId),
}
