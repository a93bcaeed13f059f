//! Task types and handles.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::QueueError;

/// Storage-assigned task identifier.
pub type TaskId = u64;

/// An outgoing action, with the payload its type requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum TaskKind {
    SendMessage {
        #[serde(alias = "phone")]
        account: String,
        chat_id: String,
        message: String,
    },
    JoinGroup {
        #[serde(alias = "phone")]
        account: String,
        invite_link: String,
    },
    LeaveGroup {
        #[serde(alias = "phone")]
        account: String,
        chat_id: String,
    },
    ForwardMessage {
        #[serde(alias = "phone")]
        account: String,
        from_chat_id: String,
        to_chat_id: String,
        message_ids: Vec<i32>,
    },
    GetDialogs {
        #[serde(alias = "phone")]
        account: String,
    },
    GetMessages {
        #[serde(alias = "phone")]
        account: String,
        chat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset_id: Option<i32>,
    },
}

impl TaskKind {
    /// Wire name of the task type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::JoinGroup { .. } => "join_group",
            Self::LeaveGroup { .. } => "leave_group",
            Self::ForwardMessage { .. } => "forward_message",
            Self::GetDialogs { .. } => "get_dialogs",
            Self::GetMessages { .. } => "get_messages",
        }
    }

    /// Account the task runs on.
    #[must_use]
    pub fn account(&self) -> &str {
        match self {
            Self::SendMessage { account, .. }
            | Self::JoinGroup { account, .. }
            | Self::LeaveGroup { account, .. }
            | Self::ForwardMessage { account, .. }
            | Self::GetDialogs { account }
            | Self::GetMessages { account, .. } => account,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and failed tasks never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Durable record of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(flatten)]
    pub kind: TaskKind,
    pub priority: u32,
    pub retry_count: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outcome delivered through a [`TaskHandle`].
pub type TaskResult = Result<Value, QueueError>;

/// A task waiting in the queue, with the channel resolving its handle.
#[derive(Debug)]
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub priority: u32,
    pub retry_count: u32,
    /// Insertion order; lower runs first among equal priorities.
    pub seq: i64,
    pub reply: oneshot::Sender<TaskResult>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Max-heap order: higher priority first, then earlier sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Resolves once the task completes or exhausts its retries.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) const fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// Id of the underlying task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for the task's terminal outcome.
    pub async fn wait(self) -> TaskResult {
        let id = self.id;
        self.rx.await.unwrap_or(Err(QueueError::Dropped(id)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn queued(priority: u32, seq: i64) -> QueuedTask {
        let (reply, _rx) = oneshot::channel();
        QueuedTask {
            id: 0,
            kind: TaskKind::GetDialogs {
                account: "+1".to_owned(),
            },
            priority,
            retry_count: 0,
            seq,
            reply,
        }
    }

    #[test]
    fn test_heap_orders_by_priority_then_sequence() {
        let mut heap = BinaryHeap::new();
        heap.push(queued(0, 1));
        heap.push(queued(5, 2));
        heap.push(queued(5, 3));
        heap.push(queued(10, 4));
        heap.push(queued(5, -1));

        let order: Vec<(u32, i64)> = std::iter::from_fn(|| heap.pop())
            .map(|t| (t.priority, t.seq))
            .collect();
        assert_eq!(order, vec![(10, 4), (5, -1), (5, 2), (5, 3), (0, 1)]);
    }

    #[test]
    fn test_task_kind_json_accepts_phone_alias() {
        let json = serde_json::json!({
            "type": "send_message",
            "payload": { "phone": "+1", "chatId": "42", "message": "hi" }
        });
        let kind: TaskKind = serde_json::from_value(json).unwrap();
        assert_eq!(
            kind,
            TaskKind::SendMessage {
                account: "+1".to_owned(),
                chat_id: "42".to_owned(),
                message: "hi".to_owned(),
            }
        );
        assert_eq!(kind.name(), "send_message");
        assert_eq!(kind.account(), "+1");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_handle_reports_dropped_sender() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let handle = TaskHandle::new(9, rx);
        assert!(matches!(handle.wait().await, Err(QueueError::Dropped(9))));
    }
}
