//! Maps task kinds onto client operations.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::TaskKind;
use crate::telegram::{ClientRegistry, InviteTarget, TelegramError};

/// Messages fetched by `get_messages` when no limit is given.
const DEFAULT_MESSAGE_LIMIT: u32 = 50;

/// Sent messages remembered for [`SentMessages::contains`].
const SENT_HISTORY: usize = 1024;

/// A message in an account's chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRef {
    pub account: String,
    pub chat_id: String,
    pub message_id: i32,
}

impl SentRef {
    #[must_use]
    pub fn new(account: &str, chat_id: &str, message_id: i32) -> Self {
        Self {
            account: account.to_owned(),
            chat_id: chat_id.to_owned(),
            message_id,
        }
    }

    /// A `@username` chat matches any chat id.
    fn same_message(&self, other: &Self) -> bool {
        self.account == other.account
            && self.message_id == other.message_id
            && (self.chat_id == other.chat_id
                || self.chat_id.starts_with('@')
                || other.chat_id.starts_with('@'))
    }
}

/// Recent messages produced by executed tasks.
#[derive(Debug, Default)]
pub struct SentMessages {
    recent: Mutex<VecDeque<SentRef>>,
}

impl SentMessages {
    pub async fn record(&self, sent: SentRef) {
        let mut recent = self.recent.lock().await;
        if recent.len() == SENT_HISTORY {
            recent.pop_front();
        }
        recent.push_back(sent);
    }

    /// Whether `message` was sent by a queued task.
    pub async fn contains(&self, message: &SentRef) -> bool {
        self.recent
            .lock()
            .await
            .iter()
            .any(|sent| sent.same_message(message))
    }
}

/// Runs tasks against the connected account clients.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    clients: Arc<ClientRegistry>,
    sent: Arc<SentMessages>,
}

impl TaskExecutor {
    #[must_use]
    pub fn new(clients: Arc<ClientRegistry>) -> Self {
        Self {
            clients,
            sent: Arc::new(SentMessages::default()),
        }
    }

    /// Messages this executor has sent or forwarded.
    #[must_use]
    pub fn sent(&self) -> &Arc<SentMessages> {
        &self.sent
    }

    /// Executes one task and shapes its result as JSON.
    pub async fn execute(&self, kind: &TaskKind) -> Result<Value, TelegramError> {
        let client = self.clients.connected(kind.account()).await?;
        debug!("Executing {} on account {}", kind, kind.account());

        match kind {
            TaskKind::SendMessage {
                account,
                chat_id,
                message,
            } => {
                let sent = client.send_message(chat_id, message).await?;
                if let Some(id) = sent.message_id {
                    self.sent.record(SentRef::new(account, &sent.chat_id, id)).await;
                }
                shape(&sent)
            }
            TaskKind::JoinGroup { invite_link, .. } => {
                let target = InviteTarget::parse(invite_link);
                client.join_group(&target).await?;
                Ok(json!({ "joined": invite_link }))
            }
            TaskKind::LeaveGroup { chat_id, .. } => {
                client.leave_group(chat_id).await?;
                Ok(json!({ "left": chat_id }))
            }
            TaskKind::ForwardMessage {
                account,
                from_chat_id,
                to_chat_id,
                message_ids,
            } => {
                let forwarded = client
                    .forward_messages(to_chat_id, from_chat_id, message_ids)
                    .await?;
                for &id in &forwarded {
                    self.sent.record(SentRef::new(account, to_chat_id, id)).await;
                }
                Ok(json!({ "toChatId": to_chat_id, "messageIds": forwarded }))
            }
            TaskKind::GetDialogs { .. } => shape(&client.get_dialogs().await?),
            TaskKind::GetMessages {
                chat_id,
                limit,
                offset_id,
                ..
            } => {
                let messages = client
                    .get_messages(
                        chat_id,
                        limit.unwrap_or(DEFAULT_MESSAGE_LIMIT),
                        offset_id.unwrap_or(0),
                    )
                    .await?;
                shape(&messages)
            }
        }
    }
}

fn shape<T: Serialize>(value: &T) -> Result<Value, TelegramError> {
    serde_json::to_value(value).map_err(|e| TelegramError::Invocation(e.to_string()))
}
