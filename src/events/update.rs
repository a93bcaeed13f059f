//! Update and event types flowing through the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaInfo {
    Photo {
        photo_id: Option<String>,
    },
    Document {
        document_id: Option<String>,
        mime_type: Option<String>,
        file_name: Option<String>,
    },
    Geo {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        phone: String,
        first_name: String,
        last_name: String,
    },
    /// Any other media kind, by name.
    Other {
        kind: String,
    },
}

/// Fields extracted from a new or edited message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub chat_id: String,
    pub message_id: i32,
    pub sender_id: Option<String>,
    pub text: String,
    /// Unix timestamp (seconds) the message was sent at.
    pub date: i64,
    pub media: Option<MediaInfo>,
    /// Sent by the account itself.
    pub outgoing: bool,
}

/// A raw update from Telegram, classified by provider kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderUpdate {
    NewMessage(MessageUpdate),
    NewChannelMessage(MessageUpdate),
    EditMessage(MessageUpdate),
    EditChannelMessage(MessageUpdate),
    DeleteMessages {
        message_ids: Vec<i32>,
    },
    DeleteChannelMessages {
        chat_id: String,
        message_ids: Vec<i32>,
    },
    UserStatus {
        user_id: String,
        status: String,
        was_online: Option<i64>,
    },
    UserTyping {
        user_id: String,
        action: String,
    },
    ChatUserTyping {
        chat_id: String,
        user_id: Option<String>,
        action: String,
    },
}

impl ProviderUpdate {
    /// Provider name of the update kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "UpdateNewMessage",
            Self::NewChannelMessage(_) => "UpdateNewChannelMessage",
            Self::EditMessage(_) => "UpdateEditMessage",
            Self::EditChannelMessage(_) => "UpdateEditChannelMessage",
            Self::DeleteMessages { .. } => "UpdateDeleteMessages",
            Self::DeleteChannelMessages { .. } => "UpdateDeleteChannelMessages",
            Self::UserStatus { .. } => "UpdateUserStatus",
            Self::UserTyping { .. } => "UpdateUserTyping",
            Self::ChatUserTyping { .. } => "UpdateChatUserTyping",
        }
    }
}

/// A new inbound message, as seen by automation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub account_id: String,
    pub chat_id: String,
    pub message_id: i32,
    pub sender_id: Option<String>,
    pub text: String,
    pub media: Option<MediaInfo>,
    pub timestamp: DateTime<Utc>,
    /// Sent by the account itself.
    #[serde(default)]
    pub outgoing: bool,
}

impl InboundEvent {
    /// Builds the event for a new message received by `account_id`.
    #[must_use]
    pub fn from_message(account_id: &str, message: &MessageUpdate) -> Self {
        Self {
            account_id: account_id.to_owned(),
            chat_id: message.chat_id.clone(),
            message_id: message.message_id,
            sender_id: message.sender_id.clone(),
            text: message.text.clone(),
            media: message.media.clone(),
            timestamp: DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
            outgoing: message.outgoing,
        }
    }
}

/// Events pushed to realtime subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Message(InboundEvent),
    MessageEdit {
        account_id: String,
        chat_id: String,
        message_id: i32,
        text: String,
        timestamp: DateTime<Utc>,
    },
    MessageDelete {
        account_id: String,
        chat_id: Option<String>,
        message_ids: Vec<i32>,
        timestamp: DateTime<Utc>,
    },
    UserStatus {
        account_id: String,
        user_id: String,
        status: String,
        was_online: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    ChatAction {
        account_id: String,
        chat_id: Option<String>,
        user_id: Option<String>,
        action: String,
        timestamp: DateTime<Utc>,
    },
}
