//! Operations the queue needs from a connected Telegram account.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::TelegramError;

/// Invite links such as `t.me/joinchat/AbC` or `t.me/+AbC`.
#[allow(clippy::expect_used)]
static INVITE_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:joinchat/|\+)([a-zA-Z0-9_-]+)").expect("invite hash pattern is valid")
});

/// Public links such as `https://t.me/rustlang` or `@rustlang`.
#[allow(clippy::expect_used)]
static PUBLIC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:https?://)?(?:t\.me|telegram\.me)/|@)([A-Za-z][A-Za-z0-9_]{3,31})/?$")
        .expect("public link pattern is valid")
});

/// What a `join_group` task should join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteTarget {
    /// Private invite, identified by its hash.
    Hash(String),
    /// Public group or channel, identified by its username.
    Username(String),
}

impl InviteTarget {
    /// Interprets an invite link.
    ///
    /// Private invite links yield their hash, public links and `@name`
    /// references yield the username, and anything else is used verbatim
    /// as an invite hash.
    #[must_use]
    pub fn parse(link: &str) -> Self {
        let link = link.trim();
        if let Some(caps) = INVITE_HASH.captures(link) {
            return Self::Hash(caps[1].to_owned());
        }
        if let Some(caps) = PUBLIC_LINK.captures(link) {
            return Self::Username(caps[1].to_owned());
        }
        Self::Hash(link.to_owned())
    }
}

/// A dialog as returned by `get_dialogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSummary {
    pub id: String,
    pub name: String,
    pub unread_count: i32,
    pub archived: bool,
    pub pinned: bool,
}

/// A message as returned by `get_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub text: String,
    /// Unix timestamp in seconds.
    pub date: i64,
    pub from_id: Option<String>,
    /// Kind of attached media, if any.
    pub media: Option<String>,
}

/// Outcome of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub chat_id: String,
    /// Id of the new message when Telegram reported it.
    pub message_id: Option<i32>,
}

/// A connected account able to perform queued actions.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Whether the account can currently perform requests.
    async fn is_connected(&self) -> bool;

    /// Sends a text message.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SentMessage, TelegramError>;

    /// Forwards messages from one chat to another, returning the new ids.
    async fn forward_messages(
        &self,
        to_chat_id: &str,
        from_chat_id: &str,
        message_ids: &[i32],
    ) -> Result<Vec<i32>, TelegramError>;

    /// Joins a group or channel.
    async fn join_group(&self, target: &InviteTarget) -> Result<(), TelegramError>;

    /// Leaves a group or channel.
    async fn leave_group(&self, chat_id: &str) -> Result<(), TelegramError>;

    /// Lists the account's dialogs.
    async fn get_dialogs(&self) -> Result<Vec<DialogSummary>, TelegramError>;

    /// Fetches history of a chat, newest first.
    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset_id: i32,
    ) -> Result<Vec<MessageSummary>, TelegramError>;
}

/// Connected accounts, keyed by account id (phone number).
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<dyn TelegramApi>>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the client of an account.
    pub async fn insert(&self, account: impl Into<String>, client: Arc<dyn TelegramApi>) {
        self.clients.write().await.insert(account.into(), client);
    }

    /// Removes the client of an account.
    pub async fn remove(&self, account: &str) -> Option<Arc<dyn TelegramApi>> {
        self.clients.write().await.remove(account)
    }

    /// Returns the client of an account if it is registered and connected.
    pub async fn connected(&self, account: &str) -> Result<Arc<dyn TelegramApi>, TelegramError> {
        let client = self
            .clients
            .read()
            .await
            .get(account)
            .cloned()
            .ok_or_else(|| TelegramError::UnknownAccount(account.to_owned()))?;

        if client.is_connected().await {
            Ok(client)
        } else {
            Err(TelegramError::NotConnected(account.to_owned()))
        }
    }

    /// Ids of all registered accounts.
    pub async fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.clients.read().await.keys().cloned().collect();
        accounts.sort();
        accounts
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTelegram;

    #[test]
    fn test_invite_hash_from_joinchat_link() {
        assert_eq!(
            InviteTarget::parse("https://t.me/joinchat/AbC_d-9"),
            InviteTarget::Hash("AbC_d-9".to_owned())
        );
    }

    #[test]
    fn test_invite_hash_from_plus_link() {
        assert_eq!(
            InviteTarget::parse("t.me/+XyZ123"),
            InviteTarget::Hash("XyZ123".to_owned())
        );
    }

    #[test]
    fn test_public_links_resolve_to_username() {
        assert_eq!(
            InviteTarget::parse("https://t.me/rustlang"),
            InviteTarget::Username("rustlang".to_owned())
        );
        assert_eq!(
            InviteTarget::parse("@rustlang"),
            InviteTarget::Username("rustlang".to_owned())
        );
    }

    #[test]
    fn test_opaque_hash_passes_through() {
        assert_eq!(
            InviteTarget::parse("  AAAAAFZxyz  "),
            InviteTarget::Hash("AAAAAFZxyz".to_owned())
        );
    }

    #[tokio::test]
    async fn test_registry_reports_unknown_and_disconnected() {
        let registry = ClientRegistry::new();
        assert!(matches!(
            registry.connected("+1").await,
            Err(TelegramError::UnknownAccount(_))
        ));

        let fake = Arc::new(FakeTelegram::new());
        registry.insert("+1", fake.clone()).await;
        assert!(registry.connected("+1").await.is_ok());

        fake.set_connected(false);
        assert!(matches!(
            registry.connected("+1").await,
            Err(TelegramError::NotConnected(_))
        ));
        assert_eq!(registry.accounts().await, vec!["+1".to_owned()]);
    }
}
