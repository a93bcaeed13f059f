//! Chat identifiers as exchanged with callers.
//!
//! Chats are addressed with bot-API style ids: positive for users,
//! `-<id>` for basic groups and `-100<id>` for channels and supergroups.
//! `@username` references are accepted wherever an id is.

use std::fmt;
use std::str::FromStr;

use grammers_tl_types as tl;

/// Offset applied to channel ids in bot-API notation.
const CHANNEL_PREFIX: &str = "-100";

/// A parsed chat reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatRef {
    User(i64),
    Chat(i64),
    Channel(i64),
    Username(String),
}

impl ChatRef {
    /// Builds a reference from a raw Telegram peer.
    #[must_use]
    pub fn from_peer(peer: &tl::enums::Peer) -> Self {
        match peer {
            tl::enums::Peer::User(p) => Self::User(p.user_id),
            tl::enums::Peer::Chat(p) => Self::Chat(p.chat_id),
            tl::enums::Peer::Channel(p) => Self::Channel(p.channel_id),
        }
    }

    /// Bare numeric id of the peer, if this is not a username.
    #[must_use]
    pub const fn bare_id(&self) -> Option<i64> {
        match self {
            Self::User(id) | Self::Chat(id) | Self::Channel(id) => Some(*id),
            Self::Username(_) => None,
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::Chat(id) => write!(f, "-{id}"),
            Self::Channel(id) => write!(f, "{CHANNEL_PREFIX}{id}"),
            Self::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Error returned for strings that are neither ids nor usernames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid chat reference: '{0}'")]
pub struct InvalidChatRef(pub String);

impl FromStr for ChatRef {
    type Err = InvalidChatRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || InvalidChatRef(s.to_owned());

        if let Some(name) = s.strip_prefix('@') {
            return if is_username(name) {
                Ok(Self::Username(name.to_owned()))
            } else {
                Err(invalid())
            };
        }

        if let Some(rest) = s.strip_prefix(CHANNEL_PREFIX)
            && !rest.is_empty()
            && let Ok(id) = rest.parse::<i64>()
            && id > 0
        {
            return Ok(Self::Channel(id));
        }

        if let Some(rest) = s.strip_prefix('-') {
            return match rest.parse::<i64>() {
                Ok(id) if id > 0 => Ok(Self::Chat(id)),
                _ => Err(invalid()),
            };
        }

        match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self::User(id)),
            Ok(_) => Err(invalid()),
            Err(_) if is_username(s) => Ok(Self::Username(s.to_owned())),
            Err(_) => Err(invalid()),
        }
    }
}

/// Telegram usernames: 4-32 chars, letters, digits and underscores, starting with a letter.
fn is_username(s: &str) -> bool {
    let len = s.chars().count();
    (4..=32).contains(&len)
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Formats a raw Telegram peer as a chat id string.
#[must_use]
pub fn peer_to_chat_id(peer: &tl::enums::Peer) -> String {
    ChatRef::from_peer(peer).to_string()
}
