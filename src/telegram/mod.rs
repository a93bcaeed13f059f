//! Telegram client wrapper module.
//!
//! Provides the account clients the queue talks to, authentication,
//! chat addressing, update conversion and rate limiting.

mod api;
mod client;
mod peers;
mod rate_limiter;
pub mod updates;

pub use api::{
    ClientRegistry, DialogSummary, InviteTarget, MessageSummary, SentMessage, TelegramApi,
};
pub use client::{TelegramBot, TelegramError, UpdateSink};
pub use grammers_client::client::{LoginToken, PasswordToken};
pub use peers::{ChatRef, InvalidChatRef, peer_to_chat_id};
pub use rate_limiter::{RateLimiter, RateSnapshot};
