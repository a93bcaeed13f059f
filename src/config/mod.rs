//! Configuration module.
//!
//! Handles loading of Telegram API credentials, bot settings, rule import
//! files and the tuning knobs of the task queue.

mod rules_file;
mod settings;

pub use rules_file::{RulesFile, RulesFileError};
pub use settings::{BotSettings, ConfigError, QueueSettings, TelegramConfig};

/// Dispatches allowed per rate window.
pub const DEFAULT_MAX_REQUESTS: u32 = 10;

/// Rate window length in seconds.
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Minimum spacing between dispatches in milliseconds.
pub const DEFAULT_TASK_DELAY_MS: u64 = 1000;

/// Retries before a task is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Sleep while the rate window is exhausted, in milliseconds.
pub const DEFAULT_RATE_BACKOFF_MS: u64 = 1000;

/// Pending tasks accepted before enqueue is rejected.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;

/// Delay applied by automation rules that do not configure one, in milliseconds.
pub const DEFAULT_RULE_DELAY_MS: u64 = 1000;
