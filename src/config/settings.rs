//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_MAX_REQUESTS, DEFAULT_MAX_RETRIES, DEFAULT_RATE_BACKOFF_MS,
    DEFAULT_RATE_WINDOW_SECS, DEFAULT_TASK_DELAY_MS,
};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Directory holding one session file per account.
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,

    /// Phone numbers of the accounts to connect.
    #[serde(default)]
    pub accounts: Vec<String>,
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            session_dir: default_session_dir(),
            accounts: Vec::new(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID`, `TG_API_HASH` and `TG_ACCOUNTS` to be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_dir =
            std::env::var("TG_SESSION_DIR").map_or_else(|_| default_session_dir(), PathBuf::from);

        let accounts = parse_accounts(
            &std::env::var("TG_ACCOUNTS").map_err(|_| ConfigError::MissingEnvVar("TG_ACCOUNTS"))?,
        );
        if accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        Ok(Self {
            api_id,
            api_hash,
            session_dir,
            accounts,
        })
    }

    /// Returns the session file used for the given account.
    #[must_use]
    pub fn session_path(&self, phone: &str) -> PathBuf {
        let file: String = phone.chars().filter(char::is_ascii_digit).collect();
        self.session_dir.join(format!("{file}.session"))
    }
}

/// Splits a comma separated account list, dropping blanks.
fn parse_accounts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Task queue and rate limiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum dispatches per rate window.
    pub max_requests: u32,

    /// Length of the rate window in seconds.
    pub window_secs: u64,

    /// Minimum spacing between two dispatches in milliseconds.
    pub task_delay_ms: u64,

    /// Retries granted to a failing task before it is marked failed.
    pub max_retries: u32,

    /// Wait before re-checking a denied rate window, in milliseconds.
    pub backoff_ms: u64,

    /// Pending tasks accepted before enqueue is rejected.
    pub max_depth: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
            task_delay_ms: DEFAULT_TASK_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_ms: DEFAULT_RATE_BACKOFF_MS,
            max_depth: DEFAULT_MAX_QUEUE_DEPTH,
        }
    }
}

impl QueueSettings {
    /// Creates queue settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        let defaults = Self::default();
        Self {
            max_requests: env_or("RATE_LIMIT", defaults.max_requests),
            window_secs: env_or("RATE_WINDOW_SECS", defaults.window_secs),
            task_delay_ms: env_or("TASK_DELAY_MS", defaults.task_delay_ms),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            backoff_ms: env_or("RATE_BACKOFF_MS", defaults.backoff_ms),
            max_depth: env_or("QUEUE_MAX_DEPTH", defaults.max_depth),
        }
        .sanitized()
    }

    /// Replaces zero limits, which would stall or disable the queue, with defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_requests == 0 {
            warn!("RATE_LIMIT must be positive, using {}", defaults.max_requests);
            self.max_requests = defaults.max_requests;
        }
        if self.window_secs == 0 {
            warn!("RATE_WINDOW_SECS must be positive, using {}", defaults.window_secs);
            self.window_secs = defaults.window_secs;
        }
        if self.max_depth == 0 {
            warn!("QUEUE_MAX_DEPTH must be positive, using {}", defaults.max_depth);
            self.max_depth = defaults.max_depth;
        }
        self
    }

    /// Rate window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Minimum spacing between dispatches.
    #[must_use]
    pub const fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }

    /// Backoff used while the rate window is exhausted.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Path of the JSON data store.
    pub data_path: PathBuf,

    /// Command prefix for chat commands.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_command_prefix() -> String {
    "/autopilot".to_owned()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/autopilot.json")
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            command_prefix: default_command_prefix(),
            log_level: default_log_level(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            data_path: std::env::var("DATA_PATH").map_or_else(|_| default_data_path(), PathBuf::from),
            command_prefix: std::env::var("COMMAND_PREFIX")
                .unwrap_or_else(|_| default_command_prefix()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level()),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("TG_ACCOUNTS does not list any account")]
    NoAccounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BotSettings::default();
        assert_eq!(settings.command_prefix, "/autopilot");
        assert_eq!(settings.data_path, PathBuf::from("data/autopilot.json"));
    }

    #[test]
    fn test_default_queue_settings() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_requests, 10);
        assert_eq!(settings.window(), Duration::from_secs(60));
        assert_eq!(settings.task_delay(), Duration::from_millis(1000));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_limits_fall_back_to_defaults() {
        let settings = QueueSettings {
            max_requests: 0,
            window_secs: 0,
            max_depth: 0,
            task_delay_ms: 0,
            ..QueueSettings::default()
        }
        .sanitized();
        assert_eq!(settings.max_requests, 10);
        assert_eq!(settings.window(), Duration::from_secs(60));
        assert_eq!(settings.max_depth, 1000);
        // No spacing between dispatches is a valid choice.
        assert_eq!(settings.task_delay_ms, 0);
    }

    #[test]
    fn test_telegram_config_new() {
        let config = TelegramConfig::new(12345, "abc123".to_owned());
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.api_hash, "abc123");
        assert_eq!(config.session_dir, PathBuf::from("sessions"));
    }

    #[test]
    fn test_session_path_uses_digits_only() {
        let config = TelegramConfig::new(1, "h".to_owned());
        assert_eq!(
            config.session_path("+1 (555) 010-99"),
            PathBuf::from("sessions/155501099.session")
        );
    }

    #[test]
    fn test_parse_accounts() {
        assert_eq!(parse_accounts("+1, +2,,  "), vec!["+1", "+2"]);
        assert!(parse_accounts(" , ").is_empty());
    }
}
