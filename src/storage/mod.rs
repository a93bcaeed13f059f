//! Durable records: tasks, automation rules and the execution log.
//!
//! The queue and the automation engine talk to storage through the
//! [`Storage`] trait. [`JsonStore`] keeps everything in a single JSON
//! document, saved to disk in the background, which is plenty for one
//! process driving a handful of accounts.

mod activity;
mod json;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::automation::{Rule, RuleDraft, RuleId};
use crate::queue::{TaskId, TaskKind, TaskRecord, TaskStatus};

pub use activity::{ActivityLog, RULE_LOG_PREFIX, TASK_LOG_PREFIX};
pub use json::JsonStore;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode data file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Rule {0} not found")]
    RuleNotFound(RuleId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Outcome recorded in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// One execution log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    /// What ran, e.g. `automation_rule_3` or `task_send_message`.
    pub action: String,
    pub status: LogStatus,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Storage backend used by the queue and the automation engine.
pub trait Storage: Send + Sync {
    /// Persists a new pending task and returns its record.
    fn insert_task(&self, kind: &TaskKind, priority: u32) -> Result<TaskRecord, StorageError>;

    /// Moves a task to `status`, recording the error message of a failure.
    fn update_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Puts a task back to pending after a failed attempt.
    fn record_retry(
        &self,
        id: TaskId,
        retry_count: u32,
        priority: u32,
        error: &str,
    ) -> Result<(), StorageError>;

    fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StorageError>;

    /// Lists tasks, optionally filtered by status, oldest first.
    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StorageError>;

    /// Deletes completed tasks, returning how many were removed.
    fn clear_completed_tasks(&self) -> Result<usize, StorageError>;

    /// Marks tasks left pending or processing by a previous process as failed.
    fn fail_interrupted_tasks(&self) -> Result<usize, StorageError>;

    /// Stores a new rule and returns it with its id.
    fn insert_rule(&self, draft: &RuleDraft) -> Result<Rule, StorageError>;

    /// Replaces a stored rule.
    fn update_rule(&self, rule: &Rule) -> Result<(), StorageError>;

    /// Deletes a rule, returning whether it existed.
    fn delete_rule(&self, id: RuleId) -> Result<bool, StorageError>;

    fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, StorageError>;

    /// Lists all rules, newest first.
    fn list_rules(&self) -> Result<Vec<Rule>, StorageError>;

    /// Lists enabled rules in id order.
    fn list_enabled_rules(&self) -> Result<Vec<Rule>, StorageError>;

    /// Appends an execution log record.
    fn append_log(
        &self,
        action: &str,
        status: LogStatus,
        details: &str,
    ) -> Result<LogEntry, StorageError>;

    /// Returns up to `limit` log records whose action starts with `prefix`, newest first.
    fn query_logs(&self, prefix: &str, limit: usize) -> Result<Vec<LogEntry>, StorageError>;

    /// Returns up to `limit` log records of exactly `action`, newest first.
    fn query_action_logs(&self, action: &str, limit: usize)
    -> Result<Vec<LogEntry>, StorageError>;

    /// Blocks until every change so far is durable.
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
