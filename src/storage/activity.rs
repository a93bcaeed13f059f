//! Best-effort execution log.

use std::sync::Arc;

use tracing::warn;

use super::{LogEntry, LogStatus, Storage};
use crate::automation::RuleId;

/// Action prefix of automation rule records.
pub const RULE_LOG_PREFIX: &str = "automation_rule_";

/// Action prefix of task records.
pub const TASK_LOG_PREFIX: &str = "task_";

/// Appends execution records, never failing the caller.
#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn Storage>,
}

impl ActivityLog {
    #[must_use]
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Records an action; storage failures are logged and dropped.
    pub fn record(&self, action: &str, status: LogStatus, details: &str) {
        if let Err(e) = self.store.append_log(action, status, details) {
            warn!("Failed to write execution log for {}: {}", action, e);
        }
    }

    /// Records the outcome of an automation rule.
    pub fn rule(&self, id: RuleId, status: LogStatus, details: &str) {
        self.record(&format!("{RULE_LOG_PREFIX}{id}"), status, details);
    }

    /// Records the outcome of a queued task.
    pub fn task(&self, kind: &str, status: LogStatus, details: &str) {
        self.record(&format!("{TASK_LOG_PREFIX}{kind}"), status, details);
    }

    /// Most recent records of one rule, newest first.
    pub fn rule_logs(&self, id: RuleId, limit: usize) -> Vec<LogEntry> {
        self.store
            .query_action_logs(&format!("{RULE_LOG_PREFIX}{id}"), limit)
            .unwrap_or_else(|e| {
                warn!("Failed to read logs of rule {}: {}", id, e);
                Vec::new()
            })
    }

    /// Most recent automation records, newest first.
    pub fn automation_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.store
            .query_logs(RULE_LOG_PREFIX, limit)
            .unwrap_or_else(|e| {
                warn!("Failed to read automation logs: {}", e);
                Vec::new()
            })
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog").finish_non_exhaustive()
    }
}
