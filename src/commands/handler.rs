//! Command handler implementation.

use std::sync::Arc;

use tracing::{debug, info};

use super::types::{BotCommand, CommandResult};
use crate::automation::{RuleError, RuleId, RuleKind, RuleStore};
use crate::queue::{TaskQueue, TaskStatus};
use crate::storage::{ActivityLog, Storage};
use crate::telegram::ClientRegistry;

/// Tasks listed per status by `queue`.
const QUEUE_LISTING_LIMIT: usize = 10;

/// Handles chat commands sent by the account owner.
pub struct CommandHandler {
    /// Command prefix (e.g., "`/autopilot`").
    prefix: String,

    queue: TaskQueue,

    rules: Arc<RuleStore>,

    store: Arc<dyn Storage>,

    activity: ActivityLog,

    clients: Arc<ClientRegistry>,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        prefix: String,
        queue: TaskQueue,
        rules: Arc<RuleStore>,
        store: Arc<dyn Storage>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            prefix,
            queue,
            rules,
            activity: ActivityLog::new(Arc::clone(&store)),
            store,
            clients,
        }
    }

    /// Command prefix this handler reacts to.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(&self, message_text: &str) -> Option<CommandResult> {
        let command = BotCommand::parse(message_text, &self.prefix)?;

        debug!("Handling command: {}", command);
        let result = self.execute(command).await;
        info!("Command result: success={}", result.success);

        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(&self, command: BotCommand) -> CommandResult {
        match command {
            BotCommand::Status => self.handle_status().await,
            BotCommand::Queue => self.handle_queue(),
            BotCommand::Rules => self.handle_rules(),
            BotCommand::Rule(id) => self.handle_rule(id),
            BotCommand::Toggle(id) => self.handle_toggle(id).await,
            BotCommand::Enable(id) => self.handle_set_enabled(id, true).await,
            BotCommand::Disable(id) => self.handle_set_enabled(id, false).await,
            BotCommand::Delete(id) => self.handle_delete(id).await,
            BotCommand::Logs(count) => self.handle_logs(count),
            BotCommand::Clear => self.handle_clear(),
            BotCommand::Reload => self.handle_reload().await,
            BotCommand::Help => self.handle_help(),
            BotCommand::Info => self.handle_info(),
        }
    }

    async fn handle_status(&self) -> CommandResult {
        let status = self.queue.status().await;
        let accounts = self.clients.accounts().await;
        let rules = self.rules.index().await.len();

        let state = if status.processing {
            "▶ Processing"
        } else {
            "⏸ Idle"
        };
        let last = status
            .last_process_time
            .map_or_else(|| "never".to_owned(), |t| t.format("%H:%M:%S").to_string());

        let message = format!(
            "Queue: {state}\n\
             Pending: {}\n\
             Last processed: {last}\n\
             Rate window: {}/{} since {}\n\
             Active rules: {rules}\n\
             Accounts: {}",
            status.pending,
            status.request_count,
            status.max_requests,
            status.window_start.format("%H:%M:%S"),
            accounts.len(),
        );

        CommandResult::success(message)
    }

    fn handle_queue(&self) -> CommandResult {
        let tasks = match self.store.list_tasks(None) {
            Ok(tasks) => tasks,
            Err(e) => return CommandResult::error(format!("Failed to read tasks: {e}")),
        };

        let mut lines = Vec::new();
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Failed,
        ] {
            let matching: Vec<_> = tasks.iter().filter(|t| t.status == status).collect();
            if matching.is_empty() {
                continue;
            }
            lines.push(format!("{} ({}):", status, matching.len()));
            for task in matching.iter().rev().take(QUEUE_LISTING_LIMIT) {
                let error = task
                    .error
                    .as_deref()
                    .map(|e| format!(" - {}", truncate(e, 40)))
                    .unwrap_or_default();
                lines.push(format!(
                    "  #{} {} p{} r{}{error}",
                    task.id, task.kind, task.priority, task.retry_count
                ));
            }
        }

        if lines.is_empty() {
            return CommandResult::success("Queue is empty.");
        }
        CommandResult::success(lines.join("\n"))
    }

    fn handle_rules(&self) -> CommandResult {
        let rules = match self.rules.list() {
            Ok(rules) => rules,
            Err(e) => return CommandResult::error(format!("Failed to read rules: {e}")),
        };

        if rules.is_empty() {
            return CommandResult::error("No automation rules configured.");
        }

        let mut lines = vec!["Automation rules:".to_owned()];
        for rule in rules {
            let marker = if rule.enabled { "●" } else { "○" };
            lines.push(format!(
                "{marker} [{}] {} ({})",
                rule.id,
                truncate(&rule.name, 25),
                rule.kind
            ));
        }

        CommandResult::success(lines.join("\n"))
    }

    fn handle_rule(&self, id: RuleId) -> CommandResult {
        let rule = match self.rules.get(id) {
            Ok(Some(rule)) => rule,
            Ok(None) => return not_found(id),
            Err(e) => return CommandResult::error(format!("Failed to read rule: {e}")),
        };

        let summary = match &rule.kind {
            RuleKind::AutoReply(c) => format!(
                "Triggers: {}\nReply: \"{}\"",
                c.triggers.len(),
                c.actions
                    .first()
                    .map(|a| truncate(&a.message, 40))
                    .unwrap_or_default()
            ),
            RuleKind::AutoForward(c) => format!(
                "Destinations: {}\nKeywords: {}",
                c.destination_chats.join(", "),
                if c.keywords.is_empty() {
                    "any".to_owned()
                } else {
                    c.keywords.join(", ")
                }
            ),
            RuleKind::AutoPost(c) => format!(
                "Channel: {}\nTemplate: \"{}\"",
                c.channel_id,
                truncate(c.template(), 40)
            ),
        };

        let last_run = self.activity.rule_logs(id, 1).first().map_or_else(
            || "never".to_owned(),
            |e| format!("{} [{}]", e.timestamp.format("%m-%d %H:%M:%S"), e.status),
        );

        let message = format!(
            "Rule [{}] {}\n\
             Type: {}\n\
             Account: {}\n\
             Enabled: {}\n\
             Delay: {}ms\n\
             Last run: {last_run}\n\
             {summary}",
            rule.id,
            rule.name,
            rule.kind,
            rule.account.as_deref().unwrap_or("all"),
            if rule.enabled { "yes" } else { "no" },
            rule.kind.delay().as_millis(),
        );
        CommandResult::success(message)
    }

    async fn handle_toggle(&self, id: RuleId) -> CommandResult {
        match self.rules.toggle(id).await {
            Ok(true) => CommandResult::success(format!("✓ Rule [{id}] enabled.")),
            Ok(false) => CommandResult::success(format!("✓ Rule [{id}] disabled.")),
            Err(e) => rule_error(id, &e),
        }
    }

    async fn handle_set_enabled(&self, id: RuleId, enabled: bool) -> CommandResult {
        let verb = if enabled { "enabled" } else { "disabled" };
        match self.rules.set_enabled(id, enabled).await {
            Ok(rule) => CommandResult::success(format!("✓ Rule [{id}] {} {verb}.", rule.name)),
            Err(e) => rule_error(id, &e),
        }
    }

    async fn handle_delete(&self, id: RuleId) -> CommandResult {
        match self.rules.delete(id).await {
            Ok(()) => CommandResult::success(format!("✓ Deleted rule [{id}].")),
            Err(e) => rule_error(id, &e),
        }
    }

    fn handle_logs(&self, count: usize) -> CommandResult {
        let logs = self.activity.automation_logs(count);
        if logs.is_empty() {
            return CommandResult::success("No automation activity yet.");
        }

        let mut lines = vec![format!("Last {} automation records:", logs.len())];
        for entry in logs {
            lines.push(format!(
                "{} {} [{}] {}",
                entry.timestamp.format("%m-%d %H:%M:%S"),
                entry.action,
                entry.status,
                truncate(&entry.details, 40)
            ));
        }
        CommandResult::success(lines.join("\n"))
    }

    fn handle_clear(&self) -> CommandResult {
        match self.queue.clear_completed() {
            Ok(removed) => CommandResult::success(format!("✓ Cleared {removed} completed tasks.")),
            Err(e) => CommandResult::error(format!("Failed to clear tasks: {e}")),
        }
    }

    async fn handle_reload(&self) -> CommandResult {
        match self.rules.load().await {
            Ok(count) => CommandResult::success(format!("✓ Reloaded {count} active rules.")),
            Err(e) => CommandResult::error(format!("Failed to reload: {e}")),
        }
    }

    fn handle_help(&self) -> CommandResult {
        let mut lines = vec![
            format!("Autopilot Commands (prefix: {})", self.prefix),
            String::new(),
        ];

        for (cmd, aliases, desc) in BotCommand::all_commands() {
            let alias_str = if aliases.is_empty() {
                String::new()
            } else {
                format!(" {aliases}")
            };
            lines.push(format!("  {cmd}{alias_str} - {desc}"));
        }

        CommandResult::success(lines.join("\n"))
    }

    #[allow(clippy::unused_self)]
    fn handle_info(&self) -> CommandResult {
        let version = env!("CARGO_PKG_VERSION");
        let message = format!(
            "Telegram Autopilot v{version}\n\
             Rate-limited task queue with auto-reply, auto-forward and auto-post rules."
        );
        CommandResult::success(message)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn not_found(id: RuleId) -> CommandResult {
    CommandResult::error(format!(
        "Rule not found: {id}. Use 'rules' to see available rules."
    ))
}

fn rule_error(id: RuleId, err: &RuleError) -> CommandResult {
    match err {
        RuleError::NotFound(_) => not_found(id),
        other => CommandResult::error(format!("Failed: {other}")),
    }
}

/// Truncates a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}
