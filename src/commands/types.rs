//! Command types and definitions.

use std::fmt;

use crate::automation::RuleId;

/// Log records shown by `logs` when no count is given.
pub const DEFAULT_LOG_COUNT: usize = 10;

/// Available chat commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Show queue and rate limiter state.
    Status,

    /// Show pending and failed tasks.
    Queue,

    /// List automation rules.
    Rules,

    /// Show one rule in detail.
    Rule(RuleId),

    /// Flip a rule's enabled flag.
    Toggle(RuleId),

    Enable(RuleId),

    Disable(RuleId),

    /// Delete a rule.
    Delete(RuleId),

    /// Show the most recent automation log records.
    Logs(usize),

    /// Delete completed task records.
    Clear,

    /// Rebuild the rule index from storage.
    Reload,

    /// Show help information.
    Help,

    /// Show information about the bot.
    Info,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a valid command.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();
        let after_prefix = text.strip_prefix(prefix)?;

        // "/autopilotx" is not our prefix.
        if after_prefix
            .chars()
            .next()
            .is_some_and(|c| !c.is_whitespace())
        {
            return None;
        }

        let after_prefix = after_prefix.trim_start();
        let (cmd, args) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd.to_lowercase(), Some(args.trim())),
            None => (after_prefix.to_lowercase(), None),
        };

        match cmd.as_str() {
            "status" | "stat" | "s" => Some(Self::Status),
            "queue" | "q" => Some(Self::Queue),
            "rules" | "list" | "ls" => Some(Self::Rules),
            "rule" | "view" | "show" => parse_id(args).map(Self::Rule),
            "toggle" => parse_id(args).map(Self::Toggle),
            "enable" | "on" => parse_id(args).map(Self::Enable),
            "disable" | "off" => parse_id(args).map(Self::Disable),
            "delete" | "remove" | "rm" | "del" => parse_id(args).map(Self::Delete),
            "logs" | "log" => match args.filter(|a| !a.is_empty()) {
                None => Some(Self::Logs(DEFAULT_LOG_COUNT)),
                Some(a) => a.parse().ok().filter(|&n| n > 0).map(Self::Logs),
            },
            "clear" => Some(Self::Clear),
            "reload" | "refresh" => Some(Self::Reload),
            "help" | "h" | "?" => Some(Self::Help),
            "info" | "about" | "version" => Some(Self::Info),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Queue => "queue",
            Self::Rules => "rules",
            Self::Rule(_) => "rule",
            Self::Toggle(_) => "toggle",
            Self::Enable(_) => "enable",
            Self::Disable(_) => "disable",
            Self::Delete(_) => "delete",
            Self::Logs(_) => "logs",
            Self::Clear => "clear",
            Self::Reload => "reload",
            Self::Help => "help",
            Self::Info => "info",
        }
    }

    /// Returns all available commands with their aliases and descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("status", "(s)", "Show queue and rate limit status"),
            ("queue", "(q)", "Show pending and failed tasks"),
            ("rules", "(ls)", "List automation rules"),
            ("rule <id>", "", "Show a rule in detail"),
            ("toggle <id>", "", "Enable or disable a rule"),
            ("enable <id>", "(on)", "Enable a rule"),
            ("disable <id>", "(off)", "Disable a rule"),
            ("delete <id>", "(rm)", "Delete a rule"),
            ("logs [n]", "", "Show recent automation log records"),
            ("clear", "", "Delete completed tasks"),
            ("reload", "", "Reload rules from storage"),
            ("info", "", "Show bot information"),
            ("help", "(h, ?)", "Show this help message"),
        ]
    }
}

fn parse_id(args: Option<&str>) -> Option<RuleId> {
    args?.parse().ok()
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(id)
            | Self::Toggle(id)
            | Self::Enable(id)
            | Self::Disable(id)
            | Self::Delete(id) => write!(f, "{} {id}", self.name()),
            Self::Logs(n) => write!(f, "logs {n}"),
            _ => f.write_str(self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
