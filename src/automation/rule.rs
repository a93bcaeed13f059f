//! Automation rule definitions and validation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::DEFAULT_RULE_DELAY_MS;

/// Storage-assigned rule identifier.
pub type RuleId = i64;

/// Errors raised when a rule definition is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Rule name cannot be empty")]
    EmptyName,

    #[error("auto_reply rules need at least one action")]
    NoActions,

    #[error("auto_reply action {index} has an empty message")]
    EmptyActionMessage { index: usize },

    #[error("auto_forward rules need at least one destination chat")]
    NoDestinations,

    #[error("auto_post rules need a channel id")]
    EmptyChannel,

    #[error("Trigger {index} has an empty value")]
    EmptyTrigger { index: usize },

    #[error("Invalid time range {start}..{end} (hours must be within 0..=24)")]
    InvalidTimeRange { start: u32, end: u32 },
}

/// A predicate over message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    /// Case-insensitive substring.
    Keyword { value: String },
    /// Case-insensitive regular expression.
    Regex { value: String },
    /// Case-sensitive full match.
    Exact { value: String },
    StartsWith { value: String },
    EndsWith { value: String },
}

impl Trigger {
    /// Raw value of the trigger.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Keyword { value }
            | Self::Regex { value }
            | Self::Exact { value }
            | Self::StartsWith { value }
            | Self::EndsWith { value } => value,
        }
    }
}

/// Hour-of-day window, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u32,
    pub end: u32,
}

/// Contextual gates applied before a rule's own filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_chats: Vec<String>,
}

impl Conditions {
    /// True when no condition is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time_range.is_none() && self.excluded_chats.is_empty()
    }
}

/// Template used by auto-post rules without one.
pub const DEFAULT_POST_TEMPLATE: &str = "{message}";

/// Reply sent by an auto-reply rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyAction {
    /// Message template.
    pub message: String,

    /// Fields this crate does not interpret, such as the dashboard's `type`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReplyAction {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoReplyConfig {
    pub triggers: Vec<Trigger>,
    pub actions: Vec<ReplyAction>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
    /// Delay before replying, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoForwardConfig {
    /// Only forward from these chats (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_chats: Vec<String>,
    pub destination_chats: Vec<String>,
    /// Only forward messages containing one of these (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPostConfig {
    /// Only post messages from this chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chat: Option<String>,
    pub channel_id: String,
    /// Post template; [`DEFAULT_POST_TEMPLATE`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Conditions::is_empty")]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutoPostConfig {
    /// Template the post is rendered from.
    #[must_use]
    pub fn template(&self) -> &str {
        self.template.as_deref().unwrap_or(DEFAULT_POST_TEMPLATE)
    }
}

/// Rule type together with its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum RuleKind {
    AutoReply(AutoReplyConfig),
    AutoForward(AutoForwardConfig),
    AutoPost(AutoPostConfig),
}

impl RuleKind {
    /// Wire name of the rule type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AutoReply(_) => "auto_reply",
            Self::AutoForward(_) => "auto_forward",
            Self::AutoPost(_) => "auto_post",
        }
    }

    /// Conditions shared by all rule types.
    #[must_use]
    pub const fn conditions(&self) -> &Conditions {
        match self {
            Self::AutoReply(c) => &c.conditions,
            Self::AutoForward(c) => &c.conditions,
            Self::AutoPost(c) => &c.conditions,
        }
    }

    /// Delay applied before the rule's action; unset or zero means the default.
    #[must_use]
    pub fn delay(&self) -> Duration {
        let ms = match self {
            Self::AutoReply(c) => c.delay,
            Self::AutoForward(c) => c.delay,
            Self::AutoPost(c) => c.delay,
        };
        Duration::from_millis(ms.filter(|&ms| ms > 0).unwrap_or(DEFAULT_RULE_DELAY_MS))
    }

    /// Checks the configuration shape required by the rule type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_conditions(self.conditions())?;

        match self {
            Self::AutoReply(config) => {
                if config.actions.is_empty() {
                    return Err(ValidationError::NoActions);
                }
                if let Some(index) = config.actions.iter().position(|a| a.message.is_empty()) {
                    return Err(ValidationError::EmptyActionMessage { index });
                }
                if let Some(index) = config.triggers.iter().position(|t| t.value().is_empty()) {
                    return Err(ValidationError::EmptyTrigger { index });
                }
            }
            Self::AutoForward(config) => {
                if config.destination_chats.iter().all(|c| c.trim().is_empty()) {
                    return Err(ValidationError::NoDestinations);
                }
            }
            Self::AutoPost(config) => {
                if config.channel_id.trim().is_empty() {
                    return Err(ValidationError::EmptyChannel);
                }
            }
        }

        Ok(())
    }
}

fn validate_conditions(conditions: &Conditions) -> Result<(), ValidationError> {
    if let Some(TimeRange { start, end }) = conditions.time_range
        && (start > 24 || end > 24)
    {
        return Err(ValidationError::InvalidTimeRange { start, end });
    }
    Ok(())
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored automation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    /// Account the rule is bound to; `None` applies to every account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Whether the rule should see events of `account`.
    #[must_use]
    pub fn applies_to(&self, account: &str) -> bool {
        self.account.as_deref().is_none_or(|a| a == account)
    }
}

/// A rule that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RuleDraft {
    /// Creates an enabled draft.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            account: None,
            kind,
            enabled: true,
        }
    }

    /// Auto-reply rule with the default delay.
    #[must_use]
    pub fn auto_reply(
        name: impl Into<String>,
        triggers: Vec<Trigger>,
        actions: Vec<ReplyAction>,
        conditions: Conditions,
    ) -> Self {
        Self::new(
            name,
            RuleKind::AutoReply(AutoReplyConfig {
                triggers,
                actions,
                conditions,
                delay: Some(DEFAULT_RULE_DELAY_MS),
                extra: Map::new(),
            }),
        )
    }

    /// Auto-forward rule with the default delay.
    #[must_use]
    pub fn auto_forward(
        name: impl Into<String>,
        source_chats: Vec<String>,
        destination_chats: Vec<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self::new(
            name,
            RuleKind::AutoForward(AutoForwardConfig {
                source_chats,
                destination_chats,
                keywords,
                conditions: Conditions::default(),
                delay: Some(DEFAULT_RULE_DELAY_MS),
                extra: Map::new(),
            }),
        )
    }

    /// Auto-post rule with the default delay; `template` defaults to `{message}` when rendered.
    #[must_use]
    pub fn auto_post(
        name: impl Into<String>,
        source_chat: Option<String>,
        channel_id: impl Into<String>,
        template: Option<String>,
    ) -> Self {
        Self::new(
            name,
            RuleKind::AutoPost(AutoPostConfig {
                source_chat,
                channel_id: channel_id.into(),
                template,
                conditions: Conditions::default(),
                delay: Some(DEFAULT_RULE_DELAY_MS),
                extra: Map::new(),
            }),
        )
    }

    /// Binds the draft to one account.
    #[must_use]
    pub fn for_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Checks the draft before it is stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_definition(&self.name, &self.kind)
    }
}

/// Checks a rule name together with its configuration.
pub(crate) fn validate_definition(name: &str, kind: &RuleKind) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    kind.validate()
}

/// Partial update of a stored rule; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePatch {
    pub name: Option<String>,
    pub kind: Option<RuleKind>,
    pub enabled: Option<bool>,
}

impl RulePatch {
    /// Applies the patch, returning the updated rule.
    #[must_use]
    pub fn apply(self, mut rule: Rule) -> Rule {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(kind) = self.kind {
            rule.kind = kind;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        rule
    }
}
