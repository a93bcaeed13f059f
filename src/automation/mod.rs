//! Automation rules: auto-reply, auto-forward and auto-post.
//!
//! Rules are kept in storage and mirrored into an in-memory index that the
//! [`AutomationEvaluator`] consults for every inbound message. A rule that
//! fires produces queued tasks after its delay.

mod evaluator;
pub mod matching;
mod rule;
mod store;
pub mod template;

pub use evaluator::{AUTOMATION_PRIORITY, AutomationEvaluator, PlannedAction, PlannedTask, plan};
pub use rule::{
    AutoForwardConfig, AutoPostConfig, AutoReplyConfig, Conditions, DEFAULT_POST_TEMPLATE,
    ReplyAction, Rule, RuleDraft, RuleId, RuleKind, RulePatch, TimeRange, Trigger,
    ValidationError,
};
pub use store::{RuleError, RuleIndex, RuleStore};
