//! Trigger and condition predicates.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::{Conditions, TimeRange, Trigger};

/// Longest regex trigger accepted, in bytes.
pub const MAX_PATTERN_LEN: usize = 500;

/// Upper bound on the compiled size of a regex trigger.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Returns true when any trigger matches, or when there are none.
#[must_use]
pub fn check_triggers(triggers: &[Trigger], text: &str) -> bool {
    if triggers.is_empty() {
        return true;
    }
    if text.is_empty() {
        return false;
    }
    triggers.iter().any(|trigger| trigger_matches(trigger, text))
}

fn trigger_matches(trigger: &Trigger, text: &str) -> bool {
    match trigger {
        Trigger::Keyword { value } => contains_ignore_case(text, value),
        Trigger::Regex { value } => compile_trigger(value).is_some_and(|re| re.is_match(text)),
        Trigger::Exact { value } => text == value,
        Trigger::StartsWith { value } => text.starts_with(value.as_str()),
        Trigger::EndsWith { value } => text.ends_with(value.as_str()),
    }
}

/// Case-insensitive substring test.
#[must_use]
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Compiles a regex trigger, logging and skipping patterns that are invalid or too large.
fn compile_trigger(pattern: &str) -> Option<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        warn!(
            "Skipping regex trigger longer than {} bytes",
            MAX_PATTERN_LEN
        );
        return None;
    }

    match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Skipping invalid regex trigger '{}': {}", pattern, e);
            None
        }
    }
}

/// Context a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub chat_id: &'a str,
    /// Local wall-clock hour, 0-23.
    pub hour: u32,
}

/// One gate of a rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition<'a> {
    /// Hour must fall in `[start, end)`.
    TimeRange(TimeRange),
    /// Chat must not be listed.
    ExcludedChats(&'a [String]),
}

impl Condition<'_> {
    #[must_use]
    pub fn holds(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Self::TimeRange(range) => range.start <= ctx.hour && ctx.hour < range.end,
            Self::ExcludedChats(chats) => !chats.iter().any(|c| c == ctx.chat_id),
        }
    }
}

impl Conditions {
    /// The configured gates, in evaluation order.
    #[must_use]
    pub fn predicates(&self) -> Vec<Condition<'_>> {
        let mut predicates = Vec::new();
        if let Some(range) = self.time_range {
            predicates.push(Condition::TimeRange(range));
        }
        if !self.excluded_chats.is_empty() {
            predicates.push(Condition::ExcludedChats(&self.excluded_chats));
        }
        predicates
    }
}

/// Returns true when every configured condition holds.
#[must_use]
pub fn check_conditions(conditions: &Conditions, ctx: &ConditionContext<'_>) -> bool {
    conditions.predicates().iter().all(|c| c.holds(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword(value: &str) -> Trigger {
        Trigger::Keyword {
            value: value.to_owned(),
        }
    }

    fn regex(value: &str) -> Trigger {
        Trigger::Regex {
            value: value.to_owned(),
        }
    }

    fn ctx(chat_id: &str, hour: u32) -> ConditionContext<'_> {
        ConditionContext { chat_id, hour }
    }

    #[test]
    fn test_keyword_is_case_insensitive_substring() {
        let triggers = [keyword("hello")];
        assert!(check_triggers(&triggers, "Well HELLO there"));
        assert!(!check_triggers(&triggers, "goodbye"));
    }

    #[test]
    fn test_no_triggers_match_everything() {
        assert!(check_triggers(&[], "anything"));
        assert!(check_triggers(&[], ""));
    }

    #[test]
    fn test_empty_text_never_matches_triggers() {
        assert!(!check_triggers(&[keyword("")], ""));
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        assert!(check_triggers(&[regex(r"^order\s+#\d+")], "ORDER #42 please"));
        assert!(!check_triggers(&[regex(r"^order\s+#\d+")], "my order #42"));
    }

    #[test]
    fn test_invalid_regex_is_skipped() {
        let triggers = [regex("(unclosed"), keyword("fallback")];
        assert!(!check_triggers(&triggers[..1], "(unclosed"));
        assert!(check_triggers(&triggers, "use the fallback"));
    }

    #[test]
    fn test_overlong_regex_is_skipped() {
        let pattern = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(!check_triggers(&[regex(&pattern)], &pattern));
    }

    #[test]
    fn test_exact_and_affixes_are_case_sensitive() {
        let exact = [Trigger::Exact {
            value: "Hi".to_owned(),
        }];
        assert!(check_triggers(&exact, "Hi"));
        assert!(!check_triggers(&exact, "hi"));

        let starts = [Trigger::StartsWith {
            value: "/cmd".to_owned(),
        }];
        assert!(check_triggers(&starts, "/cmd run"));
        assert!(!check_triggers(&starts, "/CMD run"));

        let ends = [Trigger::EndsWith {
            value: "?".to_owned(),
        }];
        assert!(check_triggers(&ends, "really?"));
        assert!(!check_triggers(&ends, "really!"));
    }

    #[test]
    fn test_empty_conditions_pass() {
        assert!(check_conditions(&Conditions::default(), &ctx("1", 3)));
    }

    #[test]
    fn test_excluded_chat_fails() {
        let conditions = Conditions {
            time_range: None,
            excluded_chats: vec!["123".to_owned()],
        };
        assert!(!check_conditions(&conditions, &ctx("123", 12)));
        assert!(check_conditions(&conditions, &ctx("124", 12)));
    }

    #[test]
    fn test_time_range_is_half_open() {
        let conditions = Conditions {
            time_range: Some(TimeRange { start: 9, end: 18 }),
            excluded_chats: vec![],
        };
        assert!(!check_conditions(&conditions, &ctx("1", 8)));
        assert!(check_conditions(&conditions, &ctx("1", 9)));
        assert!(check_conditions(&conditions, &ctx("1", 17)));
        assert!(!check_conditions(&conditions, &ctx("1", 18)));
    }

    #[test]
    fn test_predicates_follow_configuration() {
        let conditions = Conditions {
            time_range: Some(TimeRange { start: 0, end: 24 }),
            excluded_chats: vec!["1".to_owned()],
        };
        assert_eq!(conditions.predicates().len(), 2);
        assert!(Conditions::default().predicates().is_empty());
    }
}
