//! Rule import files.
//!
//! A rules file is a JSON document holding rule drafts, used to seed the
//! rule store and checked offline by `validate_rules`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::automation::{
    Conditions, ReplyAction, RuleDraft, TimeRange, Trigger, ValidationError,
};

/// Errors raised while loading or checking a rules file.
#[derive(Debug, Error)]
pub enum RulesFileError {
    #[error("Rule at index {index} ({name:?}) is invalid: {source}")]
    Invalid {
        index: usize,
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("Duplicate rule name found: {name}")]
    DuplicateName { name: String },

    #[error("No rules defined")]
    NoRules,

    #[error("Failed to read rules file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse rules file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Contents of a rules file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesFile {
    pub rules: Vec<RuleDraft>,
}

impl RulesFile {
    /// Loads rules from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RulesFileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves rules to a JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), RulesFileError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates every rule, returning the first error.
    pub fn validate(&self) -> Result<(), RulesFileError> {
        self.validate_all().into_iter().next().map_or(Ok(()), Err)
    }

    /// Validates every rule, collecting all errors.
    #[must_use]
    pub fn validate_all(&self) -> Vec<RulesFileError> {
        if self.rules.is_empty() {
            return vec![RulesFileError::NoRules];
        }

        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (index, rule) in self.rules.iter().enumerate() {
            if let Err(source) = rule.validate() {
                errors.push(RulesFileError::Invalid {
                    index,
                    name: rule.name.clone(),
                    source,
                });
            }
            // Names must be unique per account.
            if !seen.insert((rule.account.as_deref(), rule.name.as_str())) {
                errors.push(RulesFileError::DuplicateName {
                    name: rule.name.clone(),
                });
            }
        }
        errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// One rule of each kind, for `--generate-rules`.
    #[must_use]
    pub fn example() -> Self {
        Self {
            rules: vec![
                RuleDraft::auto_reply(
                    "Office hours greeting",
                    vec![
                        Trigger::Keyword {
                            value: "hello".to_owned(),
                        },
                        Trigger::Regex {
                            value: r"^hi\b".to_owned(),
                        },
                    ],
                    vec![ReplyAction::new("Hi {sender}, I'll get back to you soon ({time}).")],
                    Conditions {
                        time_range: Some(TimeRange { start: 9, end: 18 }),
                        excluded_chats: Vec::new(),
                    },
                ),
                RuleDraft::auto_forward(
                    "Forward releases",
                    vec!["-1001234567890".to_owned()],
                    vec!["@my_archive".to_owned()],
                    vec!["release".to_owned()],
                ),
                RuleDraft::auto_post(
                    "Repost notes",
                    Some("-4242".to_owned()),
                    "-1009876543210",
                    Some("{message}\n\nPosted {date}".to_owned()),
                ),
            ],
        }
    }
}
