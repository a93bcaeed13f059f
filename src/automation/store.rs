//! Rule storage with an in-memory per-account index.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::rule::validate_definition;
use super::{Rule, RuleDraft, RuleId, RulePatch, ValidationError};
use crate::storage::{Storage, StorageError};

/// Errors raised by rule management.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rule {0} not found")]
    NotFound(RuleId),

    #[error("Rule storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Enabled rules grouped by the account they apply to.
#[derive(Debug, Default)]
pub struct RuleIndex {
    /// Rules without an account, applying everywhere.
    global: Vec<Rule>,
    by_account: HashMap<String, Vec<Rule>>,
}

impl RuleIndex {
    fn build(rules: Vec<Rule>) -> Self {
        let mut index = Self::default();
        for rule in rules {
            match &rule.account {
                Some(account) => index
                    .by_account
                    .entry(account.clone())
                    .or_default()
                    .push(rule),
                None => index.global.push(rule),
            }
        }
        index.global.sort_by_key(|r| r.id);
        for rules in index.by_account.values_mut() {
            rules.sort_by_key(|r| r.id);
        }
        index
    }

    /// Enabled rules applying to `account`, in id order.
    #[must_use]
    pub fn rules_for(&self, account: &str) -> Vec<&Rule> {
        let own = self.by_account.get(account).map_or(&[][..], Vec::as_slice);
        let mut rules: Vec<&Rule> = self.global.iter().chain(own).collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Number of enabled rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.global.len() + self.by_account.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Automation rules, persisted in storage and indexed for evaluation.
pub struct RuleStore {
    store: Arc<dyn Storage>,
    index: RwLock<Arc<RuleIndex>>,
}

impl RuleStore {
    /// Creates a store with an empty index; call [`RuleStore::load`] to populate it.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            store,
            index: RwLock::new(Arc::new(RuleIndex::default())),
        }
    }

    /// Rebuilds the index from the enabled rules in storage.
    ///
    /// Storage is read while the index is locked, so concurrent reloads
    /// install their snapshots in the order they were read.
    pub async fn load(&self) -> Result<usize, RuleError> {
        let mut current = self.index.write().await;
        let index = Arc::new(RuleIndex::build(self.store.list_enabled_rules()?));
        let count = index.len();
        *current = index;
        drop(current);
        info!("Loaded {} automation rules", count);
        Ok(count)
    }

    /// Current index snapshot.
    pub async fn index(&self) -> Arc<RuleIndex> {
        Arc::clone(&*self.index.read().await)
    }

    /// Validates and stores a new rule.
    pub async fn create(&self, draft: RuleDraft) -> Result<Rule, RuleError> {
        draft.validate()?;
        let rule = self.store.insert_rule(&draft)?;
        debug!("Created rule {} ({})", rule.id, rule.kind);
        self.load().await?;
        Ok(rule)
    }

    /// Applies a partial update to a rule.
    pub async fn update(&self, id: RuleId, patch: RulePatch) -> Result<Rule, RuleError> {
        let current = self.store.get_rule(id)?.ok_or(RuleError::NotFound(id))?;
        let updated = patch.apply(current);
        validate_definition(&updated.name, &updated.kind)?;
        self.store.update_rule(&updated)?;
        self.load().await?;
        self.store.get_rule(id)?.ok_or(RuleError::NotFound(id))
    }

    /// Deletes a rule.
    pub async fn delete(&self, id: RuleId) -> Result<(), RuleError> {
        if !self.store.delete_rule(id)? {
            return Err(RuleError::NotFound(id));
        }
        debug!("Deleted rule {}", id);
        self.load().await?;
        Ok(())
    }

    /// Flips the enabled flag, returning the new state.
    pub async fn toggle(&self, id: RuleId) -> Result<bool, RuleError> {
        let current = self.store.get_rule(id)?.ok_or(RuleError::NotFound(id))?;
        let enabled = !current.enabled;
        self.set_enabled(id, enabled).await?;
        Ok(enabled)
    }

    /// Enables or disables a rule.
    pub async fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<Rule, RuleError> {
        self.update(
            id,
            RulePatch {
                enabled: Some(enabled),
                ..RulePatch::default()
            },
        )
        .await
    }

    pub fn get(&self, id: RuleId) -> Result<Option<Rule>, RuleError> {
        Ok(self.store.get_rule(id)?)
    }

    /// All rules, newest first.
    pub fn list(&self) -> Result<Vec<Rule>, RuleError> {
        Ok(self.store.list_rules()?)
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Conditions, ReplyAction, RuleKind, Trigger};
    use crate::storage::JsonStore;

    fn store() -> RuleStore {
        RuleStore::new(Arc::new(JsonStore::in_memory()))
    }

    fn reply(name: &str) -> RuleDraft {
        RuleDraft::auto_reply(
            name,
            vec![Trigger::Keyword {
                value: "hello".to_owned(),
            }],
            vec![ReplyAction::new("Hi!")],
            Conditions::default(),
        )
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let rules = store();
        let created = rules.create(reply("greet")).await.unwrap();

        let fetched = rules.get(created.id).ok().flatten();
        let fetched = fetched.unwrap();
        assert_eq!(fetched.name, "greet");
        assert_eq!(fetched.kind, reply("x").kind);
        assert!(fetched.enabled);
    }

    #[tokio::test]
    async fn test_created_config_reads_back_as_sent() {
        let rules = store();
        let configs = [
            serde_json::json!({
                "type": "auto_reply",
                "config": {
                    "triggers": [{ "type": "startsWith", "value": "!" }],
                    "actions": [{ "type": "reply", "message": "Hi {sender}" }],
                    "conditions": { "excludedChats": ["5"] },
                    "delay": 2000
                }
            }),
            serde_json::json!({
                "type": "auto_post",
                "config": { "channelId": "-1001", "sourceChat": "42" }
            }),
        ];

        for (i, input) in configs.into_iter().enumerate() {
            let mut draft = input.clone();
            draft["name"] = serde_json::json!(format!("rule {i}"));
            let draft: RuleDraft = serde_json::from_value(draft).unwrap();

            let created = rules.create(draft).await.unwrap();
            let fetched = rules.get(created.id).unwrap().unwrap();
            assert_eq!(serde_json::to_value(&fetched.kind).unwrap(), input);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_all_reach_index() {
        let rules = Arc::new(store());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let rules = Arc::clone(&rules);
                tokio::spawn(async move { rules.create(reply(&format!("r{i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(rules.index().await.len(), 32);
    }

    #[tokio::test]
    async fn test_invalid_rule_is_not_stored() {
        let rules = store();
        let draft = RuleDraft::auto_post("p", None, " ", None);
        assert!(matches!(
            rules.create(draft).await,
            Err(RuleError::Validation(ValidationError::EmptyChannel))
        ));
        assert!(rules.list().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_index_tracks_mutations() {
        let rules = store();
        let a = rules.create(reply("a")).await.unwrap();
        let b = rules
            .create(reply("b").for_account("+2"))
            .await
            .unwrap();

        let index = rules.index().await;
        assert_eq!(index.rules_for("+1").len(), 1);
        let ids: Vec<RuleId> = index.rules_for("+2").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        assert_eq!(rules.toggle(a.id).await.ok(), Some(false));
        assert!(rules.index().await.rules_for("+1").is_empty());
        // The old snapshot is untouched by the swap.
        assert_eq!(index.len(), 2);

        assert_eq!(rules.toggle(a.id).await.ok(), Some(true));
        rules.delete(b.id).await.unwrap();
        assert_eq!(rules.index().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_unspecified_fields() {
        let rules = store();
        let created = rules.create(reply("greet")).await.unwrap();

        let updated = rules
            .update(
                created.id,
                RulePatch {
                    name: Some("welcome".to_owned()),
                    ..RulePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "welcome");
        assert_eq!(updated.kind, created.kind);
        assert!(updated.enabled);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_validates_new_config() {
        let rules = store();
        let created = rules.create(reply("greet")).await.unwrap();
        let RuleKind::AutoReply(mut config) = created.kind.clone() else {
            panic!("expected auto_reply");
        };
        config.actions.clear();

        let result = rules
            .update(
                created.id,
                RulePatch {
                    kind: Some(RuleKind::AutoReply(config)),
                    ..RulePatch::default()
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(RuleError::Validation(ValidationError::NoActions))
        ));
        assert_eq!(rules.get(created.id).ok().flatten().map(|r| r.kind), Some(created.kind));
    }

    #[tokio::test]
    async fn test_missing_rule() {
        let rules = store();
        assert!(matches!(rules.toggle(9).await, Err(RuleError::NotFound(9))));
        assert!(matches!(rules.delete(9).await, Err(RuleError::NotFound(9))));
    }
}
