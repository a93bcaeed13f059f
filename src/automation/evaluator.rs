//! Matches inbound events against automation rules.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::matching::{ConditionContext, check_conditions, check_triggers, contains_ignore_case};
use super::template::render;
use super::{Rule, RuleId, RuleKind, RuleStore};
use crate::events::InboundEvent;
use crate::queue::{SentRef, TaskKind, TaskQueue};
use crate::storage::{ActivityLog, LogStatus};

/// Queue priority of tasks produced by rules.
pub const AUTOMATION_PRIORITY: u32 = 1;

/// A task produced by a rule, with a description for the execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub kind: TaskKind,
    pub description: String,
}

/// What a matching rule will do once its delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub delay: Duration,
    pub tasks: Vec<PlannedTask>,
}

/// Decides whether `rule` fires for `event` and what it produces.
#[must_use]
pub fn plan(rule: &Rule, event: &InboundEvent, now: DateTime<Local>) -> Option<PlannedAction> {
    let ctx = ConditionContext {
        chat_id: &event.chat_id,
        hour: now.hour(),
    };
    if !check_conditions(rule.kind.conditions(), &ctx) {
        return None;
    }

    let account = event.account_id.clone();
    let tasks = match &rule.kind {
        RuleKind::AutoReply(config) => {
            if !check_triggers(&config.triggers, &event.text) {
                return None;
            }
            let action = config.actions.first()?;
            vec![PlannedTask {
                kind: TaskKind::SendMessage {
                    account,
                    chat_id: event.chat_id.clone(),
                    message: render(&action.message, event, now),
                },
                description: format!("Replied to {}", event.chat_id),
            }]
        }
        RuleKind::AutoForward(config) => {
            if !config.source_chats.is_empty() && !config.source_chats.contains(&event.chat_id) {
                return None;
            }
            if !config.keywords.is_empty()
                && !config
                    .keywords
                    .iter()
                    .any(|kw| contains_ignore_case(&event.text, kw))
            {
                return None;
            }
            config
                .destination_chats
                .iter()
                .map(|dest| PlannedTask {
                    kind: TaskKind::ForwardMessage {
                        account: account.clone(),
                        from_chat_id: event.chat_id.clone(),
                        to_chat_id: dest.clone(),
                        message_ids: vec![event.message_id],
                    },
                    description: format!("Forwarded to {dest}"),
                })
                .collect()
        }
        RuleKind::AutoPost(config) => {
            if config
                .source_chat
                .as_ref()
                .is_some_and(|source| *source != event.chat_id)
            {
                return None;
            }
            vec![PlannedTask {
                kind: TaskKind::SendMessage {
                    account,
                    chat_id: config.channel_id.clone(),
                    message: render(config.template(), event, now),
                },
                description: format!("Posted to {}", config.channel_id),
            }]
        }
    };

    Some(PlannedAction {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        delay: rule.kind.delay(),
        tasks,
    })
}

/// Runs automation rules for inbound events.
#[derive(Debug, Clone)]
pub struct AutomationEvaluator {
    rules: Arc<RuleStore>,
    queue: TaskQueue,
    activity: ActivityLog,
}

impl AutomationEvaluator {
    #[must_use]
    pub const fn new(rules: Arc<RuleStore>, queue: TaskQueue, activity: ActivityLog) -> Self {
        Self {
            rules,
            queue,
            activity,
        }
    }

    /// Evaluates an event in the background.
    ///
    /// The returned handle completes once every fired rule has finished;
    /// callers are free to drop it.
    pub fn evaluate(&self, event: InboundEvent) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let actions = this.spawn_actions(&event).await;
            for action in actions {
                if let Err(e) = action.await {
                    warn!("Automation action panicked: {}", e);
                }
            }
        })
    }

    async fn spawn_actions(&self, event: &InboundEvent) -> Vec<JoinHandle<()>> {
        let index = self.rules.index().await;
        let now = Local::now();
        let own_message = event
            .outgoing
            .then(|| SentRef::new(&event.account_id, &event.chat_id, event.message_id));

        index
            .rules_for(&event.account_id)
            .into_iter()
            .filter_map(|rule| plan(rule, event, now))
            .map(|action| {
                debug!(
                    "Rule {} ({}) matched message {} in {}",
                    action.rule_id, action.rule_name, event.message_id, event.chat_id
                );
                let this = self.clone();
                let own_message = own_message.clone();
                tokio::spawn(async move { this.run_action(action, own_message).await })
            })
            .collect()
    }

    /// Enqueues the action's tasks once its delay has passed, unless the
    /// source message was sent by the queue.
    async fn run_action(&self, action: PlannedAction, own_message: Option<SentRef>) {
        tokio::time::sleep(action.delay).await;

        if let Some(message) = &own_message
            && self.queue.sent_messages().contains(message).await
        {
            debug!(
                "Rule {} skipped, message {} in {} came from the queue",
                action.rule_name, message.message_id, message.chat_id
            );
            return;
        }

        for task in action.tasks {
            let outcome = match self.queue.enqueue(task.kind, AUTOMATION_PRIORITY).await {
                Ok(handle) => handle.wait().await.map(|_| ()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    info!("Automation rule {}: {}", action.rule_name, task.description);
                    self.activity
                        .rule(action.rule_id, LogStatus::Success, &task.description);
                }
                Err(e) => {
                    warn!("Automation rule {} failed: {}", action.rule_name, e);
                    self.activity
                        .rule(action.rule_id, LogStatus::Error, &e.to_string());
                }
            }
        }
    }
}
