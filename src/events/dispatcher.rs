//! Routes provider updates to per-account handlers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use super::{InboundEvent, MessageUpdate, ProviderUpdate, RealtimeEvent};
use crate::automation::AutomationEvaluator;
use crate::commands::CommandHandler;
use crate::queue::{TaskKind, TaskQueue};

/// Queue priority of command replies.
pub const COMMAND_REPLY_PRIORITY: u32 = 10;

/// Realtime events buffered per slow subscriber before it starts lagging.
const REALTIME_CAPACITY: usize = 256;

/// Decides whether a handler wants an update.
pub type UpdateFilter = Arc<dyn Fn(&ProviderUpdate) -> bool + Send + Sync>;

/// Reacts to an update received by an account.
pub type UpdateHandler = Arc<dyn Fn(&str, &ProviderUpdate) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    name: &'static str,
    /// Installed by [`EventDispatcher::register`].
    builtin: bool,
    filter: UpdateFilter,
    handler: UpdateHandler,
}

/// Shared pieces the built-in handlers need.
#[derive(Clone)]
struct Sinks {
    realtime: broadcast::Sender<RealtimeEvent>,
    evaluator: AutomationEvaluator,
    commands: Option<Arc<CommandHandler>>,
    queue: TaskQueue,
}

/// Fans provider updates out to realtime subscribers, automation and commands.
pub struct EventDispatcher {
    registrations: RwLock<HashMap<String, Vec<Registration>>>,
    sinks: Sinks,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(evaluator: AutomationEvaluator, queue: TaskQueue) -> Self {
        let (realtime, _) = broadcast::channel(REALTIME_CAPACITY);
        Self {
            registrations: RwLock::new(HashMap::new()),
            sinks: Sinks {
                realtime,
                evaluator,
                commands: None,
                queue,
            },
        }
    }

    /// Handles owner commands found in outgoing messages.
    #[must_use]
    pub fn with_commands(mut self, commands: Arc<CommandHandler>) -> Self {
        self.sinks.commands = Some(commands);
        self
    }

    /// Receives every realtime event from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.sinks.realtime.subscribe()
    }

    /// Installs the handlers of an account; registering twice changes nothing.
    pub async fn register(&self, account: &str) {
        let mut registrations = self.registrations.write().await;
        let list = registrations.entry(account.to_owned()).or_default();
        if list.iter().any(|r| r.builtin) {
            debug!("Handlers for {} already registered", account);
            return;
        }
        list.extend(self.sinks.default_handlers());
        info!("Registered event handlers for {}", account);
    }

    /// Adds a custom handler for an account.
    pub async fn add_handler(
        &self,
        account: &str,
        name: &'static str,
        filter: UpdateFilter,
        handler: UpdateHandler,
    ) {
        self.registrations
            .write()
            .await
            .entry(account.to_owned())
            .or_default()
            .push(Registration {
                name,
                builtin: false,
                filter,
                handler,
            });
    }

    /// Removes every handler of an account.
    pub async fn unregister(&self, account: &str) -> bool {
        let removed = self.registrations.write().await.remove(account).is_some();
        if removed {
            info!("Unregistered event handlers for {}", account);
        }
        removed
    }

    /// Number of handlers installed for an account.
    pub async fn handler_count(&self, account: &str) -> usize {
        self.registrations
            .read()
            .await
            .get(account)
            .map_or(0, Vec::len)
    }

    /// Runs every matching handler of `account` for `update`.
    pub async fn dispatch(&self, account: &str, update: &ProviderUpdate) {
        let handlers: Vec<Registration> = {
            let registrations = self.registrations.read().await;
            let Some(list) = registrations.get(account) else {
                trace!("Dropping {} for unregistered {}", update.kind(), account);
                return;
            };
            list.iter()
                .filter(|r| (r.filter)(update))
                .cloned()
                .collect()
        };

        for registration in handlers {
            trace!("{} -> {}", update.kind(), registration.name);
            (registration.handler)(account, update);
        }
    }

    /// Dispatches updates until every sender is dropped.
    pub async fn run(&self, mut updates: mpsc::Receiver<(String, ProviderUpdate)>) {
        info!("Event dispatcher started");
        while let Some((account, update)) = updates.recv().await {
            self.dispatch(&account, &update).await;
        }
        info!("Event dispatcher stopped");
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl Sinks {
    fn default_handlers(&self) -> Vec<Registration> {
        let on_message = self.clone();
        let on_edit = self.realtime.clone();
        let on_delete = self.realtime.clone();
        let on_status = self.realtime.clone();
        let on_typing = self.realtime.clone();

        vec![
            Registration {
                builtin: true,
                name: "new_message",
                filter: Arc::new(|u: &ProviderUpdate| {
                    matches!(
                        u,
                        ProviderUpdate::NewMessage(_) | ProviderUpdate::NewChannelMessage(_)
                    )
                }),
                handler: Arc::new(move |account: &str, update: &ProviderUpdate| {
                    if let ProviderUpdate::NewMessage(m) | ProviderUpdate::NewChannelMessage(m) =
                        update
                    {
                        on_message.new_message(account, m);
                    }
                }),
            },
            Registration {
                builtin: true,
                name: "message_edit",
                filter: Arc::new(|u: &ProviderUpdate| {
                    matches!(
                        u,
                        ProviderUpdate::EditMessage(_) | ProviderUpdate::EditChannelMessage(_)
                    )
                }),
                handler: Arc::new(move |account: &str, update: &ProviderUpdate| {
                    if let ProviderUpdate::EditMessage(m) | ProviderUpdate::EditChannelMessage(m) =
                        update
                    {
                        publish(
                            &on_edit,
                            RealtimeEvent::MessageEdit {
                                account_id: account.to_owned(),
                                chat_id: m.chat_id.clone(),
                                message_id: m.message_id,
                                text: m.text.clone(),
                                timestamp: Utc::now(),
                            },
                        );
                    }
                }),
            },
            Registration {
                builtin: true,
                name: "message_delete",
                filter: Arc::new(|u: &ProviderUpdate| {
                    matches!(
                        u,
                        ProviderUpdate::DeleteMessages { .. }
                            | ProviderUpdate::DeleteChannelMessages { .. }
                    )
                }),
                handler: Arc::new(move |account: &str, update: &ProviderUpdate| {
                    let (chat_id, message_ids) = match update {
                        ProviderUpdate::DeleteMessages { message_ids } => (None, message_ids),
                        ProviderUpdate::DeleteChannelMessages {
                            chat_id,
                            message_ids,
                        } => (Some(chat_id.clone()), message_ids),
                        _ => return,
                    };
                    publish(
                        &on_delete,
                        RealtimeEvent::MessageDelete {
                            account_id: account.to_owned(),
                            chat_id,
                            message_ids: message_ids.clone(),
                            timestamp: Utc::now(),
                        },
                    );
                }),
            },
            Registration {
                builtin: true,
                name: "user_status",
                filter: Arc::new(|u: &ProviderUpdate| {
                    matches!(u, ProviderUpdate::UserStatus { .. })
                }),
                handler: Arc::new(move |account: &str, update: &ProviderUpdate| {
                    if let ProviderUpdate::UserStatus {
                        user_id,
                        status,
                        was_online,
                    } = update
                    {
                        publish(
                            &on_status,
                            RealtimeEvent::UserStatus {
                                account_id: account.to_owned(),
                                user_id: user_id.clone(),
                                status: status.clone(),
                                was_online: *was_online,
                                timestamp: Utc::now(),
                            },
                        );
                    }
                }),
            },
            Registration {
                builtin: true,
                name: "chat_action",
                filter: Arc::new(|u: &ProviderUpdate| {
                    matches!(
                        u,
                        ProviderUpdate::UserTyping { .. } | ProviderUpdate::ChatUserTyping { .. }
                    )
                }),
                handler: Arc::new(move |account: &str, update: &ProviderUpdate| {
                    let (chat_id, user_id, action) = match update {
                        ProviderUpdate::UserTyping { user_id, action } => {
                            (None, Some(user_id.clone()), action)
                        }
                        ProviderUpdate::ChatUserTyping {
                            chat_id,
                            user_id,
                            action,
                        } => (Some(chat_id.clone()), user_id.clone(), action),
                        _ => return,
                    };
                    publish(
                        &on_typing,
                        RealtimeEvent::ChatAction {
                            account_id: account.to_owned(),
                            chat_id,
                            user_id,
                            action: action.clone(),
                            timestamp: Utc::now(),
                        },
                    );
                }),
            },
        ]
    }

    /// Broadcasts a new message, then hands it to commands or automation.
    fn new_message(&self, account: &str, message: &MessageUpdate) {
        let event = InboundEvent::from_message(account, message);
        publish(&self.realtime, RealtimeEvent::Message(event.clone()));

        if message.outgoing
            && let Some(commands) = &self.commands
            && message.text.trim_start().starts_with(commands.prefix())
        {
            self.run_command(Arc::clone(commands), event);
            return;
        }

        drop(self.evaluator.evaluate(event));
    }

    fn run_command(&self, commands: Arc<CommandHandler>, event: InboundEvent) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let Some(result) = commands.try_handle(&event.text).await else {
                return;
            };
            let reply = TaskKind::SendMessage {
                account: event.account_id,
                chat_id: event.chat_id,
                message: result.message,
            };
            if let Err(e) = queue.enqueue(reply, COMMAND_REPLY_PRIORITY).await {
                warn!("Failed to queue command reply: {}", e);
            }
        });
    }
}

/// Sends to realtime subscribers; having none is not an error.
fn publish(realtime: &broadcast::Sender<RealtimeEvent>, event: RealtimeEvent) {
    if realtime.send(event).is_err() {
        trace!("No realtime subscribers");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::automation::{Conditions, ReplyAction, RuleDraft, RuleStore, Trigger};
    use crate::config::QueueSettings;
    use crate::queue::TaskExecutor;
    use crate::storage::{ActivityLog, JsonStore, Storage};
    use crate::telegram::ClientRegistry;
    use crate::test_support::{FakeCall, FakeTelegram};

    struct Fixture {
        dispatcher: EventDispatcher,
        fake: Arc<FakeTelegram>,
        rules: Arc<RuleStore>,
    }

    async fn fixture() -> Fixture {
        let fake = Arc::new(FakeTelegram::new());
        let clients = Arc::new(ClientRegistry::new());
        clients.insert("+1", fake.clone()).await;
        let store: Arc<dyn Storage> = Arc::new(JsonStore::in_memory());
        let queue = TaskQueue::new(
            TaskExecutor::new(Arc::clone(&clients)),
            Arc::clone(&store),
            QueueSettings::default(),
        );
        let rules = Arc::new(RuleStore::new(Arc::clone(&store)));
        let evaluator = AutomationEvaluator::new(
            Arc::clone(&rules),
            queue.clone(),
            ActivityLog::new(Arc::clone(&store)),
        );
        let commands = Arc::new(CommandHandler::new(
            "/autopilot".to_owned(),
            queue.clone(),
            Arc::clone(&rules),
            store,
            clients,
        ));
        let dispatcher = EventDispatcher::new(evaluator, queue).with_commands(commands);
        Fixture {
            dispatcher,
            fake,
            rules,
        }
    }

    fn message(text: &str, outgoing: bool) -> MessageUpdate {
        MessageUpdate {
            chat_id: "42".to_owned(),
            message_id: 7,
            sender_id: Some("99".to_owned()),
            text: text.to_owned(),
            date: 1_700_000_000,
            media: None,
            outgoing,
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let f = fixture().await;
        f.dispatcher.register("+1").await;
        let count = f.dispatcher.handler_count("+1").await;
        f.dispatcher.register("+1").await;
        assert_eq!(f.dispatcher.handler_count("+1").await, count);

        assert!(f.dispatcher.unregister("+1").await);
        assert!(!f.dispatcher.unregister("+1").await);
        assert_eq!(f.dispatcher.handler_count("+1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_message_is_broadcast_and_evaluated() {
        let f = fixture().await;
        f.rules
            .create(RuleDraft::auto_post("mirror", None, "-1001", None))
            .await
            .unwrap();
        f.dispatcher.register("+1").await;
        let mut realtime = f.dispatcher.subscribe();

        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewMessage(message("news", false)))
            .await;

        match realtime.recv().await {
            Ok(RealtimeEvent::Message(event)) => assert_eq!(event.text, "news"),
            other => panic!("unexpected realtime event: {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            f.fake.calls(),
            vec![FakeCall::Send {
                chat_id: "-1001".to_owned(),
                text: "news".to_owned()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_channel_post_triggers_auto_post() {
        let f = fixture().await;
        f.rules
            .create(RuleDraft::auto_post(
                "mirror",
                Some("-1005".to_owned()),
                "-1001",
                None,
            ))
            .await
            .unwrap();
        f.dispatcher.register("+1").await;

        let post = MessageUpdate {
            chat_id: "-1005".to_owned(),
            sender_id: None,
            ..message("release notes", true)
        };
        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewChannelMessage(post))
            .await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            f.fake.calls(),
            vec![FakeCall::Send {
                chat_id: "-1001".to_owned(),
                text: "release notes".to_owned()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_reply_does_not_trigger_again() {
        let f = fixture().await;
        f.rules
            .create(RuleDraft::auto_reply(
                "echo",
                vec![Trigger::Keyword {
                    value: "hello".to_owned(),
                }],
                vec![ReplyAction::new("hello to you")],
                Conditions::default(),
            ))
            .await
            .unwrap();
        f.dispatcher.register("+1").await;

        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewMessage(message("hello", false)))
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fake.calls().len(), 1);

        // The fake numbers sent messages from 100.
        let echo = MessageUpdate {
            message_id: 100,
            ..message("hello to you", true)
        };
        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewMessage(echo))
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fake.calls().len(), 1);

        // Typed by the owner, the same text still fires.
        let typed = MessageUpdate {
            message_id: 300,
            ..message("hello from me", true)
        };
        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewMessage(typed))
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.fake.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outgoing_command_gets_reply() {
        let f = fixture().await;
        f.dispatcher.register("+1").await;

        f.dispatcher
            .dispatch(
                "+1",
                &ProviderUpdate::NewMessage(message("/autopilot info", true)),
            )
            .await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let calls = f.fake.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            FakeCall::Send { chat_id, text } if chat_id == "42" && text.contains("Telegram Autopilot")
        ));
    }

    #[tokio::test]
    async fn test_delete_and_typing_events() {
        let f = fixture().await;
        f.dispatcher.register("+1").await;
        let mut realtime = f.dispatcher.subscribe();

        f.dispatcher
            .dispatch(
                "+1",
                &ProviderUpdate::DeleteChannelMessages {
                    chat_id: "-1005".to_owned(),
                    message_ids: vec![1, 2],
                },
            )
            .await;
        f.dispatcher
            .dispatch(
                "+1",
                &ProviderUpdate::UserTyping {
                    user_id: "99".to_owned(),
                    action: "typing".to_owned(),
                },
            )
            .await;

        assert!(matches!(
            realtime.recv().await,
            Ok(RealtimeEvent::MessageDelete { chat_id: Some(ref c), ref message_ids, .. })
                if c == "-1005" && *message_ids == vec![1, 2]
        ));
        assert!(matches!(
            realtime.recv().await,
            Ok(RealtimeEvent::ChatAction { chat_id: None, user_id: Some(ref u), .. }) if u == "99"
        ));
    }

    #[tokio::test]
    async fn test_unregistered_account_is_ignored() {
        let f = fixture().await;
        let mut realtime = f.dispatcher.subscribe();
        f.dispatcher
            .dispatch("+9", &ProviderUpdate::NewMessage(message("hi", false)))
            .await;
        assert!(realtime.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_custom_handler_fires_on_filter_match() {
        let f = fixture().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        f.dispatcher
            .add_handler(
                "+1",
                "edits",
                Arc::new(|u: &ProviderUpdate| matches!(u, ProviderUpdate::EditMessage(_))),
                Arc::new(move |_: &str, _: &ProviderUpdate| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        f.dispatcher
            .dispatch("+1", &ProviderUpdate::EditMessage(message("x", false)))
            .await;
        f.dispatcher
            .dispatch("+1", &ProviderUpdate::NewMessage(message("x", false)))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
