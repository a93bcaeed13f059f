//! Telegram client wrapper for a single user account.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken, UpdatesConfiguration};
use grammers_client::update::Update;
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::api::{DialogSummary, InviteTarget, MessageSummary, SentMessage, TelegramApi};
use super::peers::{ChatRef, InvalidChatRef, peer_to_chat_id};
use super::updates;
use crate::config::TelegramConfig;
use crate::events::ProviderUpdate;

/// Dialogs fetched per `get_dialogs` call.
const DIALOG_PAGE_SIZE: i32 = 100;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Account {0} is not connected")]
    NotConnected(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error(transparent)]
    InvalidChatRef(#[from] InvalidChatRef),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["flood_wait_", "flood wait "];
    let lower = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lower.find(pattern) {
            let num_str: String = lower[idx + pattern.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Where connected accounts deliver their updates.
pub type UpdateSink = mpsc::Sender<(String, ProviderUpdate)>;

type UpdatePump = Box<dyn FnOnce(UpdateSink) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Access hashes learned from dialogs and username lookups.
#[derive(Debug, Default)]
struct PeerCache {
    peers: HashMap<ChatRef, tl::enums::InputPeer>,
    usernames: HashMap<String, ChatRef>,
    names: HashMap<ChatRef, String>,
}

impl PeerCache {
    fn get(&self, chat: &ChatRef) -> Option<tl::enums::InputPeer> {
        let chat = match chat {
            ChatRef::Username(name) => self.usernames.get(&name.to_lowercase())?,
            other => other,
        };
        self.peers.get(chat).cloned()
    }

    fn absorb(&mut self, users: &[tl::enums::User], chats: &[tl::enums::Chat]) {
        for user in users {
            let tl::enums::User::User(u) = user else {
                continue;
            };
            let chat = ChatRef::User(u.id);
            if let Some(access_hash) = u.access_hash {
                self.peers.insert(
                    chat.clone(),
                    tl::enums::InputPeer::User(tl::types::InputPeerUser {
                        user_id: u.id,
                        access_hash,
                    }),
                );
            }
            let name = [u.first_name.as_deref(), u.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            self.remember(chat, u.username.as_deref(), name);
        }

        for chat in chats {
            match chat {
                tl::enums::Chat::Chat(c) => {
                    let chat = ChatRef::Chat(c.id);
                    self.peers.insert(
                        chat.clone(),
                        tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: c.id }),
                    );
                    self.remember(chat, None, c.title.clone());
                }
                tl::enums::Chat::Channel(c) => {
                    let chat = ChatRef::Channel(c.id);
                    if let Some(access_hash) = c.access_hash {
                        self.peers.insert(
                            chat.clone(),
                            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                                channel_id: c.id,
                                access_hash,
                            }),
                        );
                    }
                    self.remember(chat, c.username.as_deref(), c.title.clone());
                }
                _ => {}
            }
        }
    }

    fn remember(&mut self, chat: ChatRef, username: Option<&str>, name: String) {
        if let Some(username) = username {
            self.usernames.insert(username.to_lowercase(), chat.clone());
        }
        if !name.is_empty() {
            self.names.insert(chat, name);
        }
    }

    fn name_of(&self, chat: &ChatRef) -> String {
        self.names
            .get(chat)
            .cloned()
            .unwrap_or_else(|| chat.to_string())
    }
}

/// A connected Telegram user account.
pub struct TelegramBot {
    /// Account id (phone number).
    account: String,

    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    peers: RwLock<PeerCache>,

    /// Authorized and not yet disconnected.
    connected: AtomicBool,

    /// Update stream waiting for a sink.
    pump: Mutex<Option<UpdatePump>>,

    pump_task: Mutex<Option<JoinHandle<()>>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects an account using its session file.
    ///
    /// The account still has to be authorized before it reports itself
    /// as connected.
    pub async fn connect(config: &TelegramConfig, account: &str) -> Result<Self, TelegramError> {
        info!("Connecting account {} to Telegram...", mask_phone(account));

        tokio::fs::create_dir_all(&config.session_dir)
            .await
            .map_err(|e| TelegramError::Session(e.to_string()))?;

        let session = Arc::new(
            SqliteSession::open(config.session_path(account))
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let pump_client = client.clone();
        let pump_account = account.to_owned();
        let pump: UpdatePump = Box::new(move |sink: UpdateSink| {
            Box::pin(async move {
                let mut stream = match pump_client
                    .stream_updates(
                        updates,
                        UpdatesConfiguration {
                            catch_up: false,
                            ..Default::default()
                        },
                    )
                    .await
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Update stream of {} stopped: {}", mask_phone(&pump_account), e);
                        return;
                    }
                };

                loop {
                    let update = match stream.next().await {
                        Ok(update) => update,
                        Err(e) => {
                            warn!("Update stream of {} stopped: {}", mask_phone(&pump_account), e);
                            break;
                        }
                    };
                    let Some(update) = classify(update) else {
                        continue;
                    };
                    if sink.send((pump_account.clone(), update)).await.is_err() {
                        debug!("Update sink closed");
                        break;
                    }
                }
            })
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            account: account.to_owned(),
            client,
            handle: handle.thin,
            peers: RwLock::new(PeerCache::default()),
            connected: AtomicBool::new(is_authorized),
            pump: Mutex::new(Some(pump)),
            pump_task: Mutex::new(None),
            _pool_task: pool_task,
        })
    }

    /// Account id this client was connected for.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Checks if the client is authorized.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the account's phone.
    pub async fn request_login_code(&self, api_hash: &str) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(&self.account));

        self.client
            .request_login_code(&self.account, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                self.connected.store(true, Ordering::Release);
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                self.connected.store(true, Ordering::Release);
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Starts delivering this account's updates to `sink`.
    ///
    /// Returns `false` if updates were already started.
    pub fn start_updates(&self, sink: UpdateSink) -> bool {
        let Some(pump) = self.pump.lock().ok().and_then(|mut pump| pump.take()) else {
            return false;
        };
        let task = tokio::spawn(pump(sink));
        if let Ok(mut slot) = self.pump_task.lock() {
            *slot = Some(task);
        }
        true
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting {} from Telegram...", mask_phone(&self.account));
        self.connected.store(false, Ordering::Release);
        if let Ok(mut slot) = self.pump_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
        self.handle.quit();
    }

    async fn input_peer(&self, chat: &ChatRef) -> Result<tl::enums::InputPeer, TelegramError> {
        if let Some(peer) = self.peers.read().await.get(chat) {
            return Ok(peer);
        }

        match chat {
            ChatRef::Chat(id) => {
                return Ok(tl::enums::InputPeer::Chat(tl::types::InputPeerChat {
                    chat_id: *id,
                }));
            }
            ChatRef::Username(name) => self.resolve_username(name).await?,
            ChatRef::User(_) | ChatRef::Channel(_) => {
                self.load_dialogs().await?;
            }
        }

        self.peers
            .read()
            .await
            .get(chat)
            .ok_or_else(|| TelegramError::PeerNotFound(chat.to_string()))
    }

    async fn resolve_username(&self, username: &str) -> Result<(), TelegramError> {
        debug!("Resolving @{}", username);
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_owned(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = self.client.invoke(&request).await?;
        self.peers
            .write()
            .await
            .absorb(&resolved.users, &resolved.chats);
        Ok(())
    }

    async fn load_dialogs(&self) -> Result<Vec<DialogSummary>, TelegramError> {
        let request = tl::functions::messages::GetDialogs {
            exclude_pinned: false,
            folder_id: None,
            offset_date: 0,
            offset_id: 0,
            offset_peer: tl::enums::InputPeer::Empty,
            limit: DIALOG_PAGE_SIZE,
            hash: 0,
        };

        let (dialogs, users, chats) = match self.client.invoke(&request).await? {
            tl::enums::messages::Dialogs::Dialogs(d) => (d.dialogs, d.users, d.chats),
            tl::enums::messages::Dialogs::Slice(d) => (d.dialogs, d.users, d.chats),
            tl::enums::messages::Dialogs::NotModified(_) => return Ok(Vec::new()),
        };

        let mut cache = self.peers.write().await;
        cache.absorb(&users, &chats);

        Ok(dialogs
            .iter()
            .filter_map(|dialog| match dialog {
                tl::enums::Dialog::Dialog(d) => {
                    let chat = ChatRef::from_peer(&d.peer);
                    Some(DialogSummary {
                        id: chat.to_string(),
                        name: cache.name_of(&chat),
                        unread_count: d.unread_count,
                        archived: d.folder_id == Some(1),
                        pinned: d.pinned,
                    })
                }
                tl::enums::Dialog::Folder(_) => None,
            })
            .collect())
    }
}

#[async_trait]
impl TelegramApi for TelegramBot {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SentMessage, TelegramError> {
        let chat: ChatRef = chat_id.parse()?;
        let peer = self.input_peer(&chat).await?;
        debug!("Sending to {}: \"{}\"", chat, truncate_for_log(text, 30));

        let request = tl::functions::messages::SendMessage {
            no_webpage: false,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer,
            reply_to: None,
            message: text.to_owned(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
            rich_message: None,
            schedule_repeat_period: None,
        };

        let result = self.client.invoke(&request).await?;
        Ok(SentMessage {
            chat_id: chat.to_string(),
            message_id: new_message_ids(&result).first().copied(),
        })
    }

    async fn forward_messages(
        &self,
        to_chat_id: &str,
        from_chat_id: &str,
        message_ids: &[i32],
    ) -> Result<Vec<i32>, TelegramError> {
        let to_peer = self.input_peer(&to_chat_id.parse()?).await?;
        let from_peer = self.input_peer(&from_chat_id.parse()?).await?;

        let request = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: false,
            drop_media_captions: false,
            noforwards: false,
            allow_paid_floodskip: false,
            from_peer,
            id: message_ids.to_vec(),
            random_id: message_ids.iter().map(|_| rand::random()).collect(),
            to_peer,
            top_msg_id: None,
            reply_to: None,
            schedule_date: None,
            send_as: None,
            quick_reply_shortcut: None,
            video_timestamp: None,
            allow_paid_stars: None,
            suggested_post: None,
            effect: None,
            schedule_repeat_period: None,
        };

        let result = self.client.invoke(&request).await?;
        Ok(new_message_ids(&result))
    }

    async fn join_group(&self, target: &InviteTarget) -> Result<(), TelegramError> {
        match target {
            InviteTarget::Hash(hash) => {
                let request = tl::functions::messages::ImportChatInvite { hash: hash.clone() };
                self.client.invoke(&request).await?;
            }
            InviteTarget::Username(name) => {
                let chat = ChatRef::Username(name.clone());
                let channel = input_channel(self.input_peer(&chat).await?).ok_or_else(|| {
                    TelegramError::Invocation(format!("{chat} is not a group or channel"))
                })?;
                self.client
                    .invoke(&tl::functions::channels::JoinChannel { channel })
                    .await?;
            }
        }
        Ok(())
    }

    async fn leave_group(&self, chat_id: &str) -> Result<(), TelegramError> {
        let chat: ChatRef = chat_id.parse()?;
        match self.input_peer(&chat).await? {
            tl::enums::InputPeer::Channel(c) => {
                let channel = tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: c.channel_id,
                    access_hash: c.access_hash,
                });
                self.client
                    .invoke(&tl::functions::channels::LeaveChannel { channel })
                    .await?;
            }
            tl::enums::InputPeer::Chat(c) => {
                let request = tl::functions::messages::DeleteChatUser {
                    revoke_history: false,
                    chat_id: c.chat_id,
                    user_id: tl::enums::InputUser::UserSelf,
                };
                self.client.invoke(&request).await?;
            }
            _ => {
                return Err(TelegramError::Invocation(format!(
                    "{chat} is not a group or channel"
                )));
            }
        }
        Ok(())
    }

    async fn get_dialogs(&self) -> Result<Vec<DialogSummary>, TelegramError> {
        self.load_dialogs().await
    }

    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset_id: i32,
    ) -> Result<Vec<MessageSummary>, TelegramError> {
        let peer = self.input_peer(&chat_id.parse()?).await?;
        let request = tl::functions::messages::GetHistory {
            peer,
            offset_id,
            offset_date: 0,
            add_offset: 0,
            limit: i32::try_from(limit).unwrap_or(i32::MAX),
            max_id: 0,
            min_id: 0,
            hash: 0,
        };

        let (messages, users, chats) = match self.client.invoke(&request).await? {
            tl::enums::messages::Messages::Messages(m) => (m.messages, m.users, m.chats),
            tl::enums::messages::Messages::Slice(m) => (m.messages, m.users, m.chats),
            tl::enums::messages::Messages::ChannelMessages(m) => (m.messages, m.users, m.chats),
            tl::enums::messages::Messages::NotModified(_) => return Ok(Vec::new()),
        };
        self.peers.write().await.absorb(&users, &chats);

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                tl::enums::Message::Message(m) => Some(MessageSummary {
                    id: m.id.to_string(),
                    text: m.message.clone(),
                    date: i64::from(m.date),
                    from_id: m.from_id.as_ref().map(peer_to_chat_id),
                    media: m.media.as_ref().map(updates::media_kind),
                }),
                _ => None,
            })
            .collect())
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("account", &mask_phone(&self.account))
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Maps a client update to the provider update the dispatcher consumes.
fn classify(update: Update) -> Option<ProviderUpdate> {
    match update {
        Update::NewMessage(message) => updates::new_message(&(*message).raw, false),
        Update::MessageEdited(message) => updates::new_message(&(*message).raw, true),
        Update::MessageDeleted(deletion) => Some(match deletion.channel_id() {
            Some(channel_id) => ProviderUpdate::DeleteChannelMessages {
                chat_id: ChatRef::Channel(channel_id).to_string(),
                message_ids: deletion.messages().to_vec(),
            },
            None => ProviderUpdate::DeleteMessages {
                message_ids: deletion.messages().to_vec(),
            },
        }),
        Update::Raw(raw) => updates::from_raw_update(&raw.raw),
        _ => None,
    }
}

fn input_channel(peer: tl::enums::InputPeer) -> Option<tl::enums::InputChannel> {
    match peer {
        tl::enums::InputPeer::Channel(c) => {
            Some(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                channel_id: c.channel_id,
                access_hash: c.access_hash,
            }))
        }
        _ => None,
    }
}

/// Ids of the messages created by a send or forward call.
fn new_message_ids(updates: &tl::enums::Updates) -> Vec<i32> {
    let list = match updates {
        tl::enums::Updates::UpdateShortSentMessage(sent) => return vec![sent.id],
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        _ => return Vec::new(),
    };

    list.iter()
        .filter_map(|update| {
            let message = match update {
                tl::enums::Update::NewMessage(u) => &u.message,
                tl::enums::Update::NewChannelMessage(u) => &u.message,
                _ => return None,
            };
            match message {
                tl::enums::Message::Message(m) => Some(m.id),
                _ => None,
            }
        })
        .collect()
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
        // Lowercasing changes the byte length of these characters.
        assert_eq!(
            extract_flood_wait_seconds("İİİ rpc error: FLOOD_WAIT_45"),
            Some(45)
        );
        assert_eq!(extract_flood_wait_seconds("ẞ flood wait 7s"), Some(7));
    }

    #[test]
    fn test_peer_cache_basic_group_and_username_miss() {
        let mut cache = PeerCache::default();
        cache.absorb(&[], &[]);
        assert!(cache.get(&ChatRef::Username("nobody".to_owned())).is_none());
        assert!(cache.get(&ChatRef::User(1)).is_none());
        assert_eq!(cache.name_of(&ChatRef::Chat(5)), "-5");
    }

    #[test]
    fn test_invalid_chat_ref_converts() {
        let err: TelegramError = "not a chat!".parse::<ChatRef>().unwrap_err().into();
        assert!(matches!(err, TelegramError::InvalidChatRef(_)));
    }
}
