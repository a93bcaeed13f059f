//! In-crate fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;

use crate::automation::{Rule, RuleDraft, RuleId};
use crate::queue::{TaskId, TaskKind, TaskRecord, TaskStatus};
use crate::storage::{LogEntry, LogStatus, Storage, StorageError};
use crate::telegram::{
    DialogSummary, InviteTarget, MessageSummary, SentMessage, TelegramApi, TelegramError,
};

/// A call received by [`FakeTelegram`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Send {
        chat_id: String,
        text: String,
    },
    Forward {
        to: String,
        from: String,
        message_ids: Vec<i32>,
    },
    Join(InviteTarget),
    Leave(String),
    GetDialogs,
    GetMessages {
        chat_id: String,
        limit: u32,
        offset_id: i32,
    },
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Invocation,
    Flood(u32),
}

/// Records every call and fails on demand.
#[derive(Debug)]
pub struct FakeTelegram {
    connected: AtomicBool,
    calls: Mutex<Vec<FakeCall>>,
    failures: Mutex<VecDeque<Failure>>,
    next_message_id: AtomicI32,
}

impl Default for FakeTelegram {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            next_message_id: AtomicI32::new(100),
        }
    }
}

impl FakeTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `n` calls fail with an invocation error.
    pub fn fail_next(&self, n: usize) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.extend(std::iter::repeat_n(Failure::Invocation, n));
    }

    /// Makes the next call fail with a flood wait.
    pub fn flood_next(&self, seconds: u32) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.push_back(Failure::Flood(seconds));
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: FakeCall) -> Result<(), TelegramError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match failure {
            None => Ok(()),
            Some(Failure::Invocation) => {
                Err(TelegramError::Invocation("injected failure".to_owned()))
            }
            Some(Failure::Flood(seconds)) => Err(TelegramError::FloodWait(seconds)),
        }
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<SentMessage, TelegramError> {
        self.record(FakeCall::Send {
            chat_id: chat_id.to_owned(),
            text: text.to_owned(),
        })?;
        Ok(SentMessage {
            chat_id: chat_id.to_owned(),
            message_id: Some(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn forward_messages(
        &self,
        to_chat_id: &str,
        from_chat_id: &str,
        message_ids: &[i32],
    ) -> Result<Vec<i32>, TelegramError> {
        self.record(FakeCall::Forward {
            to: to_chat_id.to_owned(),
            from: from_chat_id.to_owned(),
            message_ids: message_ids.to_vec(),
        })?;
        Ok(message_ids
            .iter()
            .map(|_| self.next_message_id.fetch_add(1, Ordering::SeqCst))
            .collect())
    }

    async fn join_group(&self, target: &InviteTarget) -> Result<(), TelegramError> {
        self.record(FakeCall::Join(target.clone()))
    }

    async fn leave_group(&self, chat_id: &str) -> Result<(), TelegramError> {
        self.record(FakeCall::Leave(chat_id.to_owned()))
    }

    async fn get_dialogs(&self) -> Result<Vec<DialogSummary>, TelegramError> {
        self.record(FakeCall::GetDialogs)?;
        Ok(vec![DialogSummary {
            id: "42".to_owned(),
            name: "Alice".to_owned(),
            unread_count: 0,
            archived: false,
            pinned: false,
        }])
    }

    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset_id: i32,
    ) -> Result<Vec<MessageSummary>, TelegramError> {
        self.record(FakeCall::GetMessages {
            chat_id: chat_id.to_owned(),
            limit,
            offset_id,
        })?;
        Ok(Vec::new())
    }
}

/// Storage whose every operation fails.
#[derive(Debug)]
pub struct FailingStore;

fn unavailable<T>() -> Result<T, StorageError> {
    Err(StorageError::Unavailable("failing store".to_owned()))
}

impl Storage for FailingStore {
    fn insert_task(&self, _: &TaskKind, _: u32) -> Result<TaskRecord, StorageError> {
        unavailable()
    }

    fn update_task_status(
        &self,
        _: TaskId,
        _: TaskStatus,
        _: Option<&str>,
    ) -> Result<(), StorageError> {
        unavailable()
    }

    fn record_retry(&self, _: TaskId, _: u32, _: u32, _: &str) -> Result<(), StorageError> {
        unavailable()
    }

    fn get_task(&self, _: TaskId) -> Result<Option<TaskRecord>, StorageError> {
        unavailable()
    }

    fn list_tasks(&self, _: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StorageError> {
        unavailable()
    }

    fn clear_completed_tasks(&self) -> Result<usize, StorageError> {
        unavailable()
    }

    fn fail_interrupted_tasks(&self) -> Result<usize, StorageError> {
        unavailable()
    }

    fn insert_rule(&self, _: &RuleDraft) -> Result<Rule, StorageError> {
        unavailable()
    }

    fn update_rule(&self, _: &Rule) -> Result<(), StorageError> {
        unavailable()
    }

    fn delete_rule(&self, _: RuleId) -> Result<bool, StorageError> {
        unavailable()
    }

    fn get_rule(&self, _: RuleId) -> Result<Option<Rule>, StorageError> {
        unavailable()
    }

    fn list_rules(&self) -> Result<Vec<Rule>, StorageError> {
        unavailable()
    }

    fn list_enabled_rules(&self) -> Result<Vec<Rule>, StorageError> {
        unavailable()
    }

    fn append_log(&self, _: &str, _: LogStatus, _: &str) -> Result<LogEntry, StorageError> {
        unavailable()
    }

    fn query_logs(&self, _: &str, _: usize) -> Result<Vec<LogEntry>, StorageError> {
        unavailable()
    }

    fn query_action_logs(&self, _: &str, _: usize) -> Result<Vec<LogEntry>, StorageError> {
        unavailable()
    }
}
