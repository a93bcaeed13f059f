//! JSON file storage backend.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LogEntry, LogStatus, Storage, StorageError};
use crate::automation::{Rule, RuleDraft, RuleId};
use crate::queue::{TaskId, TaskKind, TaskRecord, TaskStatus};

/// Log records kept before the oldest are dropped.
const DEFAULT_LOG_CAPACITY: usize = 5000;

/// Completed and failed tasks kept before the oldest are dropped.
const DEFAULT_TASK_HISTORY: usize = 1000;

/// Everything the store persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Document {
    next_task_id: TaskId,
    next_rule_id: RuleId,
    next_log_id: u64,
    tasks: BTreeMap<TaskId, TaskRecord>,
    rules: BTreeMap<RuleId, Rule>,
    logs: VecDeque<LogEntry>,
}

impl Document {
    /// Drops the oldest finished tasks beyond `keep`.
    fn prune_finished_tasks(&mut self, keep: usize) {
        let finished: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id)
            .collect();
        let excess = finished.len().saturating_sub(keep);
        for id in &finished[..excess] {
            self.tasks.remove(id);
        }
    }
}

enum WriterMessage {
    Changed,
    /// Answered once everything before it is on disk.
    Flush(mpsc::Sender<Result<(), String>>),
}

/// Background thread saving the document off the async runtime.
#[derive(Debug)]
struct Writer {
    tx: mpsc::Sender<WriterMessage>,
    handle: JoinHandle<()>,
}

/// Storage backed by a single JSON file.
///
/// Changes apply in memory and are saved by a writer thread; changes made
/// while a save is in progress are coalesced into the next one. Dropping
/// the store waits for the last save.
#[derive(Debug)]
pub struct JsonStore {
    doc: Arc<Mutex<Document>>,

    /// `None` keeps everything in memory.
    writer: Option<Writer>,

    log_capacity: usize,

    task_history: usize,
}

impl JsonStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let doc: Document = serde_json::from_str(&content)?;
            info!(
                "Loaded data file {} ({} tasks, {} rules, {} log records)",
                path.display(),
                doc.tasks.len(),
                doc.rules.len(),
                doc.logs.len()
            );
            doc
        } else {
            debug!("Data file {} not found, starting empty", path.display());
            Document::default()
        };

        let doc = Arc::new(Mutex::new(doc));
        let (tx, rx) = mpsc::channel();
        let handle = {
            let doc = Arc::clone(&doc);
            std::thread::Builder::new()
                .name("json-store".to_owned())
                .spawn(move || run_writer(&doc, &path, &rx))?
        };

        Ok(Self {
            doc,
            writer: Some(Writer { tx, handle }),
            log_capacity: DEFAULT_LOG_CAPACITY,
            task_history: DEFAULT_TASK_HISTORY,
        })
    }

    /// Creates a store that never touches the disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            doc: Arc::new(Mutex::new(Document::default())),
            writer: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
            task_history: DEFAULT_TASK_HISTORY,
        }
    }

    /// Sets how many log records are retained.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    /// Sets how many finished tasks are retained.
    #[must_use]
    pub fn with_task_history(mut self, keep: usize) -> Self {
        self.task_history = keep;
        self
    }

    fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> Result<R, StorageError> {
        let doc = self.doc.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(f(&doc))
    }

    /// Applies a change and schedules a save.
    fn write<R>(
        &self,
        f: impl FnOnce(&mut Document) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let result = {
            let mut doc = self.doc.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut doc)?
        };
        if let Some(writer) = &self.writer
            && writer.tx.send(WriterMessage::Changed).is_err()
        {
            warn!("Data file writer stopped, change kept in memory only");
        }
        Ok(result)
    }
}

impl Drop for JsonStore {
    fn drop(&mut self) {
        if let Some(Writer { tx, handle }) = self.writer.take() {
            drop(tx);
            if handle.join().is_err() {
                warn!("Data file writer panicked");
            }
        }
    }
}

/// Saves the document whenever it changes until the store is dropped.
fn run_writer(doc: &Mutex<Document>, path: &Path, rx: &mpsc::Receiver<WriterMessage>) {
    while let Ok(first) = rx.recv() {
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(message) = next.take().or_else(|| rx.try_recv().ok()) {
            if let WriterMessage::Flush(ack) = message {
                waiters.push(ack);
            }
        }

        let result = snapshot(doc).and_then(|json| save_to_file(&json, path));
        if let Err(e) = &result {
            warn!("Failed to save data file {}: {}", path.display(), e);
        }
        for ack in waiters {
            let _ = ack.send(result.as_ref().map(|_| ()).map_err(ToString::to_string));
        }
    }
    debug!("Data file writer stopped");
}

fn snapshot(doc: &Mutex<Document>) -> Result<Vec<u8>, StorageError> {
    let doc = doc.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(serde_json::to_vec_pretty(&*doc)?)
}

/// Writes the document next to its destination, then renames it into place.
fn save_to_file(json: &[u8], path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl Storage for JsonStore {
    fn insert_task(&self, kind: &TaskKind, priority: u32) -> Result<TaskRecord, StorageError> {
        self.write(|doc| {
            doc.next_task_id += 1;
            let record = TaskRecord {
                id: doc.next_task_id,
                kind: kind.clone(),
                priority,
                retry_count: 0,
                status: TaskStatus::Pending,
                error: None,
                created_at: Utc::now(),
                processed_at: None,
            };
            doc.tasks.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn update_task_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let keep = self.task_history;
        self.write(|doc| {
            let task = doc
                .tasks
                .get_mut(&id)
                .ok_or(StorageError::TaskNotFound(id))?;
            task.status = status;
            task.error = error.map(ToOwned::to_owned);
            task.processed_at = Some(Utc::now());
            if status.is_terminal() {
                doc.prune_finished_tasks(keep);
            }
            Ok(())
        })
    }

    fn record_retry(
        &self,
        id: TaskId,
        retry_count: u32,
        priority: u32,
        error: &str,
    ) -> Result<(), StorageError> {
        self.write(|doc| {
            let task = doc
                .tasks
                .get_mut(&id)
                .ok_or(StorageError::TaskNotFound(id))?;
            task.status = TaskStatus::Pending;
            task.retry_count = retry_count;
            task.priority = priority;
            task.error = Some(error.to_owned());
            Ok(())
        })
    }

    fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StorageError> {
        self.read(|doc| doc.tasks.get(&id).cloned())
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StorageError> {
        self.read(|doc| {
            doc.tasks
                .values()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .cloned()
                .collect()
        })
    }

    fn clear_completed_tasks(&self) -> Result<usize, StorageError> {
        self.write(|doc| {
            let before = doc.tasks.len();
            doc.tasks.retain(|_, t| t.status != TaskStatus::Completed);
            Ok(before - doc.tasks.len())
        })
    }

    fn fail_interrupted_tasks(&self) -> Result<usize, StorageError> {
        let keep = self.task_history;
        self.write(|doc| {
            let now = Utc::now();
            let mut count = 0;
            for task in doc.tasks.values_mut().filter(|t| !t.status.is_terminal()) {
                task.status = TaskStatus::Failed;
                task.error = Some("interrupted by restart".to_owned());
                task.processed_at = Some(now);
                count += 1;
            }
            doc.prune_finished_tasks(keep);
            Ok(count)
        })
    }

    fn insert_rule(&self, draft: &RuleDraft) -> Result<Rule, StorageError> {
        self.write(|doc| {
            doc.next_rule_id += 1;
            let now = Utc::now();
            let rule = Rule {
                id: doc.next_rule_id,
                name: draft.name.clone(),
                account: draft.account.clone(),
                kind: draft.kind.clone(),
                enabled: draft.enabled,
                created_at: now,
                updated_at: now,
            };
            doc.rules.insert(rule.id, rule.clone());
            Ok(rule)
        })
    }

    fn update_rule(&self, rule: &Rule) -> Result<(), StorageError> {
        self.write(|doc| {
            let stored = doc
                .rules
                .get_mut(&rule.id)
                .ok_or(StorageError::RuleNotFound(rule.id))?;
            *stored = Rule {
                updated_at: Utc::now(),
                created_at: stored.created_at,
                ..rule.clone()
            };
            Ok(())
        })
    }

    fn delete_rule(&self, id: RuleId) -> Result<bool, StorageError> {
        self.write(|doc| Ok(doc.rules.remove(&id).is_some()))
    }

    fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, StorageError> {
        self.read(|doc| doc.rules.get(&id).cloned())
    }

    fn list_rules(&self) -> Result<Vec<Rule>, StorageError> {
        self.read(|doc| doc.rules.values().rev().cloned().collect())
    }

    fn list_enabled_rules(&self) -> Result<Vec<Rule>, StorageError> {
        self.read(|doc| doc.rules.values().filter(|r| r.enabled).cloned().collect())
    }

    fn append_log(
        &self,
        action: &str,
        status: LogStatus,
        details: &str,
    ) -> Result<LogEntry, StorageError> {
        let capacity = self.log_capacity;
        self.write(|doc| {
            doc.next_log_id += 1;
            let entry = LogEntry {
                id: doc.next_log_id,
                action: action.to_owned(),
                status,
                details: details.to_owned(),
                timestamp: Utc::now(),
            };
            doc.logs.push_back(entry.clone());
            while doc.logs.len() > capacity {
                doc.logs.pop_front();
            }
            Ok(entry)
        })
    }

    fn query_logs(&self, prefix: &str, limit: usize) -> Result<Vec<LogEntry>, StorageError> {
        self.read(|doc| {
            doc.logs
                .iter()
                .rev()
                .filter(|e| e.action.starts_with(prefix))
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn query_action_logs(
        &self,
        action: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StorageError> {
        self.read(|doc| {
            doc.logs
                .iter()
                .rev()
                .filter(|e| e.action == action)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    fn flush(&self) -> Result<(), StorageError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let stopped = || StorageError::Unavailable("data file writer stopped".to_owned());

        let (ack, done) = mpsc::channel();
        writer
            .tx
            .send(WriterMessage::Flush(ack))
            .map_err(|_| stopped())?;
        done.recv()
            .map_err(|_| stopped())?
            .map_err(StorageError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Conditions, ReplyAction, Trigger};

    fn send(chat: &str) -> TaskKind {
        TaskKind::SendMessage {
            account: "+1".to_owned(),
            chat_id: chat.to_owned(),
            message: "hi".to_owned(),
        }
    }

    fn reply_draft(name: &str) -> RuleDraft {
        RuleDraft::auto_reply(
            name,
            vec![Trigger::Keyword {
                value: "hello".to_owned(),
            }],
            vec![ReplyAction::new("Hi {sender}")],
            Conditions::default(),
        )
    }

    #[test]
    fn test_task_lifecycle() {
        let store = JsonStore::in_memory();
        let task = store.insert_task(&send("42"), 5).unwrap();
        assert_eq!(task.id, 1);
        assert_eq!(task.status, TaskStatus::Pending);

        store
            .record_retry(task.id, 1, 4, "boom")
            .unwrap();
        store
            .update_task_status(task.id, TaskStatus::Completed, None)
            .unwrap();

        let stored = store.get_task(task.id).ok().flatten();
        let stored = stored.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.priority, 4);
        assert!(stored.error.is_none());
        assert!(stored.processed_at.is_some());
    }

    #[test]
    fn test_update_missing_task() {
        let store = JsonStore::in_memory();
        assert!(matches!(
            store.update_task_status(7, TaskStatus::Failed, Some("x")),
            Err(StorageError::TaskNotFound(7))
        ));
    }

    #[test]
    fn test_clear_completed_and_fail_interrupted() {
        let store = JsonStore::in_memory();
        let a = store.insert_task(&send("1"), 0).unwrap();
        let b = store.insert_task(&send("2"), 0).unwrap();
        let c = store.insert_task(&send("3"), 0).unwrap();
        let _ = store.update_task_status(a.id, TaskStatus::Completed, None);
        let _ = store.update_task_status(b.id, TaskStatus::Processing, None);

        assert_eq!(store.clear_completed_tasks().ok(), Some(1));
        assert_eq!(store.fail_interrupted_tasks().ok(), Some(2));

        let failed = store
            .list_tasks(Some(TaskStatus::Failed))
            .unwrap_or_default();
        let ids: Vec<TaskId> = failed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
    }

    #[test]
    fn test_rule_crud() {
        let store = JsonStore::in_memory();
        let first = store.insert_rule(&reply_draft("a")).unwrap();
        let second = store.insert_rule(&reply_draft("b")).unwrap();

        let names: Vec<String> = store
            .list_rules()
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let mut disabled = second.clone();
        disabled.enabled = false;
        store.update_rule(&disabled).unwrap();
        let enabled: Vec<RuleId> = store
            .list_enabled_rules()
            .unwrap_or_default()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(enabled, vec![first.id]);

        assert_eq!(store.delete_rule(first.id).ok(), Some(true));
        assert_eq!(store.delete_rule(first.id).ok(), Some(false));
        assert!(store.get_rule(first.id).ok().flatten().is_none());
    }

    #[test]
    fn test_log_prefix_query_and_capacity() {
        let store = JsonStore::in_memory().with_log_capacity(3);
        for i in 0..4 {
            let _ = store.append_log(&format!("automation_rule_{i}"), LogStatus::Success, "ok");
        }
        let _ = store.append_log("task_send_message", LogStatus::Error, "boom");

        let logs = store.query_logs("automation_rule_", 10).unwrap_or_default();
        let actions: Vec<&str> = logs.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["automation_rule_3", "automation_rule_2"]);

        let limited = store.query_logs("", 1).unwrap_or_default();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].action, "task_send_message");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        {
            let store = JsonStore::open(&path).unwrap();
            store.insert_rule(&reply_draft("persisted")).unwrap();
            store.insert_task(&send("42"), 1).unwrap();
            let _ = store.append_log("automation_rule_1", LogStatus::Success, "ok");
        }

        let reopened = JsonStore::open(&path).unwrap();
        let rules = reopened.list_rules().unwrap_or_default();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "persisted");
        assert_eq!(rules[0].kind, reply_draft("x").kind);
        assert_eq!(reopened.list_tasks(None).unwrap_or_default().len(), 1);

        let next = reopened.insert_rule(&reply_draft("next")).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_flush_writes_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store = JsonStore::open(&path).unwrap();

        for i in 0..20 {
            store.insert_rule(&reply_draft(&format!("r{i}"))).unwrap();
        }
        store.flush().unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["nextRuleId"], 20);
        assert_eq!(saved["rules"].as_object().map(serde_json::Map::len), Some(20));
    }

    #[test]
    fn test_failed_save_is_reported_by_flush() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be makes saving fail.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let store = JsonStore::open(blocker.join("data.json")).unwrap();
        store.insert_rule(&reply_draft("kept")).unwrap();

        assert!(store.flush().is_err());
        assert_eq!(store.list_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_finished_tasks_are_pruned() {
        let store = JsonStore::in_memory().with_task_history(2);
        let pending = store.insert_task(&send("0"), 0).unwrap();
        for chat in ["1", "2", "3"] {
            let task = store.insert_task(&send(chat), 0).unwrap();
            store
                .update_task_status(task.id, TaskStatus::Completed, None)
                .unwrap();
        }

        let ids: Vec<TaskId> = store
            .list_tasks(None)
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![pending.id, 3, 4]);
    }
}
