//! Small persisted state documents: message-loop watermarks, per-group
//! planner sessions, registered groups, and scheduled tasks.
//!
//! Each document has exactly one writing loop. All saves go through
//! [`crate::documents::atomic_save`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nanoclaw_types::{NanoclawError, RegisteredGroup, ScheduledTask};

use crate::documents::{atomic_save, load_or_default};

/// Message-loop watermarks (`router_state.json`).
///
/// `last_timestamp` is the global ingest watermark; `last_agent_timestamp`
/// tracks, per chat, the newest message already given to the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterState {
    #[serde(default)]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_agent_timestamp: HashMap<String, DateTime<Utc>>,
}

impl RouterState {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("router_state.json")
    }

    pub fn load(data_dir: &Path) -> Result<Self, NanoclawError> {
        load_or_default(&Self::path(data_dir))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), NanoclawError> {
        atomic_save(&Self::path(data_dir), self)
    }
}

/// Per-group planner session ids (`sessions.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMap {
    #[serde(flatten)]
    pub sessions: HashMap<String, String>,
}

impl SessionMap {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("sessions.json")
    }

    pub fn load(data_dir: &Path) -> Result<Self, NanoclawError> {
        load_or_default(&Self::path(data_dir))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), NanoclawError> {
        atomic_save(&Self::path(data_dir), self)
    }

    pub fn get(&self, group_folder: &str) -> Option<&str> {
        self.sessions.get(group_folder).map(String::as_str)
    }

    pub fn set(&mut self, group_folder: impl Into<String>, session_id: impl Into<String>) {
        self.sessions.insert(group_folder.into(), session_id.into());
    }
}

/// Registered chat groups (`registered_groups.json`), keyed by chat id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupRegistry {
    #[serde(flatten)]
    pub groups: HashMap<String, RegisteredGroup>,
}

impl GroupRegistry {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("registered_groups.json")
    }

    pub fn load(data_dir: &Path) -> Result<Self, NanoclawError> {
        load_or_default(&Self::path(data_dir))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), NanoclawError> {
        atomic_save(&Self::path(data_dir), self)
    }

    pub fn get(&self, chat_id: &str) -> Option<&RegisteredGroup> {
        self.groups.get(chat_id)
    }

    /// Find the chat id owned by a group folder.
    pub fn chat_for_folder(&self, folder: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, g)| g.folder == folder)
            .map(|(chat_id, _)| chat_id.as_str())
    }

    /// Whether a folder belongs to any registered group.
    pub fn folder_registered(&self, folder: &str) -> bool {
        self.groups.values().any(|g| g.folder == folder)
    }

    pub fn register(&mut self, chat_id: impl Into<String>, group: RegisteredGroup) {
        self.groups.insert(chat_id.into(), group);
    }

    /// Chat ids of all registered groups.
    pub fn chat_ids(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }
}

/// Scheduled tasks (`tasks.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStore {
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl TaskStore {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("tasks.json")
    }

    pub fn load(data_dir: &Path) -> Result<Self, NanoclawError> {
        load_or_default(&Self::path(data_dir))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), NanoclawError> {
        atomic_save(&Self::path(data_dir), self)
    }

    pub fn add(&mut self, task: ScheduledTask) {
        self.tasks.push(task);
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ScheduledTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Active tasks due at `now`.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        self.tasks.iter().filter(|t| t.is_due(now)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoclaw_types::{ScheduleType, TaskStatus};

    #[test]
    fn router_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RouterState::default();
        let now = Utc::now();
        state.last_timestamp = Some(now);
        state.last_agent_timestamp.insert("chat-1".into(), now);
        state.save(dir.path()).unwrap();

        let back = RouterState::load(dir.path()).unwrap();
        assert_eq!(back.last_timestamp, Some(now));
        assert_eq!(back.last_agent_timestamp.get("chat-1"), Some(&now));
    }

    #[test]
    fn session_map_flattened_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut sessions = SessionMap::default();
        sessions.set("main", "sess-abc");
        sessions.save(dir.path()).unwrap();

        let raw = std::fs::read_to_string(SessionMap::path(dir.path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        // Flat {groupFolder: sessionId} document, no wrapper key.
        assert_eq!(value["main"], "sess-abc");

        let back = SessionMap::load(dir.path()).unwrap();
        assert_eq!(back.get("main"), Some("sess-abc"));
    }

    #[test]
    fn group_registry_lookups() {
        let mut registry = GroupRegistry::default();
        registry.register(
            "chat-main",
            RegisteredGroup {
                name: "Ops".into(),
                folder: "main".into(),
                trigger: "claw".into(),
                added_at: Utc::now(),
            },
        );
        registry.register(
            "chat-side",
            RegisteredGroup {
                name: "Side".into(),
                folder: "side".into(),
                trigger: "claw".into(),
                added_at: Utc::now(),
            },
        );

        assert!(registry.folder_registered("side"));
        assert!(!registry.folder_registered("ghost"));
        assert_eq!(registry.chat_for_folder("main"), Some("chat-main"));
        assert!(registry.get("chat-side").is_some());
        assert_eq!(registry.chat_ids().len(), 2);
    }

    #[test]
    fn task_store_due_filtering() {
        let now = Utc::now();
        let mut store = TaskStore::default();
        store.add(ScheduledTask::new(
            "main",
            "chat-1",
            "check disk",
            ScheduleType::Interval,
            "60000",
            Some(now - chrono::Duration::seconds(1)),
        ));
        let mut paused = ScheduledTask::new(
            "main",
            "chat-1",
            "paused one",
            ScheduleType::Interval,
            "60000",
            Some(now - chrono::Duration::seconds(1)),
        );
        paused.status = TaskStatus::Paused;
        store.add(paused);

        let due = store.due_tasks(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].prompt, "check disk");
    }

    #[test]
    fn task_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TaskStore::default();
        store.add(ScheduledTask::new(
            "main",
            "chat-1",
            "check disk",
            ScheduleType::Cron,
            "0 9 * * *",
            None,
        ));
        store.save(dir.path()).unwrap();

        let back = TaskStore::load(dir.path()).unwrap();
        assert_eq!(back.tasks.len(), 1);
        assert_eq!(back.tasks[0].schedule_value, "0 9 * * *");
    }
}
