//! On-disk IPC watcher.
//!
//! A second cooperative loop drains `data/ipc/<sourceGroup>/{messages,tasks}`.
//! The directory name is the authenticated source identity: files under a
//! folder are treated as authored by that group, and non-main groups may only
//! affect their own folder. Processed files rotate into `completed/`,
//! malformed ones into `errors/<source>-<name>.json`; unauthorized actions
//! are dropped with a warning.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use nanoclaw_store::{GroupRegistry, TaskStore};
use nanoclaw_types::{
    NanoclawError, RegisteredGroup, ScheduleType, ScheduledTask, TaskStatus, MAIN_GROUP_FOLDER,
};

use crate::channel::ChatTransport;
use crate::sched::compute_first_run;

/// A `messages/*.json` file.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcMessageFile {
    Message {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        text: String,
    },
}

/// A `tasks/*.json` file.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcTaskFile {
    ScheduleTask {
        prompt: String,
        schedule_type: ScheduleType,
        schedule_value: String,
        #[serde(rename = "groupFolder")]
        group_folder: Option<String>,
        #[serde(rename = "chatJid")]
        chat_jid: Option<String>,
    },
    PauseTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ResumeTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    CancelTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    RefreshGroups,
    RegisterGroup {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        name: String,
        folder: String,
        trigger: String,
    },
}

pub struct IpcWatcher {
    ipc_dir: PathBuf,
    data_dir: PathBuf,
    groups: Arc<Mutex<GroupRegistry>>,
    tasks: Arc<Mutex<TaskStore>>,
    transport: Arc<dyn ChatTransport>,
    timezone: String,
}

impl IpcWatcher {
    pub fn new(
        ipc_dir: PathBuf,
        data_dir: PathBuf,
        groups: Arc<Mutex<GroupRegistry>>,
        tasks: Arc<Mutex<TaskStore>>,
        transport: Arc<dyn ChatTransport>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            ipc_dir,
            data_dir,
            groups,
            tasks,
            transport,
            timezone: timezone.into(),
        }
    }

    /// One scan of the IPC tree. Returns the number of files consumed
    /// (processed, dropped, or quarantined).
    pub fn tick(&self) -> Result<usize, NanoclawError> {
        let Ok(entries) = std::fs::read_dir(&self.ipc_dir) else {
            return Ok(0); // no IPC tree yet
        };

        let mut consumed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(source) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if source == "errors" || source == "completed" {
                continue;
            }

            // The folder name is the source identity; only registered
            // folders are read at all.
            let registered = {
                let groups = self.groups.lock().expect("group registry lock poisoned");
                groups.folder_registered(&source)
            };
            if !registered {
                debug!(source = %source, "ignoring IPC folder for unregistered group");
                continue;
            }

            consumed += self.drain_dir(&source, &path.join("messages"), Kind::Message);
            consumed += self.drain_dir(&source, &path.join("tasks"), Kind::Task);
        }
        Ok(consumed)
    }

    fn drain_dir(&self, source: &str, dir: &Path, kind: Kind) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        files.sort();

        let mut consumed = 0;
        for file in files {
            match self.handle_file(source, &file, kind) {
                Ok(()) => {
                    self.rotate(&file, source, "completed");
                    consumed += 1;
                }
                Err(FileError::Malformed(e)) => {
                    warn!(source = %source, file = %file.display(), error = %e, "malformed IPC file quarantined");
                    self.rotate(&file, source, "errors");
                    consumed += 1;
                }
                Err(FileError::Unauthorized(e)) => {
                    warn!(source = %source, file = %file.display(), reason = %e, "unauthorized IPC action dropped");
                    self.rotate(&file, source, "completed");
                    consumed += 1;
                }
            }
        }
        consumed
    }

    fn handle_file(&self, source: &str, file: &Path, kind: Kind) -> Result<(), FileError> {
        let raw = std::fs::read_to_string(file)
            .map_err(|e| FileError::Malformed(format!("unreadable: {e}")))?;

        match kind {
            Kind::Message => {
                let parsed: IpcMessageFile = serde_json::from_str(&raw)
                    .map_err(|e| FileError::Malformed(e.to_string()))?;
                let IpcMessageFile::Message { chat_jid, text } = parsed;
                self.deliver_message(source, &chat_jid, &text)
            }
            Kind::Task => {
                let parsed: IpcTaskFile = serde_json::from_str(&raw)
                    .map_err(|e| FileError::Malformed(e.to_string()))?;
                self.apply_task(source, parsed)
            }
        }
    }

    /// Send a message only when the source is main or owns the target chat.
    fn deliver_message(&self, source: &str, chat_jid: &str, text: &str) -> Result<(), FileError> {
        let authorized = source == MAIN_GROUP_FOLDER || {
            let groups = self.groups.lock().expect("group registry lock poisoned");
            groups.chat_for_folder(source) == Some(chat_jid)
        };
        if !authorized {
            return Err(FileError::Unauthorized(format!(
                "{source} may not send to {chat_jid}"
            )));
        }
        self.transport
            .send_text(chat_jid, text)
            .map_err(|e| FileError::Malformed(format!("send failed: {e}")))?;
        info!(source = %source, chat = %chat_jid, "IPC message delivered");
        Ok(())
    }

    fn apply_task(&self, source: &str, task: IpcTaskFile) -> Result<(), FileError> {
        match task {
            IpcTaskFile::ScheduleTask {
                prompt,
                schedule_type,
                schedule_value,
                group_folder,
                chat_jid,
            } => {
                let target_folder = group_folder.unwrap_or_else(|| source.to_string());
                if source != MAIN_GROUP_FOLDER && target_folder != source {
                    return Err(FileError::Unauthorized(format!(
                        "{source} may not schedule for {target_folder}"
                    )));
                }

                let chat_id = match chat_jid {
                    Some(jid) => jid,
                    None => {
                        let groups =
                            self.groups.lock().expect("group registry lock poisoned");
                        groups
                            .chat_for_folder(&target_folder)
                            .map(String::from)
                            .ok_or_else(|| {
                                FileError::Malformed(format!(
                                    "no chat registered for folder {target_folder}"
                                ))
                            })?
                    }
                };

                let next_run =
                    compute_first_run(schedule_type, &schedule_value, &self.timezone)
                        .map_err(|e| FileError::Malformed(e.to_string()))?;

                let task = ScheduledTask::new(
                    target_folder,
                    chat_id,
                    prompt,
                    schedule_type,
                    schedule_value,
                    Some(next_run),
                );
                info!(task = %task.id, next_run = %next_run, "task scheduled via IPC");

                let mut tasks = self.tasks.lock().expect("task store lock poisoned");
                tasks.add(task);
                tasks
                    .save(&self.data_dir)
                    .map_err(|e| FileError::Malformed(e.to_string()))?;
                Ok(())
            }
            IpcTaskFile::PauseTask { task_id } => {
                self.set_task_status(source, &task_id, TaskStatus::Paused)
            }
            IpcTaskFile::ResumeTask { task_id } => {
                self.set_task_status(source, &task_id, TaskStatus::Active)
            }
            IpcTaskFile::CancelTask { task_id } => {
                self.set_task_status(source, &task_id, TaskStatus::Cancelled)
            }
            IpcTaskFile::RefreshGroups => {
                let reloaded = GroupRegistry::load(&self.data_dir)
                    .map_err(|e| FileError::Malformed(e.to_string()))?;
                let mut groups = self.groups.lock().expect("group registry lock poisoned");
                *groups = reloaded;
                info!(source = %source, "group registry refreshed from disk");
                Ok(())
            }
            IpcTaskFile::RegisterGroup {
                chat_jid,
                name,
                folder,
                trigger,
            } => {
                if source != MAIN_GROUP_FOLDER {
                    return Err(FileError::Unauthorized(format!(
                        "{source} may not register groups"
                    )));
                }
                let mut groups = self.groups.lock().expect("group registry lock poisoned");
                groups.register(
                    chat_jid.clone(),
                    RegisteredGroup {
                        name,
                        folder: folder.clone(),
                        trigger,
                        added_at: Utc::now(),
                    },
                );
                groups
                    .save(&self.data_dir)
                    .map_err(|e| FileError::Malformed(e.to_string()))?;
                info!(chat = %chat_jid, folder = %folder, "group registered via IPC");
                Ok(())
            }
        }
    }

    fn set_task_status(
        &self,
        source: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), FileError> {
        let mut tasks = self.tasks.lock().expect("task store lock poisoned");
        let Some(task) = tasks.get_mut(task_id) else {
            return Err(FileError::Malformed(format!("unknown task: {task_id}")));
        };
        if source != MAIN_GROUP_FOLDER && task.group_folder != source {
            return Err(FileError::Unauthorized(format!(
                "{source} may not modify task {task_id}"
            )));
        }
        // Resuming recomputes nothing; a stale next_run fires immediately,
        // which matches at-least-once semantics.
        task.status = status;
        tasks
            .save(&self.data_dir)
            .map_err(|e| FileError::Malformed(e.to_string()))?;
        info!(task = %task_id, status = ?status, "task status changed via IPC");
        Ok(())
    }

    /// Move a consumed file into `<ipc>/<bucket>/<source>-<name>.json`.
    fn rotate(&self, file: &Path, source: &str, bucket: &str) {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let dir = self.ipc_dir.join(bucket);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create IPC {bucket} dir");
            return;
        }
        let dest = dir.join(format!("{source}-{name}"));
        if let Err(e) = std::fs::rename(file, &dest) {
            warn!(error = %e, file = %file.display(), "failed to rotate IPC file");
            let _ = std::fs::remove_file(file);
        }
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Message,
    Task,
}

enum FileError {
    /// Bad JSON or failed validation: quarantined, never retried.
    Malformed(String),
    /// Valid file from a source not allowed to perform the action.
    Unauthorized(String),
}

/// Write an IPC file atomically using the `<ms>-<6 base36>.json` template.
/// Producers (agents, containers) follow this convention; the watcher only
/// ever sees fully-written files.
pub fn write_ipc_file(dir: &Path, value: &serde_json::Value) -> Result<PathBuf, NanoclawError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| NanoclawError::StoreError(format!("create IPC dir failed: {e}")))?;

    let ms = Utc::now().timestamp_millis();
    let suffix = base36_suffix();
    let path = dir.join(format!("{ms}-{suffix}.json"));
    let tmp = dir.join(format!("{ms}-{suffix}.json.tmp"));

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| NanoclawError::StoreError(format!("serialize failed: {e}")))?;
    std::fs::write(&tmp, json)
        .map_err(|e| NanoclawError::StoreError(format!("write tmp failed: {e}")))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| NanoclawError::StoreError(format!("rename failed: {e}")))?;
    Ok(path)
}

/// Six base36 characters derived from a fresh UUID.
fn base36_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = u128::from_le_bytes(*uuid::Uuid::new_v4().as_bytes());
    let mut out = String::with_capacity(6);
    for _ in 0..6 {
        out.push(ALPHABET[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    struct Fixture {
        watcher: IpcWatcher,
        transport: Arc<RecordingTransport>,
        tasks: Arc<Mutex<TaskStore>>,
        groups: Arc<Mutex<GroupRegistry>>,
        ipc_dir: PathBuf,
        data_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);
        let ipc_dir = data_dir.join("ipc");

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
        registry.save(&data_dir).unwrap();
        let groups = Arc::new(Mutex::new(registry));

        let transport = Arc::new(RecordingTransport::default());
        let tasks = Arc::new(Mutex::new(TaskStore::default()));
        let watcher = IpcWatcher::new(
            ipc_dir.clone(),
            data_dir.clone(),
            groups.clone(),
            tasks.clone(),
            transport.clone(),
            "UTC",
        );

        Fixture {
            watcher,
            transport,
            tasks,
            groups,
            ipc_dir,
            data_dir,
        }
    }

    fn drop_file(fixture: &Fixture, source: &str, sub: &str, value: serde_json::Value) -> PathBuf {
        write_ipc_file(&fixture.ipc_dir.join(source).join(sub), &value).unwrap()
    }

    #[test]
    fn message_from_main_is_delivered_and_rotated() {
        let f = fixture();
        let file = drop_file(
            &f,
            "main",
            "messages",
            json!({"type": "message", "chatJid": "chat-side", "text": "hello side"}),
        );

        assert_eq!(f.watcher.tick().unwrap(), 1);
        let sent = f.transport.sent_texts();
        assert_eq!(sent, vec![("chat-side".to_string(), "hello side".to_string())]);
        assert!(!file.exists());
        // Rotated into completed/ with the source prefix.
        let rotated: Vec<_> = std::fs::read_dir(f.ipc_dir.join("completed"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(rotated.len(), 1);
        assert!(rotated[0]
            .file_name()
            .to_string_lossy()
            .starts_with("main-"));
    }

    #[test]
    fn side_group_may_message_only_its_own_chat() {
        let f = fixture();
        drop_file(
            &f,
            "side",
            "messages",
            json!({"type": "message", "chatJid": "chat-main", "text": "sneaky"}),
        );

        f.watcher.tick().unwrap();
        // Dropped: nothing sent.
        assert!(f.transport.sent_texts().is_empty());

        drop_file(
            &f,
            "side",
            "messages",
            json!({"type": "message", "chatJid": "chat-side", "text": "mine"}),
        );
        f.watcher.tick().unwrap();
        assert_eq!(f.transport.sent_texts().len(), 1);
    }

    #[test]
    fn schedule_task_creates_row_with_next_run() {
        let f = fixture();
        drop_file(
            &f,
            "main",
            "tasks",
            json!({
                "type": "schedule_task",
                "prompt": "check disk",
                "schedule_type": "cron",
                "schedule_value": "0 9 * * *",
                "groupFolder": "main"
            }),
        );

        assert_eq!(f.watcher.tick().unwrap(), 1);
        let tasks = f.tasks.lock().unwrap();
        assert_eq!(tasks.tasks.len(), 1);
        let task = &tasks.tasks[0];
        assert_eq!(task.group_folder, "main");
        assert_eq!(task.chat_id, "chat-main");
        assert!(task.next_run.is_some());
        // Persisted to disk too.
        let stored = TaskStore::load(&f.data_dir).unwrap();
        assert_eq!(stored.tasks.len(), 1);
    }

    #[test]
    fn malformed_file_quarantined_with_source_prefix() {
        let f = fixture();
        let dir = f.ipc_dir.join("main").join("tasks");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("1700000000000-abc123.json");
        std::fs::write(&file, "{not json").unwrap();

        assert_eq!(f.watcher.tick().unwrap(), 1);
        assert!(!file.exists());
        let errors: Vec<_> = std::fs::read_dir(f.ipc_dir.join("errors"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].file_name().to_string_lossy(),
            "main-1700000000000-abc123.json"
        );
        // Quarantined files are not retried: a second tick consumes nothing.
        assert_eq!(f.watcher.tick().unwrap(), 0);
    }

    #[test]
    fn invalid_schedule_is_quarantined() {
        let f = fixture();
        drop_file(
            &f,
            "main",
            "tasks",
            json!({
                "type": "schedule_task",
                "prompt": "x",
                "schedule_type": "interval",
                "schedule_value": "-100"
            }),
        );
        f.watcher.tick().unwrap();
        assert!(f.tasks.lock().unwrap().tasks.is_empty());
        assert!(f.ipc_dir.join("errors").exists());
    }

    #[test]
    fn side_group_cannot_schedule_for_main() {
        let f = fixture();
        drop_file(
            &f,
            "side",
            "tasks",
            json!({
                "type": "schedule_task",
                "prompt": "x",
                "schedule_type": "interval",
                "schedule_value": "60000",
                "groupFolder": "main"
            }),
        );
        f.watcher.tick().unwrap();
        assert!(f.tasks.lock().unwrap().tasks.is_empty());
    }

    #[test]
    fn pause_resume_cancel_lifecycle() {
        let f = fixture();
        let task = ScheduledTask::new(
            "side",
            "chat-side",
            "x",
            ScheduleType::Interval,
            "60000",
            Some(Utc::now()),
        );
        let id = task.id.clone();
        f.tasks.lock().unwrap().add(task);

        drop_file(&f, "side", "tasks", json!({"type": "pause_task", "taskId": id}));
        f.watcher.tick().unwrap();
        assert_eq!(
            f.tasks.lock().unwrap().get_mut(&id).unwrap().status,
            TaskStatus::Paused
        );

        drop_file(&f, "side", "tasks", json!({"type": "resume_task", "taskId": id}));
        f.watcher.tick().unwrap();
        assert_eq!(
            f.tasks.lock().unwrap().get_mut(&id).unwrap().status,
            TaskStatus::Active
        );

        drop_file(&f, "main", "tasks", json!({"type": "cancel_task", "taskId": id}));
        f.watcher.tick().unwrap();
        assert_eq!(
            f.tasks.lock().unwrap().get_mut(&id).unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn side_group_cannot_touch_foreign_task() {
        let f = fixture();
        let task = ScheduledTask::new(
            "main",
            "chat-main",
            "x",
            ScheduleType::Interval,
            "60000",
            Some(Utc::now()),
        );
        let id = task.id.clone();
        f.tasks.lock().unwrap().add(task);

        drop_file(&f, "side", "tasks", json!({"type": "cancel_task", "taskId": id}));
        f.watcher.tick().unwrap();
        assert_eq!(
            f.tasks.lock().unwrap().get_mut(&id).unwrap().status,
            TaskStatus::Active
        );
    }

    #[test]
    fn register_group_is_main_only() {
        let f = fixture();
        drop_file(
            &f,
            "side",
            "tasks",
            json!({
                "type": "register_group",
                "chatJid": "chat-new",
                "name": "New",
                "folder": "new",
                "trigger": "claw"
            }),
        );
        f.watcher.tick().unwrap();
        assert!(f.groups.lock().unwrap().get("chat-new").is_none());

        drop_file(
            &f,
            "main",
            "tasks",
            json!({
                "type": "register_group",
                "chatJid": "chat-new",
                "name": "New",
                "folder": "new",
                "trigger": "claw"
            }),
        );
        f.watcher.tick().unwrap();
        assert!(f.groups.lock().unwrap().get("chat-new").is_some());
    }

    #[test]
    fn unregistered_source_folder_ignored() {
        let f = fixture();
        let file = drop_file(
            &f,
            "ghost",
            "messages",
            json!({"type": "message", "chatJid": "chat-main", "text": "hi"}),
        );
        assert_eq!(f.watcher.tick().unwrap(), 0);
        // File left untouched: the folder is not a registered identity.
        assert!(file.exists());
    }

    #[test]
    fn tmp_files_are_skipped() {
        let f = fixture();
        let dir = f.ipc_dir.join("main").join("messages");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("123-abc.json.tmp"), "{").unwrap();
        assert_eq!(f.watcher.tick().unwrap(), 0);
    }

    #[test]
    fn ipc_filename_matches_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ipc_file(dir.path(), &json!({"type": "message"})).unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        let re = regex::Regex::new(r"^\d+-[0-9a-z]{6}\.json$").unwrap();
        assert!(re.is_match(&name), "unexpected name: {name}");
    }
}
