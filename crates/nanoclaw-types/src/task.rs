//! Scheduled tasks fired by the scheduler loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a task's next firing time is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Standard cron expression, evaluated in the configured timezone.
    Cron,
    /// Fixed interval; the stored value is a positive millisecond count.
    Interval,
    /// One-shot; the stored value is an ISO-8601 instant.
    Once,
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// A task the scheduler fires as a planner turn in the owning chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    /// Opaque unique id (`task-<uuid>`).
    pub id: String,
    /// Folder of the group that owns the task.
    pub group_folder: String,
    /// Chat the planner turn runs in.
    pub chat_id: String,
    /// The prompt replayed as a scheduled user turn.
    pub prompt: String,
    pub schedule_type: ScheduleType,
    /// Cron expression, interval milliseconds, or ISO-8601 instant.
    pub schedule_value: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Create an active task with a fresh id and the given first firing time.
    pub fn new(
        group_folder: impl Into<String>,
        chat_id: impl Into<String>,
        prompt: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_value: impl Into<String>,
        next_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            group_folder: group_folder.into(),
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            schedule_type,
            schedule_value: schedule_value.into(),
            status: TaskStatus::Active,
            next_run,
            created_at: Utc::now(),
        }
    }

    /// Whether the task is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Active
            && self.next_run.map(|next| next <= now).unwrap_or(false)
    }
}
