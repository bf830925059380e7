//! The scheduler loop.
//!
//! Every tick fires tasks whose `next_run` has passed, replaying each
//! task's prompt as a planner turn in the owning chat (flagged scheduled).
//! Firing is at-least-once: a task whose turn fails keeps its `next_run`
//! and is retried next tick.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use tracing::{info, warn};

use nanoclaw_store::TaskStore;
use nanoclaw_types::{NanoclawError, ScheduleType, TaskStatus};

use crate::turn::{run_planner_turn, TurnDeps};

/// Validate a schedule and compute its first firing time.
///
/// Cron expressions must parse (evaluated in `tz_name`); intervals must be
/// positive integer milliseconds; one-shot values must be ISO-8601 instants.
pub fn compute_first_run(
    schedule_type: ScheduleType,
    schedule_value: &str,
    tz_name: &str,
) -> Result<DateTime<Utc>, NanoclawError> {
    match schedule_type {
        ScheduleType::Cron => next_cron_occurrence(schedule_value, tz_name, Utc::now()),
        ScheduleType::Interval => {
            let ms = parse_interval_ms(schedule_value)?;
            Ok(Utc::now() + chrono::Duration::milliseconds(ms))
        }
        ScheduleType::Once => DateTime::parse_from_rfc3339(schedule_value)
            .map(Into::into)
            .map_err(|e| {
                NanoclawError::SchedulerError(format!(
                    "one-shot timestamp '{schedule_value}' is not ISO-8601: {e}"
                ))
            }),
    }
}

/// Parse an interval value: positive integer milliseconds.
pub fn parse_interval_ms(value: &str) -> Result<i64, NanoclawError> {
    let ms: i64 = value.trim().parse().map_err(|_| {
        NanoclawError::SchedulerError(format!("interval '{value}' is not an integer"))
    })?;
    if ms <= 0 {
        return Err(NanoclawError::SchedulerError(format!(
            "interval must be positive, got {ms}"
        )));
    }
    Ok(ms)
}

/// Next tick of a cron expression after `after`, in the configured zone.
pub fn next_cron_occurrence(
    expression: &str,
    tz_name: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, NanoclawError> {
    let tz = Tz::from_str(tz_name).map_err(|_| {
        NanoclawError::SchedulerError(format!("unknown timezone: {tz_name}"))
    })?;
    let cron = Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| {
            NanoclawError::SchedulerError(format!("invalid cron expression '{expression}': {e}"))
        })?;
    let local_after = after.with_timezone(&tz);
    let next = cron.find_next_occurrence(&local_after, false).map_err(|e| {
        NanoclawError::SchedulerError(format!(
            "no next occurrence for cron '{expression}': {e}"
        ))
    })?;
    Ok(next.with_timezone(&Utc))
}

pub struct Scheduler {
    deps: TurnDeps,
    tasks: Arc<Mutex<TaskStore>>,
    timezone: String,
}

impl Scheduler {
    pub fn new(deps: TurnDeps, tasks: Arc<Mutex<TaskStore>>, timezone: impl Into<String>) -> Self {
        Self {
            deps,
            tasks,
            timezone: timezone.into(),
        }
    }

    /// One tick: fire every due task. Returns the number fired successfully.
    pub fn tick(&self) -> Result<usize, NanoclawError> {
        let now = Utc::now();
        let due = {
            let tasks = self.tasks.lock().expect("task store lock poisoned");
            tasks.due_tasks(now)
        };

        let mut fired = 0;
        for task in due {
            info!(task = %task.id, chat = %task.chat_id, "scheduled task firing");
            if let Err(e) = run_planner_turn(
                &self.deps,
                &task.group_folder,
                &task.chat_id,
                &task.prompt,
                true,
            ) {
                // At-least-once: leave next_run untouched for a retry.
                warn!(task = %task.id, error = %e, "scheduled task failed, will retry");
                continue;
            }

            let next = match task.schedule_type {
                ScheduleType::Cron => {
                    next_cron_occurrence(&task.schedule_value, &self.timezone, now).ok()
                }
                ScheduleType::Interval => parse_interval_ms(&task.schedule_value)
                    .ok()
                    .map(|ms| now + chrono::Duration::milliseconds(ms)),
                ScheduleType::Once => None,
            };

            {
                let mut tasks = self.tasks.lock().expect("task store lock poisoned");
                if let Some(stored) = tasks.get_mut(&task.id) {
                    match next {
                        Some(next) => stored.next_run = Some(next),
                        None => {
                            stored.status = TaskStatus::Completed;
                            stored.next_run = None;
                        }
                    }
                }
                tasks.save(&self.deps.data_dir)?;
            }
            fired += 1;
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NullTransport;
    use crate::memory::NoopMemory;
    use crate::planner::PlannerReply;
    use crate::testing::ScriptedPlanner;
    use nanoclaw_store::{ProposalStore, SessionMap};
    use nanoclaw_types::ScheduledTask;

    #[test]
    fn cron_next_occurrence_is_in_the_future() {
        let now = Utc::now();
        let next = next_cron_occurrence("0 9 * * *", "UTC", now).unwrap();
        assert!(next > now);
        // Daily at 09:00: within the next 24 hours.
        assert!(next - now <= chrono::Duration::hours(24));
    }

    #[test]
    fn cron_respects_timezone() {
        // 09:00 in two different zones gives different UTC instants
        // (except for the rare alignment day; half a day apart here).
        let now = Utc::now();
        let utc_next = next_cron_occurrence("0 9 * * *", "UTC", now).unwrap();
        let tokyo_next = next_cron_occurrence("0 9 * * *", "Asia/Tokyo", now).unwrap();
        assert_ne!(utc_next, tokyo_next);
    }

    #[test]
    fn invalid_cron_rejected() {
        assert!(next_cron_occurrence("not a cron", "UTC", Utc::now()).is_err());
        assert!(compute_first_run(ScheduleType::Cron, "61 * * * *", "UTC").is_err());
    }

    #[test]
    fn unknown_timezone_rejected() {
        assert!(next_cron_occurrence("0 9 * * *", "Mars/Olympus", Utc::now()).is_err());
    }

    #[test]
    fn interval_validation() {
        assert_eq!(parse_interval_ms("60000").unwrap(), 60_000);
        assert!(parse_interval_ms("0").is_err());
        assert!(parse_interval_ms("-5").is_err());
        assert!(parse_interval_ms("soon").is_err());
    }

    #[test]
    fn once_requires_iso8601() {
        assert!(compute_first_run(ScheduleType::Once, "2026-09-01T09:00:00Z", "UTC").is_ok());
        assert!(compute_first_run(ScheduleType::Once, "tomorrow", "UTC").is_err());
    }

    fn scheduler_fixture(script: Vec<Result<PlannerReply, String>>) -> (Scheduler, Arc<Mutex<TaskStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);

        let deps = TurnDeps {
            planner: Arc::new(ScriptedPlanner::new(script)),
            memory: Arc::new(NoopMemory),
            transport: Arc::new(NullTransport),
            proposals: Arc::new(Mutex::new(
                ProposalStore::open(data_dir.join("action-queue.json")).unwrap(),
            )),
            sessions: Arc::new(Mutex::new(SessionMap::default())),
            data_dir,
            chat_max_len: 4000,
        };
        let tasks = Arc::new(Mutex::new(TaskStore::default()));
        (Scheduler::new(deps, tasks.clone(), "UTC"), tasks)
    }

    fn due_task(schedule_type: ScheduleType, value: &str) -> ScheduledTask {
        ScheduledTask::new(
            "main",
            "chat-1",
            "check disk",
            schedule_type,
            value,
            Some(Utc::now() - chrono::Duration::seconds(1)),
        )
    }

    #[test]
    fn once_task_completes_after_firing() {
        let (scheduler, tasks) = scheduler_fixture(vec![Ok(PlannerReply {
            text: "done\n```json\n{}\n```".into(),
            session_id: None,
        })]);
        let task = due_task(ScheduleType::Once, "2026-01-01T00:00:00Z");
        let id = task.id.clone();
        tasks.lock().unwrap().add(task);

        assert_eq!(scheduler.tick().unwrap(), 1);

        let mut tasks = tasks.lock().unwrap();
        let stored = tasks.get_mut(&id).unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.next_run.is_none());
    }

    #[test]
    fn interval_task_reschedules() {
        let (scheduler, tasks) = scheduler_fixture(vec![Ok(PlannerReply {
            text: "ok\n```json\n{}\n```".into(),
            session_id: None,
        })]);
        let task = due_task(ScheduleType::Interval, "60000");
        let id = task.id.clone();
        tasks.lock().unwrap().add(task);

        let before = Utc::now();
        assert_eq!(scheduler.tick().unwrap(), 1);

        let mut tasks = tasks.lock().unwrap();
        let stored = tasks.get_mut(&id).unwrap();
        assert_eq!(stored.status, TaskStatus::Active);
        let next = stored.next_run.unwrap();
        assert!(next >= before + chrono::Duration::milliseconds(60_000));
    }

    #[test]
    fn failing_task_keeps_next_run_for_retry() {
        use crate::testing::RecordingTransport;

        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);

        let transport = Arc::new(RecordingTransport::default());
        transport
            .fail_sends
            .store(true, std::sync::atomic::Ordering::Relaxed);

        let deps = TurnDeps {
            planner: Arc::new(ScriptedPlanner::new(vec![Ok(PlannerReply {
                text: "ok\n```json\n{}\n```".into(),
                session_id: None,
            })])),
            memory: Arc::new(NoopMemory),
            transport,
            proposals: Arc::new(Mutex::new(
                ProposalStore::open(data_dir.join("action-queue.json")).unwrap(),
            )),
            sessions: Arc::new(Mutex::new(SessionMap::default())),
            data_dir,
            chat_max_len: 4000,
        };
        let tasks = Arc::new(Mutex::new(TaskStore::default()));
        let scheduler = Scheduler::new(deps, tasks.clone(), "UTC");

        let task = due_task(ScheduleType::Interval, "60000");
        let id = task.id.clone();
        let original_next = task.next_run;
        tasks.lock().unwrap().add(task);

        // The transport is down: the turn fails and next_run is untouched.
        assert_eq!(scheduler.tick().unwrap(), 0);
        let mut tasks = tasks.lock().unwrap();
        assert_eq!(tasks.get_mut(&id).unwrap().next_run, original_next);
    }

    #[test]
    fn paused_tasks_do_not_fire() {
        let (scheduler, tasks) = scheduler_fixture(vec![]);
        let mut task = due_task(ScheduleType::Interval, "60000");
        task.status = TaskStatus::Paused;
        tasks.lock().unwrap().add(task);
        assert_eq!(scheduler.tick().unwrap(), 0);
    }
}
