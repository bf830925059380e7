//! SQLite-backed run registry.
//!
//! Durable record of background runs. The dispatcher-spawned workers are the
//! only mutators of run rows; the HTTP API reads them and flips
//! `cancel_requested`.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use nanoclaw_types::{NanoclawError, Run, RunStatus, RunUpdate};

/// Hard cap on `list()` results.
pub const LIST_CAP: usize = 100;

/// The registry of background runs.
pub struct RunRegistry {
    conn: Connection,
}

impl RunRegistry {
    /// Open (or create) the registry at the given path. Enables WAL mode and
    /// creates the `runs` table if absent.
    pub fn open(path: &Path) -> Result<Self, NanoclawError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NanoclawError::RegistryError(format!("create dir failed: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| NanoclawError::RegistryError(format!("failed to open database: {e}")))?;
        Self::init(conn)
    }

    /// Open an in-memory registry (tests).
    pub fn open_in_memory() -> Result<Self, NanoclawError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NanoclawError::RegistryError(format!("failed to open database: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, NanoclawError> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                action_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                summary TEXT,
                result_text TEXT,
                error_text TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);",
        )
        .map_err(|e| NanoclawError::RegistryError(format!("failed to create schema: {e}")))?;

        Ok(Self { conn })
    }

    /// Insert a new run row.
    pub fn create(&self, run: &Run) -> Result<(), NanoclawError> {
        self.conn
            .execute(
                "INSERT INTO runs (id, action_type, status, created_at, started_at, completed_at,
                                   summary, result_text, error_text, cancel_requested)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id,
                    run.action_type,
                    run.status.as_str(),
                    run.created_at.to_rfc3339(),
                    run.started_at.map(|t| t.to_rfc3339()),
                    run.completed_at.map(|t| t.to_rfc3339()),
                    run.summary,
                    run.result_text,
                    run.error_text,
                    run.cancel_requested as i64,
                ],
            )
            .map_err(|e| NanoclawError::RegistryError(format!("insert failed: {e}")))?;
        info!(id = %run.id, action_type = %run.action_type, "run created");
        Ok(())
    }

    /// Apply a partial update to a run row. Fields left `None` are untouched.
    pub fn update(&self, id: &str, update: &RunUpdate) -> Result<(), NanoclawError> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = update.status {
            sets.push(format!("status = ?{}", values.len() + 1));
            values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(started_at) = update.started_at {
            sets.push(format!("started_at = ?{}", values.len() + 1));
            values.push(Box::new(started_at.to_rfc3339()));
        }
        if let Some(completed_at) = update.completed_at {
            sets.push(format!("completed_at = ?{}", values.len() + 1));
            values.push(Box::new(completed_at.to_rfc3339()));
        }
        if let Some(ref result_text) = update.result_text {
            sets.push(format!("result_text = ?{}", values.len() + 1));
            values.push(Box::new(result_text.clone()));
        }
        if let Some(ref error_text) = update.error_text {
            sets.push(format!("error_text = ?{}", values.len() + 1));
            values.push(Box::new(error_text.clone()));
        }
        if let Some(cancel_requested) = update.cancel_requested {
            sets.push(format!("cancel_requested = ?{}", values.len() + 1));
            values.push(Box::new(cancel_requested as i64));
        }

        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE runs SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len() + 1
        );
        values.push(Box::new(id.to_string()));

        let changed = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(|e| NanoclawError::RegistryError(format!("update failed: {e}")))?;

        if changed == 0 {
            return Err(NanoclawError::RegistryError(format!("unknown run: {id}")));
        }
        Ok(())
    }

    /// Fetch one run.
    pub fn get(&self, id: &str) -> Result<Option<Run>, NanoclawError> {
        self.conn
            .query_row(
                "SELECT id, action_type, status, created_at, started_at, completed_at,
                        summary, result_text, error_text, cancel_requested
                 FROM runs WHERE id = ?1",
                params![id],
                row_to_run,
            )
            .optional()
            .map_err(|e| NanoclawError::RegistryError(format!("query failed: {e}")))
    }

    /// List runs, newest first, capped at [`LIST_CAP`].
    pub fn list(&self, limit: usize) -> Result<Vec<Run>, NanoclawError> {
        let limit = limit.min(LIST_CAP);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, action_type, status, created_at, started_at, completed_at,
                        summary, result_text, error_text, cancel_requested
                 FROM runs ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .map_err(|e| NanoclawError::RegistryError(format!("prepare failed: {e}")))?;

        let rows = stmt
            .query_map(params![limit as i64], row_to_run)
            .map_err(|e| NanoclawError::RegistryError(format!("query failed: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| NanoclawError::RegistryError(format!("read failed: {e}")))
    }

    /// Mark a run as cancel-requested. Returns the updated row, or `None`
    /// for unknown ids. Terminal runs are returned unchanged.
    pub fn request_cancel(&self, id: &str) -> Result<Option<Run>, NanoclawError> {
        let Some(run) = self.get(id)? else {
            return Ok(None);
        };
        if run.status.is_terminal() {
            return Ok(Some(run));
        }
        self.update(
            id,
            &RunUpdate {
                cancel_requested: Some(true),
                ..RunUpdate::default()
            },
        )?;
        self.get(id)
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status_str: String = row.get(2)?;
    let status = RunStatus::parse(&status_str).unwrap_or(RunStatus::Failed);
    Ok(Run {
        id: row.get(0)?,
        action_type: row.get(1)?,
        status,
        created_at: parse_ts(row, 3)?,
        started_at: parse_opt_ts(row, 4)?,
        completed_at: parse_opt_ts(row, 5)?,
        summary: row.get(6)?,
        result_text: row.get(7)?,
        error_text: row.get(8)?,
        cancel_requested: row.get::<_, i64>(9)? != 0,
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(Into::into)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.into()))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> Run {
        Run::queued("opencode_serve", Some("refactor module".into()))
    }

    #[test]
    fn create_and_get() {
        let registry = RunRegistry::open_in_memory().unwrap();
        let run = sample_run();
        registry.create(&run).unwrap();

        let loaded = registry.get(&run.id).unwrap().unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.summary.as_deref(), Some("refactor module"));
        assert!(!loaded.cancel_requested);
    }

    #[test]
    fn get_unknown_is_none() {
        let registry = RunRegistry::open_in_memory().unwrap();
        assert!(registry.get("run-nope").unwrap().is_none());
    }

    #[test]
    fn partial_update_lifecycle() {
        let registry = RunRegistry::open_in_memory().unwrap();
        let run = sample_run();
        registry.create(&run).unwrap();

        registry
            .update(
                &run.id,
                &RunUpdate {
                    status: Some(RunStatus::Running),
                    started_at: Some(Utc::now()),
                    ..RunUpdate::default()
                },
            )
            .unwrap();
        let mid = registry.get(&run.id).unwrap().unwrap();
        assert_eq!(mid.status, RunStatus::Running);
        assert!(mid.started_at.is_some());
        assert!(mid.completed_at.is_none());

        registry
            .update(
                &run.id,
                &RunUpdate {
                    status: Some(RunStatus::Completed),
                    completed_at: Some(Utc::now()),
                    result_text: Some("done".into()),
                    ..RunUpdate::default()
                },
            )
            .unwrap();
        let done = registry.get(&run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.result_text.as_deref(), Some("done"));
        // Earlier fields survive the partial update.
        assert!(done.started_at.is_some());
    }

    #[test]
    fn update_unknown_run_errors() {
        let registry = RunRegistry::open_in_memory().unwrap();
        let err = registry.update("run-ghost", &RunUpdate::status(RunStatus::Running));
        assert!(err.is_err());
    }

    #[test]
    fn list_newest_first_and_capped() {
        let registry = RunRegistry::open_in_memory().unwrap();
        for _ in 0..5 {
            registry.create(&sample_run()).unwrap();
        }
        let listed = registry.list(3).unwrap();
        assert_eq!(listed.len(), 3);

        let all = registry.list(1000).unwrap();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[test]
    fn request_cancel_sets_flag() {
        let registry = RunRegistry::open_in_memory().unwrap();
        let run = sample_run();
        registry.create(&run).unwrap();

        let updated = registry.request_cancel(&run.id).unwrap().unwrap();
        assert!(updated.cancel_requested);
        assert_eq!(updated.status, RunStatus::Queued);
    }

    #[test]
    fn request_cancel_on_terminal_run_is_a_noop() {
        let registry = RunRegistry::open_in_memory().unwrap();
        let run = sample_run();
        registry.create(&run).unwrap();
        registry
            .update(&run.id, &RunUpdate::status(RunStatus::Completed))
            .unwrap();

        let after = registry.request_cancel(&run.id).unwrap().unwrap();
        assert_eq!(after.status, RunStatus::Completed);
        assert!(!after.cancel_requested);
    }

    #[test]
    fn registry_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let run = sample_run();
        {
            let registry = RunRegistry::open(&path).unwrap();
            registry.create(&run).unwrap();
        }
        let registry = RunRegistry::open(&path).unwrap();
        assert!(registry.get(&run.id).unwrap().is_some());
    }
}
