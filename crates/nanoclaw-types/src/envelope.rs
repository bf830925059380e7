//! Dispatch wire types: the signed envelope posted to the runner and the
//! per-action result records that come back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;

/// The fixed event name carried in every dispatch body.
pub const DISPATCH_EVENT: &str = "approved_actions.dispatch";

/// Header carrying the dispatch id.
pub const HEADER_DISPATCH_ID: &str = "x-nanoclaw-dispatch-id";
/// Header carrying the signature timestamp (unix ms as string).
pub const HEADER_SIGNATURE_TS: &str = "x-nanoclaw-signature-ts";
/// Header carrying the signature (`sha256=<hex>`).
pub const HEADER_SIGNATURE: &str = "x-nanoclaw-signature";
/// Header gating the run-management API.
pub const HEADER_RUNNER_SECRET: &str = "x-ops-runner-secret";

/// The signed batch of approved actions posted to the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEnvelope {
    pub event: String,
    pub dispatch_id: String,
    pub dispatched_at: DateTime<Utc>,
    pub source: String,
    pub actions: Vec<Action>,
}

impl DispatchEnvelope {
    /// Build an envelope with a fresh dispatch id.
    pub fn new(source: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            event: DISPATCH_EVENT.to_string(),
            dispatch_id: Uuid::new_v4().to_string(),
            dispatched_at: Utc::now(),
            source: source.into(),
            actions,
        }
    }
}

/// The outcome of executing one action, positionally zipped to its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Index of the action in the dispatched batch.
    pub action_id: usize,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ActionResult {
    /// A successful result.
    pub fn ok(action_id: usize, stdout: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            action_id,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            executed_at: Utc::now(),
            duration_ms,
        }
    }

    /// A failed result with the given exit code and stderr text.
    pub fn failed(
        action_id: usize,
        exit_code: i32,
        stderr: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            action_id,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            executed_at: Utc::now(),
            duration_ms,
        }
    }

    /// A result for an action blocked by a safety policy before execution.
    /// Blocked actions never leave the process.
    pub fn blocked(action_id: usize, cause: impl Into<String>) -> Self {
        Self::failed(action_id, 1, cause, 0)
    }

    /// A result for an action skipped because approved execution is disabled.
    pub fn skipped(action_id: usize) -> Self {
        Self {
            action_id,
            stdout: "skipped: approved execution disabled".into(),
            stderr: String::new(),
            exit_code: 0,
            executed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// The runner's reply to a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub dispatch_id: String,
    pub results: Vec<ActionResult>,
}
