//! Long-running code tasks: synchronous foreground posts and background
//! runs tracked in the run registry with abort handles.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use nanoclaw_store::RunRegistry;
use nanoclaw_types::{ActionResult, Run, RunStatus, RunUpdate, RunnerConfig};

use crate::cancel::CancelRegistry;
use crate::forward::post_opencode_task;

/// Default task timeout when the action did not set one.
const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Characters of the task text kept as the run summary.
const SUMMARY_LEN: usize = 120;

fn summarize(task: &str) -> String {
    let trimmed = task.trim();
    match trimmed.char_indices().nth(SUMMARY_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Run a foreground opencode task synchronously and return its body.
pub async fn run_foreground(
    client: &reqwest::Client,
    config: &RunnerConfig,
    action_id: usize,
    task: &str,
    cwd: Option<&str>,
    timeout_secs: Option<u64>,
) -> ActionResult {
    let started = Instant::now();
    let timeout = timeout_secs.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS);
    match post_opencode_task(client, config, task, cwd, "foreground", timeout).await {
        Ok(body) => ActionResult::ok(action_id, body, started.elapsed().as_millis() as u64),
        Err(e) => ActionResult::failed(action_id, 1, e, started.elapsed().as_millis() as u64),
    }
}

/// Start a background run: create the queued row, spawn the worker, and
/// return a synthetic result announcing the run id immediately.
#[allow(clippy::too_many_arguments)]
pub fn start_background(
    client: reqwest::Client,
    config: RunnerConfig,
    registry: Arc<Mutex<RunRegistry>>,
    cancels: CancelRegistry,
    action_id: usize,
    task: String,
    cwd: Option<String>,
    timeout_secs: Option<u64>,
) -> ActionResult {
    let run = Run::queued("opencode_serve", Some(summarize(&task)));
    let run_id = run.id.clone();

    {
        let registry = registry.lock().expect("run registry lock poisoned");
        if let Err(e) = registry.create(&run) {
            return ActionResult::failed(action_id, 1, format!("failed to create run: {e}"), 0);
        }
    }

    let cancel_rx = cancels.register(&run_id);
    let worker_id = run_id.clone();
    tokio::spawn(async move {
        run_worker(
            client, config, registry, cancels, worker_id, task, cwd, timeout_secs, cancel_rx,
        )
        .await;
    });

    info!(run_id = %run_id, "background run started");
    ActionResult::ok(
        action_id,
        format!("background run started: runId={run_id}"),
        0,
    )
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    client: reqwest::Client,
    config: RunnerConfig,
    registry: Arc<Mutex<RunRegistry>>,
    cancels: CancelRegistry,
    run_id: String,
    task: String,
    cwd: Option<String>,
    timeout_secs: Option<u64>,
    cancel_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let apply = |update: RunUpdate| {
        let registry = registry.lock().expect("run registry lock poisoned");
        if let Err(e) = registry.update(&run_id, &update) {
            warn!(run_id = %run_id, error = %e, "run update failed");
        }
    };

    // A cancel may have landed while the run was still queued.
    let already_cancelled = {
        let registry = registry.lock().expect("run registry lock poisoned");
        registry
            .get(&run_id)
            .ok()
            .flatten()
            .map(|r| r.cancel_requested)
            .unwrap_or(false)
    };
    if already_cancelled {
        apply(RunUpdate {
            status: Some(RunStatus::Cancelled),
            completed_at: Some(Utc::now()),
            ..RunUpdate::default()
        });
        cancels.remove(&run_id);
        return;
    }

    apply(RunUpdate {
        status: Some(RunStatus::Running),
        started_at: Some(Utc::now()),
        ..RunUpdate::default()
    });

    let timeout = timeout_secs.unwrap_or(DEFAULT_TASK_TIMEOUT_SECS);
    let request = post_opencode_task(
        &client,
        &config,
        &task,
        cwd.as_deref(),
        "background",
        timeout,
    );

    tokio::select! {
        outcome = request => {
            let update = match outcome {
                Ok(body) => RunUpdate {
                    status: Some(RunStatus::Completed),
                    completed_at: Some(Utc::now()),
                    result_text: Some(body),
                    ..RunUpdate::default()
                },
                Err(e) => RunUpdate {
                    status: Some(RunStatus::Failed),
                    completed_at: Some(Utc::now()),
                    error_text: Some(e),
                    ..RunUpdate::default()
                },
            };
            apply(update);
        }
        _ = cancel_rx => {
            // Abort: the in-flight request future is dropped here. Partial
            // output is discarded.
            info!(run_id = %run_id, "background run cancelled");
            apply(RunUpdate {
                status: Some(RunStatus::Cancelled),
                completed_at: Some(Utc::now()),
                ..RunUpdate::default()
            });
        }
    }

    cancels.remove(&run_id);
}
