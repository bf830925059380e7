//! Action execution ordering.
//!
//! Ungrouped actions run serially in declaration order. Actions carrying a
//! `parallelGroup` run concurrently afterwards, bounded by `max_parallel`
//! (grouping is advisory: admission is by semaphore, not per group). Every
//! result is written back to the index of its originating action.

use std::sync::Arc;

use tokio::sync::Semaphore;

use nanoclaw_types::{Action, ActionResult, ExecutionMode};

use crate::server::AppState;
use crate::{fetch, forward, opencode, ssh};

/// Execute a dispatched batch and return one result per action, positionally.
pub async fn execute_actions(state: Arc<AppState>, actions: Vec<Action>) -> Vec<ActionResult> {
    let mut results: Vec<Option<ActionResult>> = (0..actions.len()).map(|_| None).collect();
    let mut grouped: Vec<(usize, Action)> = Vec::new();

    for (idx, action) in actions.into_iter().enumerate() {
        if action.parallel_group().is_some() {
            grouped.push((idx, action));
        } else {
            results[idx] = Some(execute_one(&state, idx, action).await);
        }
    }

    if !grouped.is_empty() {
        let semaphore = Arc::new(Semaphore::new(state.config.max_parallel.max(1)));
        let tasks = grouped.into_iter().map(|(idx, action)| {
            let state = state.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                (idx, execute_one(&state, idx, action).await)
            }
        });
        for (idx, result) in futures::future::join_all(tasks).await {
            results[idx] = Some(result);
        }
    }

    results.into_iter().flatten().collect()
}

/// Execute a single action.
async fn execute_one(state: &Arc<AppState>, idx: usize, action: Action) -> ActionResult {
    match action {
        Action::Reply | Action::Question { .. } => ActionResult::ok(idx, "", 0),
        Action::Ssh {
            target, command, ..
        } => ssh::run_ssh(&state.config, idx, target, &command).await,
        Action::WebFetch { url, mode, .. } => match mode {
            nanoclaw_types::FetchMode::Http => {
                fetch::http_fetch(&state.http, &state.config, idx, &url).await
            }
            nanoclaw_types::FetchMode::Browser => {
                fetch::browser_fetch(&state.http, &state.config, idx, &url).await
            }
        },
        Action::ImageToText {
            image_url, prompt, ..
        } => {
            let payload = forward::image_payload(&image_url, prompt.as_deref());
            forward::transcribe(&state.http, &state.config, idx, payload).await
        }
        Action::VoiceToText {
            audio_url,
            language,
            ..
        } => {
            let payload = forward::voice_payload(&audio_url, language.as_deref());
            forward::transcribe(&state.http, &state.config, idx, payload).await
        }
        Action::OpencodeServe {
            task,
            cwd,
            timeout,
            execution_mode,
            ..
        } => match execution_mode.unwrap_or(ExecutionMode::Foreground) {
            ExecutionMode::Foreground => {
                opencode::run_foreground(
                    &state.http,
                    &state.config,
                    idx,
                    &task,
                    cwd.as_deref(),
                    timeout,
                )
                .await
            }
            ExecutionMode::Background => opencode::start_background(
                state.http.clone(),
                state.config.clone(),
                state.registry.clone(),
                state.cancels.clone(),
                idx,
                task,
                cwd,
                timeout,
            ),
        },
        other @ (Action::ObsidianWrite { .. }
        | Action::AddonInstall { .. }
        | Action::AddonCreate { .. }
        | Action::AddonRun { .. }) => ActionResult::failed(
            idx,
            1,
            format!("no executor for action type {}", other.kind()),
            0,
        ),
    }
}
