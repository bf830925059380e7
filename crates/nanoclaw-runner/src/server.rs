//! The runner's HTTP surface.
//!
//! `/dispatch` authenticates by HMAC over `ts + "." + body`; the run
//! management routes require the shared secret header. Signature failures
//! are 401 with no side effect.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use nanoclaw_dispatch::{now_ms, verify};
use nanoclaw_store::RunRegistry;
use nanoclaw_types::{
    DispatchEnvelope, DispatchResponse, RunnerConfig, HEADER_RUNNER_SECRET, HEADER_SIGNATURE,
    HEADER_SIGNATURE_TS,
};

use crate::cancel::CancelRegistry;
use crate::exec::execute_actions;

/// Shared state behind every handler.
pub struct AppState {
    pub config: RunnerConfig,
    pub registry: Arc<Mutex<RunRegistry>>,
    pub cancels: CancelRegistry,
    pub http: reqwest::Client,
}

impl AppState {
    /// Build the state, including the outbound HTTP client used by the
    /// fetch and forwarding executors.
    pub fn new(config: RunnerConfig, registry: RunRegistry) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("nanoclaw-runner/0.1")
            .build()
            .unwrap_or_default();
        Self {
            config,
            registry: Arc::new(Mutex::new(registry)),
            cancels: CancelRegistry::new(),
            http,
        }
    }
}

/// Build the runner router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .route("/runs", get(list_runs))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/cancel", post(cancel_run))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now().to_rfc3339() }))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !state.config.dispatch_secret.is_empty() {
        let ts = header_str(&headers, HEADER_SIGNATURE_TS);
        let signature = header_str(&headers, HEADER_SIGNATURE);
        let valid = match (ts, signature) {
            (Some(ts), Some(signature)) => verify(
                &state.config.dispatch_secret,
                ts,
                &body,
                signature,
                now_ms(),
            ),
            _ => false,
        };
        if !valid {
            warn!("dispatch rejected: invalid or missing signature");
            return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
        }
    }

    let envelope: DispatchEnvelope = match serde_json::from_str(&body) {
        Ok(env) => env,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid dispatch body: {e}"))
                .into_response();
        }
    };

    info!(
        dispatch_id = %envelope.dispatch_id,
        actions = envelope.actions.len(),
        "dispatch accepted"
    );

    let dispatch_id = envelope.dispatch_id.clone();
    let results = execute_actions(state, envelope.actions).await;
    let success = results.iter().all(|r| r.succeeded());

    Json(DispatchResponse {
        success,
        dispatch_id,
        results,
    })
    .into_response()
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    let listed = {
        let registry = state.registry.lock().expect("run registry lock poisoned");
        registry.list(params.limit)
    };
    match listed {
        Ok(runs) => Json(json!({ "runs": runs })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    let found = {
        let registry = state.registry.lock().expect("run registry lock poisoned");
        registry.get(&id)
    };
    match found {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "unknown run").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    let updated = {
        let registry = state.registry.lock().expect("run registry lock poisoned");
        registry.request_cancel(&id)
    };

    match updated {
        Ok(Some(run)) => {
            // Abort the in-flight upstream call, if a worker holds a handle.
            let aborted = state.cancels.cancel(&id);
            info!(run_id = %id, aborted, "cancel requested");
            Json(run).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "unknown run").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if state.config.runner_secret.is_empty() {
        return Ok(());
    }
    let provided = header_str(headers, HEADER_RUNNER_SECRET).unwrap_or("");
    if provided != state.config.runner_secret {
        return Err((StatusCode::UNAUTHORIZED, "invalid runner secret").into_response());
    }
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
