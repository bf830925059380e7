//! The dispatcher: posts approved action batches to the runner.
//!
//! The dispatcher never executes anything itself. Safety filters run before
//! dispatch; violating actions become blocked results in place while the
//! rest of the batch still goes out. Results are zipped back to the original
//! action indices so callers can match inputs to outputs positionally.

use std::time::Duration;

use tracing::{info, warn};

use nanoclaw_policy::check_action;
use nanoclaw_types::{
    Action, ActionResult, DispatchEnvelope, DispatchResponse, NanoclawError, WebhookConfig,
    HEADER_DISPATCH_ID, HEADER_SIGNATURE, HEADER_SIGNATURE_TS,
};

use crate::sign::signature_header;

/// Source tag stamped into every envelope.
const DISPATCH_SOURCE: &str = "nanoclaw";

/// Outcome of dispatching one approved batch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub dispatch_id: String,
    /// One result per input action, positionally.
    pub results: Vec<ActionResult>,
    /// True only when every result succeeded.
    pub success: bool,
}

/// Signs and posts approved batches to the configured runner.
pub struct Dispatcher {
    config: WebhookConfig,
    client: reqwest::blocking::Client,
}

impl Dispatcher {
    /// Build a dispatcher with a blocking client honoring the configured
    /// timeout. Redirects are not followed.
    pub fn new(config: WebhookConfig) -> Result<Self, NanoclawError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("nanoclaw-dispatch/0.1")
            .build()
            .map_err(|e| NanoclawError::DispatchError(format!("client build failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Dispatch an approved batch.
    ///
    /// Never returns `Err` for per-action failures: transport problems and
    /// non-zero exits are folded into failed results so the gateway always
    /// has something to render per action.
    pub fn dispatch(&self, actions: &[Action]) -> Result<DispatchOutcome, NanoclawError> {
        if self.config.enable_local_approved_execution {
            // Escape hatch reserved for tests; the dispatcher itself always
            // refuses to execute locally.
            return Err(NanoclawError::DispatchError(
                "local approved execution is not supported by the dispatcher".into(),
            ));
        }

        let mut results: Vec<Option<ActionResult>> = vec![None; actions.len()];

        if !self.config.enable_approved_execution {
            for (idx, action) in actions.iter().enumerate() {
                results[idx] = Some(if action.is_executable() {
                    ActionResult::skipped(idx)
                } else {
                    ActionResult::ok(idx, "", 0)
                });
            }
            let results: Vec<ActionResult> = results.into_iter().flatten().collect();
            return Ok(DispatchOutcome {
                dispatch_id: String::new(),
                success: true,
                results,
            });
        }

        // Safety filters: violations become blocked results, everything else
        // is collected for the outbound envelope with its original index.
        let mut outgoing: Vec<(usize, Action)> = Vec::new();
        for (idx, action) in actions.iter().enumerate() {
            match check_action(action) {
                Ok(()) => outgoing.push((idx, action.clone())),
                Err(cause) => {
                    warn!(index = idx, %cause, "action blocked before dispatch");
                    results[idx] = Some(ActionResult::blocked(idx, cause));
                }
            }
        }

        let envelope = DispatchEnvelope::new(
            DISPATCH_SOURCE,
            outgoing.iter().map(|(_, a)| a.clone()).collect(),
        );
        let dispatch_id = envelope.dispatch_id.clone();

        if !outgoing.is_empty() {
            match self.post(&envelope) {
                Ok(response) => {
                    for result in response.results {
                        // The runner indexes results within the posted batch;
                        // remap to the original action index.
                        if let Some(&(orig_idx, _)) = outgoing.get(result.action_id) {
                            results[orig_idx] = Some(ActionResult {
                                action_id: orig_idx,
                                ..result
                            });
                        }
                    }
                    // Any slot the runner failed to fill is reported failed.
                    for &(orig_idx, _) in &outgoing {
                        results[orig_idx].get_or_insert_with(|| {
                            ActionResult::failed(orig_idx, 1, "no result returned by runner", 0)
                        });
                    }
                }
                Err(e) => {
                    warn!(dispatch_id = %dispatch_id, error = %e, "dispatch failed");
                    for &(orig_idx, _) in &outgoing {
                        results[orig_idx] =
                            Some(ActionResult::failed(orig_idx, 1, e.to_string(), 0));
                    }
                }
            }
        }

        let results: Vec<ActionResult> = results.into_iter().flatten().collect();
        let success = results.iter().all(ActionResult::succeeded);
        info!(dispatch_id = %dispatch_id, count = results.len(), success, "dispatch complete");

        Ok(DispatchOutcome {
            dispatch_id,
            results,
            success,
        })
    }

    fn post(&self, envelope: &DispatchEnvelope) -> Result<DispatchResponse, NanoclawError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| NanoclawError::DispatchError(format!("serialize failed: {e}")))?;
        let ts = envelope.dispatched_at.timestamp_millis().to_string();
        let signature = signature_header(&self.config.secret, &ts, &body);

        let response = self
            .client
            .post(&self.config.url)
            .header("content-type", "application/json")
            .header(HEADER_DISPATCH_ID, &envelope.dispatch_id)
            .header(HEADER_SIGNATURE_TS, &ts)
            .header(HEADER_SIGNATURE, &signature)
            .body(body)
            .send()
            .map_err(|e| NanoclawError::DispatchError(format!("runner unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NanoclawError::DispatchError(format!(
                "runner returned {status}: {body}"
            )));
        }

        response
            .json()
            .map_err(|e| NanoclawError::DispatchError(format!("invalid runner response: {e}")))
    }
}
