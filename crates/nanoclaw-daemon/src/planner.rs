//! Planner interface and HTTP client.
//!
//! The language-model planner is an external collaborator. The daemon posts
//! one turn at a time and receives free text that should contain a fenced
//! plan block, plus an opaque session id so consecutive turns in the same
//! group reuse planner context.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use nanoclaw_types::{NanoclawError, PlannerConfig};

/// The reply text surfaced when the planner cannot produce an answer.
pub const PLANNER_FALLBACK_REPLY: &str = "could not generate a complete answer";

/// A planner turn result.
#[derive(Debug, Clone)]
pub struct PlannerReply {
    /// Free text, expected to carry a fenced plan block.
    pub text: String,
    /// Session id to persist for the group's next turn.
    pub session_id: Option<String>,
}

/// The planner interface used by the message loop and the scheduler.
pub trait Planner: Send + Sync {
    /// Run one turn. `scheduled` marks turns fired by the scheduler rather
    /// than a live user message.
    fn complete(
        &self,
        session_id: Option<&str>,
        prompt: &str,
        scheduled: bool,
    ) -> Result<PlannerReply, NanoclawError>;
}

#[derive(Serialize)]
struct TurnRequest<'a> {
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    prompt: &'a str,
    scheduled: bool,
    model: &'a str,
}

#[derive(Deserialize)]
struct TurnResponse {
    text: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Blocking HTTP planner client.
pub struct HttpPlanner {
    config: PlannerConfig,
    client: reqwest::blocking::Client,
}

impl HttpPlanner {
    /// Build the client: no redirects, explicit timeouts, fixed user-agent.
    pub fn new(config: PlannerConfig) -> Result<Self, NanoclawError> {
        config.validate()?;
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent("nanoclaw-daemon/0.1")
            .build()
            .map_err(|e| NanoclawError::PlannerError(format!("client build failed: {e}")))?;
        Ok(Self { config, client })
    }
}

impl Planner for HttpPlanner {
    fn complete(
        &self,
        session_id: Option<&str>,
        prompt: &str,
        scheduled: bool,
    ) -> Result<PlannerReply, NanoclawError> {
        let url = format!("{}/turn", self.config.base_url.trim_end_matches('/'));
        let request = TurnRequest {
            session_id,
            prompt,
            scheduled,
            model: &self.config.completion_model,
        };

        debug!(%url, scheduled, "planner turn");
        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .map_err(|e| NanoclawError::PlannerError(format!("planner unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NanoclawError::PlannerError(format!(
                "planner returned {status}: {body}"
            )));
        }

        let parsed: TurnResponse = response
            .json()
            .map_err(|e| NanoclawError::PlannerError(format!("invalid planner response: {e}")))?;

        Ok(PlannerReply {
            text: parsed.text,
            session_id: parsed.session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_request_wire_shape() {
        let request = TurnRequest {
            session_id: Some("sess-1"),
            prompt: "uptime on william",
            scheduled: false,
            model: "meta-llama/llama-3.3-70b-instruct:free",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["scheduled"], false);
        assert!(json["model"].as_str().unwrap().ends_with(":free"));
    }

    #[test]
    fn turn_response_parses_without_session() {
        let parsed: TurnResponse = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(parsed.text, "hi");
        assert!(parsed.session_id.is_none());
    }

    #[test]
    fn http_planner_rejects_paid_models() {
        let config = PlannerConfig {
            base_url: "http://127.0.0.1:4010".into(),
            api_key: None,
            completion_model: "gpt-4o".into(),
            reasoning_model: "o3".into(),
            require_free_models: true,
        };
        assert!(HttpPlanner::new(config).is_err());
    }

    #[test]
    fn unreachable_planner_is_an_error() {
        let config = PlannerConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            completion_model: "m:free".into(),
            reasoning_model: "r:free".into(),
            require_free_models: true,
        };
        let planner = HttpPlanner::new(config).unwrap();
        assert!(planner.complete(None, "hello", false).is_err());
    }
}
