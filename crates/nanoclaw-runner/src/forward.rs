//! Forwarding actions to configured JSON endpoints: image/voice
//! transcription and the opencode task service.

use std::time::{Duration, Instant};

use serde_json::json;

use nanoclaw_types::{ActionResult, RunnerConfig};

/// Response bytes returned to the caller.
const MAX_RESPONSE_BYTES: usize = 12_000;

fn clip(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}

/// POST a transcription request (`{imageUrl, prompt?}` or
/// `{audioUrl, language}`) with the configured bearer token.
pub async fn transcribe(
    client: &reqwest::Client,
    config: &RunnerConfig,
    action_id: usize,
    payload: serde_json::Value,
) -> ActionResult {
    let started = Instant::now();

    if config.transcribe_url.is_empty() {
        return ActionResult::failed(
            action_id,
            1,
            "transcription endpoint not configured",
            0,
        );
    }

    let response = match client
        .post(&config.transcribe_url)
        .bearer_auth(&config.transcribe_token)
        .json(&payload)
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ActionResult::failed(
                action_id,
                1,
                format!("transcription request failed: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let duration_ms = started.elapsed().as_millis() as u64;

    if !status.is_success() {
        return ActionResult::failed(
            action_id,
            1,
            format!("transcription endpoint returned {status}: {body}"),
            duration_ms,
        );
    }

    ActionResult::ok(action_id, clip(body, MAX_RESPONSE_BYTES), duration_ms)
}

/// Build the transcription payload for an image action.
pub fn image_payload(image_url: &str, prompt: Option<&str>) -> serde_json::Value {
    match prompt {
        Some(prompt) => json!({ "imageUrl": image_url, "prompt": prompt }),
        None => json!({ "imageUrl": image_url }),
    }
}

/// Build the transcription payload for a voice action.
pub fn voice_payload(audio_url: &str, language: Option<&str>) -> serde_json::Value {
    json!({ "audioUrl": audio_url, "language": language.unwrap_or("auto") })
}

/// POST an opencode task and return the endpoint's body.
pub async fn post_opencode_task(
    client: &reqwest::Client,
    config: &RunnerConfig,
    task: &str,
    cwd: Option<&str>,
    execution_mode: &str,
    timeout_secs: u64,
) -> Result<String, String> {
    let body = json!({
        "task": task,
        "cwd": cwd,
        "executionMode": execution_mode,
    });

    let response = client
        .post(&config.opencode_url)
        .json(&body)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(|e| format!("opencode endpoint unreachable: {e}"))?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(format!("opencode endpoint returned {status}: {text}"));
    }
    Ok(clip(text, MAX_RESPONSE_BYTES))
}
