//! Parser and serializer for the planner's structured output.
//!
//! The planner replies with free text that may contain one fenced JSON block
//! (triple backticks, optional `json` tag). Parsing resolves in order:
//! fenced block, whole-text JSON (after stripping a leading `json` literal),
//! bare `{}` as the empty plan. Anything else is a parse error. Validation
//! rejects the whole plan on the first schema violation.

use nanoclaw_types::{Action, FetchMode, Plan};
use url::Url;

/// Regex for valid addon names.
const ADDON_NAME_PATTERN: &str = "^[a-z0-9][a-z0-9-]{0,63}$";

/// Bounds for `opencode_serve` timeouts, in seconds.
const OPENCODE_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=600;

/// Outcome of parsing planner text.
#[derive(Debug, Clone)]
pub struct PlanParse {
    /// The validated plan, when parsing and validation both succeeded.
    pub plan: Option<Plan>,
    /// One string per failure cause; empty on success.
    pub errors: Vec<String>,
    /// The raw JSON text that was parsed, when a candidate was found.
    pub raw_json: Option<String>,
}

impl PlanParse {
    fn ok(plan: Plan, raw_json: String) -> Self {
        Self {
            plan: Some(plan),
            errors: vec![],
            raw_json: Some(raw_json),
        }
    }

    fn err(errors: Vec<String>, raw_json: Option<String>) -> Self {
        Self {
            plan: None,
            errors,
            raw_json,
        }
    }

    /// Whether a valid plan was produced.
    pub fn is_ok(&self) -> bool {
        self.plan.is_some()
    }
}

/// Extract the contents of the first triple-backtick fence, tolerating an
/// optional `json` language tag after the opening fence.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open
        .strip_prefix("json")
        .map(|rest| rest.trim_start_matches([' ', '\t']))
        .unwrap_or(after_open);
    let body_start = body_start.strip_prefix('\n').unwrap_or(body_start);
    let close = body_start.find("```")?;
    Some(body_start[..close].trim())
}

/// Parse planner text into a plan per the resolution order in the module docs.
pub fn parse_plan(text: &str) -> PlanParse {
    let candidate = match extract_fenced_block(text) {
        Some(block) => block.to_string(),
        None => {
            let trimmed = text.trim();
            let trimmed = trimmed.strip_prefix("json").unwrap_or(trimmed).trim();
            trimmed.to_string()
        }
    };

    if candidate.is_empty() {
        return PlanParse::err(vec!["no JSON plan found in planner output".into()], None);
    }

    let plan: Plan = match serde_json::from_str(&candidate) {
        Ok(plan) => plan,
        Err(e) => {
            return PlanParse::err(
                vec![format!("plan JSON did not match the schema: {e}")],
                Some(candidate),
            );
        }
    };

    match validate_plan(plan) {
        Ok(plan) => PlanParse::ok(plan, candidate),
        Err(errors) => PlanParse::err(errors, Some(candidate)),
    }
}

/// Validate a parsed plan and apply fix-ups (browser fetches are forced to
/// require approval). Returns all violations found; any violation rejects
/// the whole plan.
pub fn validate_plan(mut plan: Plan) -> Result<Plan, Vec<String>> {
    let addon_name =
        regex::Regex::new(ADDON_NAME_PATTERN).expect("addon name pattern is a valid regex");
    let mut errors = Vec::new();

    for (idx, action) in plan.actions.iter_mut().enumerate() {
        match action {
            Action::WebFetch {
                url,
                mode,
                requires_approval,
                ..
            } => {
                match Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => errors.push(format!(
                        "action {idx}: web_fetch url has unsupported scheme '{}'",
                        parsed.scheme()
                    )),
                    Err(e) => errors.push(format!("action {idx}: web_fetch url is invalid: {e}")),
                }
                if *mode == FetchMode::Browser {
                    *requires_approval = true;
                }
            }
            Action::ImageToText { image_url, .. } => {
                if let Err(e) = require_http_url(image_url) {
                    errors.push(format!("action {idx}: image_to_text imageUrl: {e}"));
                }
            }
            Action::VoiceToText { audio_url, .. } => {
                if let Err(e) = require_http_url(audio_url) {
                    errors.push(format!("action {idx}: voice_to_text audioUrl: {e}"));
                }
            }
            Action::OpencodeServe { timeout, .. } => {
                if let Some(t) = timeout {
                    if !OPENCODE_TIMEOUT_RANGE.contains(t) {
                        errors.push(format!(
                            "action {idx}: opencode_serve timeout {t}s outside 1-600s"
                        ));
                    }
                }
            }
            Action::AddonInstall { name, .. }
            | Action::AddonCreate { name, .. }
            | Action::AddonRun { name, .. } => {
                if !addon_name.is_match(name) {
                    errors.push(format!("action {idx}: invalid addon name '{name}'"));
                }
            }
            Action::Reply
            | Action::Question { .. }
            | Action::Ssh { .. }
            | Action::ObsidianWrite { .. } => {}
        }
    }

    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

fn require_http_url(raw: &str) -> Result<(), String> {
    match Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!("unsupported scheme '{}'", parsed.scheme())),
        Err(e) => Err(e.to_string()),
    }
}

/// Emit the canonical fenced block for a plan.
pub fn format_plan_block(plan: &Plan) -> String {
    let json = serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string());
    format!("```json\n{json}\n```")
}

/// Remove the plan fence from a reply before it reaches the chat.
///
/// If the text that remains after removal is itself a plan-shaped JSON
/// object, it is suppressed entirely: the user never sees raw plan JSON.
pub fn strip_plan_block(text: &str) -> String {
    let stripped = match locate_fence(text) {
        Some((start, end)) => {
            let mut s = String::with_capacity(text.len());
            s.push_str(&text[..start]);
            s.push_str(&text[end..]);
            s
        }
        None => text.to_string(),
    };

    let trimmed = stripped.trim();
    if looks_like_plan_json(trimmed) {
        return String::new();
    }
    trimmed.to_string()
}

/// Byte span of the first fenced block, including the fence markers.
fn locate_fence(text: &str) -> Option<(usize, usize)> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let close = rest.find("```")?;
    Some((start, start + 3 + close + 3))
}

fn looks_like_plan_json(text: &str) -> bool {
    if !text.starts_with('{') {
        return false;
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => {
            map.is_empty() || map.get("actions").map(|v| v.is_array()).unwrap_or(false)
        }
        _ => false,
    }
}

/// The fixed JSON-only re-prompt sent when the planner's first answer had no
/// valid plan. Must be answered with only the fenced block.
pub fn repair_prompt(errors: &[String]) -> String {
    let causes = if errors.is_empty() {
        "no plan block was found".to_string()
    } else {
        errors.join("; ")
    };
    format!(
        "Your previous reply did not contain a valid plan ({causes}).\n\
         Respond with ONLY a fenced ```json block containing an object of the form\n\
         {{\"actions\": [...]}}. Each action object carries a \"type\" field, one of:\n\
         reply, question, ssh, obsidian_write, web_fetch, image_to_text, voice_to_text,\n\
         opencode_serve, addon_install, addon_create, addon_run. Executable actions\n\
         require \"reason\" and \"requiresApproval\". ssh targets are limited to\n\
         \"william\" and \"willy-ubuntu\". web_fetch urls must be absolute http/https.\n\
         Do not include any prose outside the fence."
    )
}
