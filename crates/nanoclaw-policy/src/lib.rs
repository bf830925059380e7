//! Safety filters applied before any approved action is dispatched.
//!
//! Two independent gates: the read-only ssh command allowlist and the
//! SSRF-safe web fetch validator. Both return human-readable causes that the
//! dispatcher turns into blocked results without ever dispatching the action.

pub mod ssh;
pub mod web;

use nanoclaw_types::{Action, FetchMode};

pub use ssh::check_ssh_command;
pub use web::{is_private_ip, validate_fetch_url};

/// The cause string surfaced for blocked fetches.
pub const WEB_FETCH_BLOCK_CAUSE: &str = "URL blocked by web fetch safety policy";

/// Evaluate one action against every applicable safety filter.
///
/// `Ok(())` means the action may be dispatched. `Err` carries the cause to
/// surface in the blocked result. Actions without a filter always pass.
pub fn check_action(action: &Action) -> Result<(), String> {
    match action {
        Action::Ssh { command, .. } => {
            check_ssh_command(command).map_err(|cause| format!("ssh command blocked: {cause}"))
        }
        Action::WebFetch {
            url,
            mode,
            requires_approval,
            ..
        } => {
            if *mode == FetchMode::Browser && !requires_approval {
                return Err("browser fetch without approval is not allowed".into());
            }
            validate_fetch_url(url)
                .map(|_| ())
                .map_err(|_| WEB_FETCH_BLOCK_CAUSE.to_string())
        }
        Action::ImageToText { image_url, .. } => validate_fetch_url(image_url)
            .map(|_| ())
            .map_err(|_| WEB_FETCH_BLOCK_CAUSE.to_string()),
        Action::VoiceToText { audio_url, .. } => validate_fetch_url(audio_url)
            .map(|_| ())
            .map_err(|_| WEB_FETCH_BLOCK_CAUSE.to_string()),
        _ => Ok(()),
    }
}
