//! Fallback `web_fetch` injection.
//!
//! When the user message contains a bare URL or domain and the parsed plan
//! carries no `web_fetch`, one is synthesized and appended before the plan is
//! enqueued. The fetch mode is inferred from a small closed set of domains
//! that only render under a browser.

use nanoclaw_types::{Action, FetchMode, Plan};
use regex::Regex;
use url::Url;

/// Domains whose pages are dynamic enough to need the browser mode.
const DYNAMIC_PAGE_DOMAINS: &[&str] = &[
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "linkedin.com",
    "reddit.com",
    "youtube.com",
];

fn url_pattern() -> Regex {
    Regex::new(r"https?://[^\s<>()\[\]]+").expect("url pattern is a valid regex")
}

fn domain_pattern() -> Regex {
    // Bare domain like "example.com" or "docs.example.co.uk"; requires at
    // least one dot and an alphabetic final label.
    Regex::new(r"(?:^|\s)((?:[a-z0-9-]+\.)+[a-z]{2,})(?:/[^\s]*)?(?:\s|$)")
        .expect("domain pattern is a valid regex")
}

/// Find the first URL (or bare domain, normalized to https) in a message.
pub fn detect_url(text: &str) -> Option<String> {
    if let Some(m) = url_pattern().find(text) {
        let raw = m.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
        return Some(raw.to_string());
    }

    let lowered = text.to_lowercase();
    if let Some(caps) = domain_pattern().captures(&lowered) {
        let domain = caps.get(1)?.as_str();
        // Skip filename-looking matches such as "notes.md".
        let last_label = domain.rsplit('.').next()?;
        if matches!(last_label, "md" | "txt" | "rs" | "json" | "toml" | "log") {
            return None;
        }
        return Some(format!("https://{domain}"));
    }

    None
}

/// Whether a URL's host is in the dynamic-page set (matched on the
/// registrable suffix, so `www.reddit.com` counts).
pub fn needs_browser(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    DYNAMIC_PAGE_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Append a synthesized `web_fetch` when the user shared a link and the plan
/// does not already fetch anything. Runs only after a successful parse,
/// before enqueue. Returns `true` when an action was injected.
pub fn inject_fallback_fetch(plan: &mut Plan, user_text: &str) -> bool {
    let already_fetches = plan
        .actions
        .iter()
        .any(|a| matches!(a, Action::WebFetch { .. }));
    if already_fetches {
        return false;
    }

    let Some(url) = detect_url(user_text) else {
        return false;
    };

    let mode = if needs_browser(&url) {
        FetchMode::Browser
    } else {
        FetchMode::Http
    };

    plan.actions.push(Action::WebFetch {
        url,
        reason: "user shared a link".into(),
        requires_approval: true,
        mode,
        extract: None,
        execution_mode: None,
        parallel_group: None,
    });
    true
}
