//! Outbound web fetches: plain HTTP and the headless-browser path with its
//! readable-mirror fallback.

use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use nanoclaw_types::{ActionResult, RunnerConfig};

/// Body bytes returned to the caller.
const MAX_BODY_BYTES: usize = 12_000;

fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Plain GET with a fixed user-agent, following redirects, bounded body.
/// The result carries a short metadata header before the body.
pub async fn http_fetch(
    client: &reqwest::Client,
    config: &RunnerConfig,
    action_id: usize,
    url: &str,
) -> ActionResult {
    let started = Instant::now();
    let response = match client
        .get(url)
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return ActionResult::failed(
                action_id,
                1,
                format!("fetch failed: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            return ActionResult::failed(
                action_id,
                1,
                format!("reading body failed: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let stdout = format!(
        "url: {final_url}\nstatus: {status}\ncontent-type: {content_type}\n\n{}",
        clip(&body, MAX_BODY_BYTES)
    );

    ActionResult::ok(action_id, stdout, started.elapsed().as_millis() as u64)
}

/// Headless-browser navigation; falls back to the readable mirror when no
/// driver is configured or the driver fails. Both failing is an error, never
/// a silent empty success.
pub async fn browser_fetch(
    client: &reqwest::Client,
    config: &RunnerConfig,
    action_id: usize,
    url: &str,
) -> ActionResult {
    let started = Instant::now();

    if !config.browser_binary.is_empty() {
        match drive_browser(config, url).await {
            Ok((title, text)) => {
                let stdout = format!("title: {title}\n\n{}", clip(&text, MAX_BODY_BYTES));
                return ActionResult::ok(action_id, stdout, started.elapsed().as_millis() as u64);
            }
            Err(e) => {
                warn!(%url, error = %e, "browser driver failed, trying readable mirror");
            }
        }
    } else {
        debug!(%url, "no browser driver configured, using readable mirror");
    }

    match mirror_fetch(client, config, url).await {
        Ok(text) => ActionResult::ok(
            action_id,
            clip(&text, MAX_BODY_BYTES).to_string(),
            started.elapsed().as_millis() as u64,
        ),
        Err(e) => ActionResult::failed(
            action_id,
            1,
            format!("browser fetch failed and mirror fallback failed: {e}"),
            started.elapsed().as_millis() as u64,
        ),
    }
}

/// Run the configured headless browser to DOM-content-loaded and dump the
/// rendered document. Returns (title, text).
async fn drive_browser(config: &RunnerConfig, url: &str) -> Result<(String, String), String> {
    let output = Command::new(&config.browser_binary)
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--virtual-time-budget=5000")
        .arg("--dump-dom")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(config.fetch_timeout_secs), output)
        .await
        .map_err(|_| "browser timed out".to_string())?
        .map_err(|e| format!("browser spawn failed: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "browser exited with {}",
            output.status.code().unwrap_or(-1)
        ));
    }

    let dom = String::from_utf8_lossy(&output.stdout);
    if dom.trim().is_empty() {
        return Err("browser produced no output".into());
    }

    let title = Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
        .ok()
        .and_then(|re| re.captures(&dom))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    Ok((title, strip_tags(&dom)))
}

/// Fetch the readable-mirror rendition of a page.
async fn mirror_fetch(
    client: &reqwest::Client,
    config: &RunnerConfig,
    url: &str,
) -> Result<String, String> {
    let mirror_url = format!(
        "{}/{url}",
        config.readable_mirror_url.trim_end_matches('/')
    );
    let response = client
        .get(&mirror_url)
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .send()
        .await
        .map_err(|e| format!("mirror unreachable: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("mirror returned {}", response.status()));
    }

    let text = response
        .text()
        .await
        .map_err(|e| format!("mirror body unreadable: {e}"))?;
    if text.trim().is_empty() {
        return Err("mirror returned empty content".into());
    }
    Ok(text)
}

/// Drop tags (and script/style bodies) from HTML, collapsing whitespace.
pub fn strip_tags(html: &str) -> String {
    let without_blocks = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
        .map(|re| re.replace_all(html, " ").into_owned())
        .unwrap_or_else(|_| html.to_string());
    let without_tags = Regex::new(r"<[^>]+>")
        .map(|re| re.replace_all(&without_blocks, " ").into_owned())
        .unwrap_or(without_blocks);

    let mut out = String::with_capacity(without_tags.len());
    let mut prev_ws = false;
    for ch in without_tags.chars() {
        if ch.is_whitespace() {
            if !prev_ws {
                out.push(' ');
            }
            prev_ws = true;
        } else {
            out.push(ch);
            prev_ws = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_markup_and_scripts() {
        let html = "<html><head><script>var x;</script><title>T</title></head>\
                    <body><p>Hello <b>world</b></p></body></html>";
        let text = strip_tags(html);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("var x"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        // "é" spans bytes 1..3; clipping at 2 must back off to the boundary.
        assert_eq!(clip("héllo", 2), "h");
        assert_eq!(clip("héllo", 3), "hé");
    }

    #[test]
    fn clip_noop_when_short() {
        assert_eq!(clip("short", 100), "short");
    }
}
