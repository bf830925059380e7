//! Remote shell execution over outbound ssh.
//!
//! Hostnames come from the closed target map; the invocation runs in batch
//! mode with no pty and no stdin. The wall-clock timeout escalates
//! SIGTERM -> SIGKILL. Captured output is bounded and tail-truncated.

use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use nanoclaw_types::{ActionResult, RunnerConfig, SshTarget};

/// Stdout capture bound in bytes.
const MAX_STDOUT_BYTES: usize = 100_000;
/// Stderr capture bound in bytes.
const MAX_STDERR_BYTES: usize = 10_000;
/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Keep the first `max` bytes, dropping the tail. Marks truncation.
pub fn truncate_tail(mut bytes: Vec<u8>, max: usize) -> (String, bool) {
    let truncated = bytes.len() > max;
    if truncated {
        bytes.truncate(max);
    }
    (String::from_utf8_lossy(&bytes).into_owned(), truncated)
}

/// Execute a command on a named target.
pub async fn run_ssh(
    config: &RunnerConfig,
    action_id: usize,
    target: SshTarget,
    command: &str,
) -> ActionResult {
    let Some(host) = config.ssh_hosts.get(target.as_str()) else {
        return ActionResult::failed(
            action_id,
            1,
            format!("no address configured for target {target}"),
            0,
        );
    };

    let started = Instant::now();
    let mut child = match Command::new("ssh")
        .arg("-o")
        .arg("BatchMode=yes")
        .arg("-T")
        .arg("-o")
        .arg("ConnectTimeout=10")
        .arg("-o")
        .arg("ServerAliveInterval=15")
        .arg("-o")
        .arg(format!(
            "StrictHostKeyChecking={}",
            config.ssh_strict_host_key_checking
        ))
        .arg(host)
        .arg("--")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ActionResult::failed(
                action_id,
                1,
                format!("failed to spawn ssh: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let pid = child.id().map(|p| Pid::from_raw(p as i32));

    // Drain pipes concurrently so a chatty remote cannot deadlock the child.
    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let wall = Duration::from_secs(config.ssh_timeout_secs);
    let status = tokio::time::timeout(wall, child.wait()).await;

    let exit_code = match status {
        Ok(Ok(status)) => status.code().unwrap_or(-1),
        Ok(Err(e)) => {
            return ActionResult::failed(
                action_id,
                1,
                format!("ssh wait failed: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
        Err(_) => {
            warn!(target = %target, "ssh timed out, escalating SIGTERM -> SIGKILL");
            if let Some(pid) = pid {
                let _ = kill(pid, Signal::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
            let duration_ms = started.elapsed().as_millis() as u64;
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            let (mut stderr, _) = truncate_tail(stderr_bytes, MAX_STDERR_BYTES);
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "ssh command timed out after {}s",
                config.ssh_timeout_secs
            ));
            stdout_task.abort();
            return ActionResult {
                action_id,
                stdout: String::new(),
                stderr,
                exit_code: 124,
                executed_at: chrono::Utc::now(),
                duration_ms,
            };
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let (mut stdout, out_truncated) = truncate_tail(stdout_bytes, MAX_STDOUT_BYTES);
    let (stderr, _) = truncate_tail(stderr_bytes, MAX_STDERR_BYTES);
    if out_truncated {
        stdout.push_str("\n[output truncated]");
    }

    ActionResult {
        action_id,
        stdout,
        stderr,
        exit_code,
        executed_at: chrono::Utc::now(),
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_tail_keeps_head() {
        let (text, truncated) = truncate_tail(b"hello world".to_vec(), 5);
        assert_eq!(text, "hello");
        assert!(truncated);
    }

    #[test]
    fn truncate_tail_noop_under_limit() {
        let (text, truncated) = truncate_tail(b"short".to_vec(), 100);
        assert_eq!(text, "short");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn unknown_target_address_fails_cleanly() {
        let mut config = test_config();
        config.ssh_hosts.clear();
        let result = run_ssh(&config, 0, SshTarget::William, "uptime").await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("no address configured"));
    }

    fn test_config() -> RunnerConfig {
        RunnerConfig {
            bind_addr: "127.0.0.1:0".into(),
            dispatch_secret: String::new(),
            runner_secret: String::new(),
            registry_path: "/tmp/runs.db".into(),
            max_parallel: 4,
            ssh_hosts: [("william".to_string(), "127.0.0.1".to_string())]
                .into_iter()
                .collect(),
            ssh_timeout_secs: 1,
            ssh_strict_host_key_checking: "accept-new".into(),
            fetch_timeout_secs: 5,
            transcribe_url: String::new(),
            transcribe_token: String::new(),
            opencode_url: "http://127.0.0.1:1/task".into(),
            readable_mirror_url: "http://127.0.0.1:1".into(),
            browser_binary: String::new(),
        }
    }
}
