//! Environment-driven configuration for the daemon and the runner.
//!
//! Every knob has a `NANOCLAW_*` environment variable and a default that
//! allows an offline boot (tests never need live credentials).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::NanoclawError;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, NanoclawError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| NanoclawError::ConfigError(format!("{name} must be an integer: {v}"))),
        Err(_) => Ok(default),
    }
}

/// Configuration for the planner-facing HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Base URL of the model-facing HTTP API.
    pub base_url: String,
    /// API key, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model id used for completion turns.
    pub completion_model: String,
    /// Model id used for reasoning-heavy turns.
    pub reasoning_model: String,
    /// When true, model ids that are not free-tier (`:free` suffix) are rejected.
    pub require_free_models: bool,
}

impl PlannerConfig {
    fn from_env() -> Result<Self, NanoclawError> {
        let config = Self {
            base_url: env_or("NANOCLAW_PLANNER_BASE_URL", "http://127.0.0.1:4010"),
            api_key: env_opt("NANOCLAW_PLANNER_API_KEY"),
            completion_model: env_or(
                "NANOCLAW_COMPLETION_MODEL",
                "meta-llama/llama-3.3-70b-instruct:free",
            ),
            reasoning_model: env_or(
                "NANOCLAW_REASONING_MODEL",
                "deepseek/deepseek-r1:free",
            ),
            require_free_models: env_bool("NANOCLAW_REQUIRE_FREE_MODELS", true),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject non-free model ids when the free-tier policy is on.
    pub fn validate(&self) -> Result<(), NanoclawError> {
        if !self.require_free_models {
            return Ok(());
        }
        for model in [&self.completion_model, &self.reasoning_model] {
            if !model.ends_with(":free") {
                return Err(NanoclawError::ConfigError(format!(
                    "model '{model}' is not free-tier; set NANOCLAW_REQUIRE_FREE_MODELS=false to allow it"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the dispatcher's signed webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Runner URL the dispatcher posts to.
    pub url: String,
    /// HMAC secret shared with the runner. Empty disables signing.
    pub secret: String,
    /// Outbound POST timeout in seconds.
    pub timeout_secs: u64,
    /// When false, every executable action is reported as skipped.
    pub enable_approved_execution: bool,
    /// Escape hatch for tests; the default configuration refuses local
    /// execution regardless of this flag's documentation elsewhere.
    pub enable_local_approved_execution: bool,
}

impl WebhookConfig {
    fn from_env() -> Result<Self, NanoclawError> {
        Ok(Self {
            url: env_or("NANOCLAW_WEBHOOK_URL", "http://127.0.0.1:4021/dispatch"),
            secret: env_or("NANOCLAW_WEBHOOK_SECRET", ""),
            timeout_secs: env_u64("NANOCLAW_WEBHOOK_TIMEOUT_SECS", 10)?,
            enable_approved_execution: env_bool("NANOCLAW_ENABLE_APPROVED_EXECUTION", true),
            enable_local_approved_execution: env_bool(
                "NANOCLAW_ENABLE_LOCAL_APPROVED_EXECUTION",
                false,
            ),
        })
    }
}

/// Core (daemon-side) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Assistant name; `@<name>` is the trigger prefix in non-main groups.
    pub assistant_name: String,
    /// Root of the persisted flat documents and the IPC tree.
    pub data_dir: PathBuf,
    pub planner: PlannerConfig,
    pub webhook: WebhookConfig,
    /// IANA timezone name used for cron evaluation.
    pub scheduler_timezone: String,
    /// Message loop poll period in seconds.
    pub poll_secs: u64,
    /// IPC watcher period in seconds.
    pub ipc_poll_secs: u64,
    /// Scheduler period in seconds.
    pub scheduler_secs: u64,
    /// Maximum chat message size before chunking.
    pub chat_max_len: usize,
}

impl CoreConfig {
    /// Load the daemon configuration from the environment.
    pub fn from_env() -> Result<Self, NanoclawError> {
        Ok(Self {
            assistant_name: env_or("NANOCLAW_ASSISTANT_NAME", "nanoclaw"),
            data_dir: PathBuf::from(env_or("NANOCLAW_DATA_DIR", "data")),
            planner: PlannerConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            scheduler_timezone: env_or("NANOCLAW_SCHEDULER_TZ", "UTC"),
            poll_secs: env_u64("NANOCLAW_POLL_SECS", 2)?,
            ipc_poll_secs: env_u64("NANOCLAW_IPC_POLL_SECS", 1)?,
            scheduler_secs: env_u64("NANOCLAW_SCHEDULER_SECS", 60)?,
            chat_max_len: env_u64("NANOCLAW_CHAT_MAX_LEN", 4000)? as usize,
        })
    }

    /// Directory of the on-disk IPC tree.
    pub fn ipc_dir(&self) -> PathBuf {
        self.data_dir.join("ipc")
    }
}

/// Runner-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Bind address of the runner HTTP API.
    pub bind_addr: String,
    /// HMAC secret for `/dispatch` verification. Empty disables verification.
    pub dispatch_secret: String,
    /// Shared secret for the run-management API.
    pub runner_secret: String,
    /// SQLite path of the run registry.
    pub registry_path: PathBuf,
    /// Concurrency bound for parallel-group execution.
    pub max_parallel: usize,
    /// Closed map of ssh target names to reachable addresses.
    pub ssh_hosts: HashMap<String, String>,
    /// Per-invocation ssh wall-clock timeout in seconds.
    pub ssh_timeout_secs: u64,
    /// ssh StrictHostKeyChecking mode (`yes`, `no`, or `accept-new`).
    pub ssh_strict_host_key_checking: String,
    /// Outbound fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Transcription endpoint for image/voice actions.
    pub transcribe_url: String,
    /// Bearer token for the transcription endpoint.
    pub transcribe_token: String,
    /// opencode_serve endpoint.
    pub opencode_url: String,
    /// Readable-mirror base URL used when the browser driver is unavailable.
    pub readable_mirror_url: String,
    /// Headless browser binary; empty means no driver available.
    pub browser_binary: String,
}

impl RunnerConfig {
    /// Load the runner configuration from the environment.
    pub fn from_env() -> Result<Self, NanoclawError> {
        let mut ssh_hosts = HashMap::new();
        ssh_hosts.insert(
            "william".to_string(),
            env_or("NANOCLAW_SSH_HOST_WILLIAM", "william.lan"),
        );
        ssh_hosts.insert(
            "willy-ubuntu".to_string(),
            env_or("NANOCLAW_SSH_HOST_WILLY_UBUNTU", "willy-ubuntu.lan"),
        );

        Ok(Self {
            bind_addr: env_or("NANOCLAW_RUNNER_BIND", "127.0.0.1:4021"),
            dispatch_secret: env_or("NANOCLAW_WEBHOOK_SECRET", ""),
            runner_secret: env_or("NANOCLAW_RUNNER_SECRET", ""),
            registry_path: PathBuf::from(env_or("NANOCLAW_REGISTRY_PATH", "data/runs.db")),
            max_parallel: env_u64("NANOCLAW_MAX_PARALLEL", 4)? as usize,
            ssh_hosts,
            ssh_timeout_secs: env_u64("NANOCLAW_SSH_TIMEOUT_SECS", 60)?,
            ssh_strict_host_key_checking: env_or("NANOCLAW_SSH_STRICT_HOST_KEYS", "accept-new"),
            fetch_timeout_secs: env_u64("NANOCLAW_FETCH_TIMEOUT_SECS", 20)?,
            transcribe_url: env_or("NANOCLAW_TRANSCRIBE_URL", ""),
            transcribe_token: env_or("NANOCLAW_TRANSCRIBE_TOKEN", ""),
            opencode_url: env_or("NANOCLAW_OPENCODE_URL", "http://127.0.0.1:4096/task"),
            readable_mirror_url: env_or("NANOCLAW_READABLE_MIRROR_URL", "https://r.jina.ai"),
            browser_binary: env_or("NANOCLAW_BROWSER_BINARY", ""),
        })
    }
}
