//! Actions proposed by the planner and executed by the runner.
//!
//! An [`Action`] is one element of the closed variant set emitted in a plan.
//! The serde representation is the wire format: internally tagged by `type`
//! with camelCase field names. Unknown tags fail deserialization, which
//! rejects the whole plan rather than falling through.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// The closed set of remote hosts an `ssh` action may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SshTarget {
    #[serde(rename = "william")]
    William,
    #[serde(rename = "willy-ubuntu")]
    WillyUbuntu,
}

impl SshTarget {
    /// The wire name of the target.
    pub fn as_str(&self) -> &'static str {
        match self {
            SshTarget::William => "william",
            SshTarget::WillyUbuntu => "willy-ubuntu",
        }
    }
}

impl std::fmt::Display for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `web_fetch` action retrieves the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Plain HTTP GET.
    #[default]
    Http,
    /// Headless-browser navigation (always requires approval).
    Browser,
}

/// Whether an action runs synchronously or as a background run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Foreground,
    Background,
}

/// One proposed unit of work.
///
/// `reply` and `question` are conversational; every other variant is
/// executable and carries a mandatory `reason` plus the `requiresApproval`
/// flag (default `true`). Executable variants accept the advisory execution
/// hints `executionMode` and `parallelGroup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Reply,
    Question {
        question: String,
    },
    #[serde(rename_all = "camelCase")]
    Ssh {
        target: SshTarget,
        command: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ObsidianWrite {
        path: String,
        patch: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    WebFetch {
        url: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default)]
        mode: FetchMode,
        /// Optional hint describing what to extract from the page.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extract: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ImageToText {
        image_url: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    VoiceToText {
        audio_url: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OpencodeServe {
        task: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Timeout in seconds, 1-600.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddonInstall {
        name: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddonCreate {
        name: String,
        purpose: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddonRun {
        name: String,
        input: String,
        reason: String,
        #[serde(default = "default_true")]
        requires_approval: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_mode: Option<ExecutionMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<String>,
    },
}

impl Action {
    /// The wire tag of this variant (e.g. `"web_fetch"`).
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Reply => "reply",
            Action::Question { .. } => "question",
            Action::Ssh { .. } => "ssh",
            Action::ObsidianWrite { .. } => "obsidian_write",
            Action::WebFetch { .. } => "web_fetch",
            Action::ImageToText { .. } => "image_to_text",
            Action::VoiceToText { .. } => "voice_to_text",
            Action::OpencodeServe { .. } => "opencode_serve",
            Action::AddonInstall { .. } => "addon_install",
            Action::AddonCreate { .. } => "addon_create",
            Action::AddonRun { .. } => "addon_run",
        }
    }

    /// Whether this variant is executable (i.e. carries state-changing or
    /// outbound work). `reply` and `question` are conversational only.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Action::Reply | Action::Question { .. })
    }

    /// The `requiresApproval` flag; conversational variants never require it.
    pub fn requires_approval(&self) -> bool {
        match self {
            Action::Reply | Action::Question { .. } => false,
            Action::Ssh {
                requires_approval, ..
            }
            | Action::ObsidianWrite {
                requires_approval, ..
            }
            | Action::WebFetch {
                requires_approval, ..
            }
            | Action::ImageToText {
                requires_approval, ..
            }
            | Action::VoiceToText {
                requires_approval, ..
            }
            | Action::OpencodeServe {
                requires_approval, ..
            }
            | Action::AddonInstall {
                requires_approval, ..
            }
            | Action::AddonCreate {
                requires_approval, ..
            }
            | Action::AddonRun {
                requires_approval, ..
            } => *requires_approval,
        }
    }

    /// The advisory parallel group label, if any.
    pub fn parallel_group(&self) -> Option<&str> {
        match self {
            Action::Reply | Action::Question { .. } => None,
            Action::Ssh { parallel_group, .. }
            | Action::ObsidianWrite { parallel_group, .. }
            | Action::WebFetch { parallel_group, .. }
            | Action::ImageToText { parallel_group, .. }
            | Action::VoiceToText { parallel_group, .. }
            | Action::OpencodeServe { parallel_group, .. }
            | Action::AddonInstall { parallel_group, .. }
            | Action::AddonCreate { parallel_group, .. }
            | Action::AddonRun { parallel_group, .. } => parallel_group.as_deref(),
        }
    }

    /// The advisory execution mode, defaulting to foreground.
    pub fn execution_mode(&self) -> ExecutionMode {
        let mode = match self {
            Action::Reply | Action::Question { .. } => None,
            Action::Ssh { execution_mode, .. }
            | Action::ObsidianWrite { execution_mode, .. }
            | Action::WebFetch { execution_mode, .. }
            | Action::ImageToText { execution_mode, .. }
            | Action::VoiceToText { execution_mode, .. }
            | Action::OpencodeServe { execution_mode, .. }
            | Action::AddonInstall { execution_mode, .. }
            | Action::AddonCreate { execution_mode, .. }
            | Action::AddonRun { execution_mode, .. } => *execution_mode,
        };
        mode.unwrap_or(ExecutionMode::Foreground)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Reply => write!(f, "reply"),
            Action::Question { question } => write!(f, "question: {question}"),
            Action::Ssh {
                target, command, ..
            } => write!(f, "ssh {target}: {command}"),
            Action::ObsidianWrite { path, .. } => write!(f, "obsidian_write {path}"),
            Action::WebFetch { url, mode, .. } => {
                write!(f, "web_fetch {url} ({mode:?})")
            }
            Action::ImageToText { image_url, .. } => write!(f, "image_to_text {image_url}"),
            Action::VoiceToText { audio_url, .. } => write!(f, "voice_to_text {audio_url}"),
            Action::OpencodeServe { task, .. } => write!(f, "opencode_serve: {task}"),
            Action::AddonInstall { name, .. } => write!(f, "addon_install {name}"),
            Action::AddonCreate { name, .. } => write!(f, "addon_create {name}"),
            Action::AddonRun { name, .. } => write!(f, "addon_run {name}"),
        }
    }
}

/// A plan: the ordered list of actions the planner emitted for one turn.
///
/// Empty actions is a valid plan (a pure-reply turn).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Plan {
    /// A plan with no actions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether any action in the plan is executable.
    pub fn has_executable_actions(&self) -> bool {
        self.actions.iter().any(Action::is_executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_action_wire_roundtrip() {
        let json = r#"{
            "type": "ssh",
            "target": "william",
            "command": "uptime",
            "reason": "check load",
            "requiresApproval": true,
            "parallelGroup": "g1"
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        match &action {
            Action::Ssh {
                target,
                command,
                parallel_group,
                ..
            } => {
                assert_eq!(*target, SshTarget::William);
                assert_eq!(command, "uptime");
                assert_eq!(parallel_group.as_deref(), Some("g1"));
            }
            other => panic!("expected ssh, got {other:?}"),
        }

        let back = serde_json::to_string(&action).unwrap();
        let reparsed: Action = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed, action);
    }

    #[test]
    fn unknown_type_rejected() {
        let json = r#"{"type": "launch_missiles", "reason": "no"}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn unknown_ssh_target_rejected() {
        let json = r#"{"type": "ssh", "target": "mars", "command": "uptime", "reason": "x"}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn requires_approval_defaults_true() {
        let json = r#"{"type": "web_fetch", "url": "https://example.com", "reason": "read"}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert!(action.requires_approval());
    }

    #[test]
    fn fetch_mode_defaults_http() {
        let json = r#"{"type": "web_fetch", "url": "https://example.com", "reason": "read"}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        match action {
            Action::WebFetch { mode, .. } => assert_eq!(mode, FetchMode::Http),
            other => panic!("expected web_fetch, got {other:?}"),
        }
    }

    #[test]
    fn conversational_actions_are_not_executable() {
        let reply: Action = serde_json::from_str(r#"{"type": "reply"}"#).unwrap();
        assert!(!reply.is_executable());
        assert!(!reply.requires_approval());

        let question: Action =
            serde_json::from_str(r#"{"type": "question", "question": "which host?"}"#).unwrap();
        assert!(!question.is_executable());
    }

    #[test]
    fn execution_mode_wire_names() {
        let json = r#"{
            "type": "opencode_serve",
            "task": "refactor module",
            "reason": "requested",
            "executionMode": "background"
        }"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.execution_mode(), ExecutionMode::Background);
    }

    #[test]
    fn camel_case_field_names_serialized() {
        let action = Action::ImageToText {
            image_url: "https://example.com/cat.png".into(),
            reason: "describe".into(),
            requires_approval: true,
            prompt: None,
            execution_mode: Some(ExecutionMode::Foreground),
            parallel_group: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"imageUrl\""));
        assert!(json.contains("\"requiresApproval\""));
        assert!(json.contains("\"executionMode\""));
        assert!(!json.contains("image_url"));
    }

    #[test]
    fn empty_plan_is_valid() {
        let plan: Plan = serde_json::from_str("{}").unwrap();
        assert!(plan.actions.is_empty());
        assert!(!plan.has_executable_actions());
    }

    #[test]
    fn plan_roundtrip_preserves_order() {
        let plan = Plan {
            actions: vec![
                Action::Reply,
                Action::Ssh {
                    target: SshTarget::WillyUbuntu,
                    command: "df -h".into(),
                    reason: "disk space".into(),
                    requires_approval: true,
                    execution_mode: None,
                    parallel_group: None,
                },
            ],
        };
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
