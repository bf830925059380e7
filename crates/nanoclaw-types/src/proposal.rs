//! Proposals: persisted plans awaiting an explicit human decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;

/// Where a proposal stands in its lifecycle.
///
/// Only `Proposed` may transition, and only to `Approved` or `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Denied,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Proposed => write!(f, "proposed"),
            ProposalStatus::Approved => write!(f, "approved"),
            ProposalStatus::Denied => write!(f, "denied"),
        }
    }
}

/// The terminal decision applied to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    /// The status a proposal ends in under this decision.
    pub fn terminal_status(&self) -> ProposalStatus {
        match self {
            Decision::Approve => ProposalStatus::Approved,
            Decision::Deny => ProposalStatus::Denied,
        }
    }
}

/// A persisted record tying a plan's actions to the chat that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Opaque unique id (`prop-<uuid>`).
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    /// Folder of the group that produced the proposal.
    pub group_folder: String,
    pub chat_id: String,
    /// The user text that led to this proposal, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_text: Option<String>,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

impl Proposal {
    /// Create a new `proposed` record with a fresh id.
    pub fn new(
        group_folder: impl Into<String>,
        chat_id: impl Into<String>,
        request_text: Option<String>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: format!("prop-{}", Uuid::new_v4()),
            created_at: Utc::now(),
            status: ProposalStatus::Proposed,
            group_folder: group_folder.into(),
            chat_id: chat_id.into(),
            request_text,
            actions,
            decided_at: None,
            decision_reason: None,
        }
    }

    /// Whether the proposal is still awaiting a decision.
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, SshTarget};

    fn sample_actions() -> Vec<Action> {
        vec![Action::Ssh {
            target: SshTarget::William,
            command: "uptime".into(),
            reason: "check load".into(),
            requires_approval: true,
            execution_mode: None,
            parallel_group: None,
        }]
    }

    #[test]
    fn new_proposal_is_pending_with_unique_id() {
        let a = Proposal::new("main", "chat-1", None, sample_actions());
        let b = Proposal::new("main", "chat-1", None, sample_actions());
        assert!(a.is_pending());
        assert!(a.id.starts_with("prop-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serde_uses_camel_case() {
        let p = Proposal::new("main", "chat-1", Some("uptime on william".into()), sample_actions());
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"groupFolder\""));
        assert!(json.contains("\"chatId\""));
        assert!(json.contains("\"requestText\""));
        assert!(!json.contains("\"decidedAt\"")); // undecided: omitted
    }

    #[test]
    fn decision_terminal_statuses() {
        assert_eq!(Decision::Approve.terminal_status(), ProposalStatus::Approved);
        assert_eq!(Decision::Deny.terminal_status(), ProposalStatus::Denied);
    }
}
