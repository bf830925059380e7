//! Append-only proposal journal.
//!
//! A single JSON document (`action-queue.json`) holding every proposal ever
//! enqueued. The approval gateway is the only mutator of proposal status;
//! `decide` is the one-time terminal write.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use nanoclaw_types::{Decision, NanoclawError, Proposal, ProposalStatus};

use crate::documents::{atomic_save, load_or_default};

/// The journal of proposals, persisted as one JSON array.
pub struct ProposalStore {
    path: PathBuf,
    proposals: Vec<Proposal>,
}

impl ProposalStore {
    /// Open (or create) the journal at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, NanoclawError> {
        let path = path.into();
        let proposals: Vec<Proposal> = load_or_default(&path)?;
        Ok(Self { path, proposals })
    }

    /// The journal path under a data directory.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("action-queue.json")
    }

    /// Append a new proposal. Proposals with zero actions are rejected.
    pub fn enqueue(&mut self, proposal: Proposal) -> Result<(), NanoclawError> {
        if proposal.actions.is_empty() {
            return Err(NanoclawError::StoreError(
                "proposal has no actions".to_string(),
            ));
        }
        info!(id = %proposal.id, chat = %proposal.chat_id, "proposal enqueued");
        self.proposals.push(proposal);
        self.persist()
    }

    /// Pending proposals for one chat, oldest first.
    pub fn list_pending_by_chat(&self, chat_id: &str) -> Vec<&Proposal> {
        self.proposals
            .iter()
            .filter(|p| p.is_pending() && p.chat_id == chat_id)
            .collect()
    }

    /// Look up a proposal by id.
    pub fn get_by_id(&self, id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == id)
    }

    /// Apply a terminal decision.
    ///
    /// Returns `None` when the proposal is missing or no longer `proposed`;
    /// the caller can inspect [`ProposalStore::get_by_id`] to tell the user
    /// which terminal state it is already in. On success the updated record
    /// is returned and the journal is persisted atomically.
    pub fn decide(
        &mut self,
        id: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<Option<Proposal>, NanoclawError> {
        let Some(proposal) = self.proposals.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if proposal.status != ProposalStatus::Proposed {
            return Ok(None);
        }

        proposal.status = decision.terminal_status();
        proposal.decided_at = Some(Utc::now());
        proposal.decision_reason = reason;
        let decided = proposal.clone();

        info!(id = %decided.id, status = %decided.status, "proposal decided");
        self.persist()?;
        Ok(Some(decided))
    }

    /// Number of proposals in the journal (all statuses).
    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    fn persist(&self) -> Result<(), NanoclawError> {
        atomic_save(&self.path, &self.proposals)
    }
}
