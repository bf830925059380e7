//! Approval gateway: the user-visible approve/deny surface.
//!
//! Two equivalent ingress channels land here: text commands (`/approvals`,
//! `/approve <id>`, `/deny <id> [reason]`) and inline-button callbacks
//! (`approve:<id>`, `deny:<id>`, `reason:<id>`). Decisions are linearized by
//! the proposal store; the first successful decide wins and losers are told
//! the terminal state. The gateway never executes anything itself.

use std::sync::{Arc, Mutex};

use tracing::info;

use nanoclaw_dispatch::Dispatcher;
use nanoclaw_store::ProposalStore;
use nanoclaw_types::{
    Action, ActionResult, Decision, NanoclawError, Proposal, ProposalStatus,
};

use crate::channel::{chunk_message, ChatTransport};
use crate::planner::Planner;

/// Pending proposals listed per `/approvals` call.
const APPROVALS_LIST_CAP: usize = 5;

/// Characters of stdout/stderr shown per action in rendered results.
const RESULT_SNIPPET_LEN: usize = 600;

pub struct ApprovalGateway {
    proposals: Arc<Mutex<ProposalStore>>,
    dispatcher: Dispatcher,
    transport: Arc<dyn ChatTransport>,
    planner: Arc<dyn Planner>,
    chat_max_len: usize,
}

impl ApprovalGateway {
    pub fn new(
        proposals: Arc<Mutex<ProposalStore>>,
        dispatcher: Dispatcher,
        transport: Arc<dyn ChatTransport>,
        planner: Arc<dyn Planner>,
        chat_max_len: usize,
    ) -> Self {
        Self {
            proposals,
            dispatcher,
            transport,
            planner,
            chat_max_len,
        }
    }

    /// Handle a chat message or callback payload if it addresses the
    /// gateway. Returns `true` when the input was consumed.
    pub fn handle_ingress(&self, chat_id: &str, text: &str) -> Result<bool, NanoclawError> {
        let text = text.trim();

        if text == "/approvals" {
            self.list_approvals(chat_id)?;
            return Ok(true);
        }
        if let Some(id) = text.strip_prefix("/approve ") {
            self.approve(chat_id, id.trim())?;
            return Ok(true);
        }
        if let Some(rest) = text.strip_prefix("/deny ") {
            let mut parts = rest.trim().splitn(2, ' ');
            let id = parts.next().unwrap_or("").to_string();
            let reason = parts.next().map(|r| r.trim().to_string());
            self.deny(chat_id, &id, reason)?;
            return Ok(true);
        }
        if let Some(id) = text.strip_prefix("approve:") {
            self.approve(chat_id, id.trim())?;
            return Ok(true);
        }
        if let Some(id) = text.strip_prefix("deny:") {
            self.deny(chat_id, id.trim(), None)?;
            return Ok(true);
        }
        if let Some(id) = text.strip_prefix("reason:") {
            self.transport.send_text(
                chat_id,
                &format!("To deny with a reason, send: /deny {} <reason>", id.trim()),
            )?;
            return Ok(true);
        }

        Ok(false)
    }

    fn list_approvals(&self, chat_id: &str) -> Result<(), NanoclawError> {
        let lines = {
            let proposals = self.proposals.lock().expect("proposal store lock poisoned");
            let pending = proposals.list_pending_by_chat(chat_id);
            if pending.is_empty() {
                "No pending approvals.".to_string()
            } else {
                pending
                    .iter()
                    .take(APPROVALS_LIST_CAP)
                    .map(|p| {
                        format!(
                            "{} — {} action(s) — {}",
                            p.id,
                            p.actions.iter().filter(|a| a.is_executable()).count(),
                            p.created_at.format("%Y-%m-%d %H:%M UTC")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        self.transport.send_text(chat_id, &lines)
    }

    fn approve(&self, chat_id: &str, id: &str) -> Result<(), NanoclawError> {
        let decided = {
            let mut proposals = self.proposals.lock().expect("proposal store lock poisoned");
            proposals.decide(id, Decision::Approve, None)?
        };

        let Some(proposal) = decided else {
            return self.report_stale(chat_id, id);
        };

        info!(proposal = %proposal.id, "approved, dispatching");
        let outcome = self.dispatcher.dispatch(&proposal.actions)?;
        let rendered = self.render_results(&proposal, &outcome.results);
        self.send_chunked(chat_id, &rendered)
    }

    fn deny(&self, chat_id: &str, id: &str, reason: Option<String>) -> Result<(), NanoclawError> {
        let decided = {
            let mut proposals = self.proposals.lock().expect("proposal store lock poisoned");
            proposals.decide(id, Decision::Deny, reason.clone())?
        };

        match decided {
            Some(proposal) => {
                let ack = match reason {
                    Some(reason) => format!("Denied {} ({reason}).", proposal.id),
                    None => format!("Denied {}.", proposal.id),
                };
                self.transport.send_text(chat_id, &ack)
            }
            None => self.report_stale(chat_id, id),
        }
    }

    /// Tell the loser of a decision race (or a typo) what state the
    /// proposal is actually in.
    fn report_stale(&self, chat_id: &str, id: &str) -> Result<(), NanoclawError> {
        let status = {
            let proposals = self.proposals.lock().expect("proposal store lock poisoned");
            proposals.get_by_id(id).map(|p| p.status)
        };
        let text = match status {
            Some(ProposalStatus::Approved) => format!("{id} is already approved."),
            Some(ProposalStatus::Denied) => format!("{id} is already denied."),
            Some(ProposalStatus::Proposed) => format!("{id} is still pending."),
            None => format!("Unknown proposal: {id}"),
        };
        self.transport.send_text(chat_id, &text)
    }

    /// Render per-action results. Successful `web_fetch` output goes through
    /// the planner's summarization path; everything else gets a compact
    /// per-action block.
    fn render_results(&self, proposal: &Proposal, results: &[ActionResult]) -> String {
        let mut blocks = Vec::new();
        for (action, result) in proposal.actions.iter().zip(results) {
            if !action.is_executable() {
                continue;
            }
            blocks.push(self.render_one(action, result));
        }
        if blocks.is_empty() {
            return format!("Approved {} (nothing to execute).", proposal.id);
        }
        format!("Results for {}:\n{}", proposal.id, blocks.join("\n"))
    }

    fn render_one(&self, action: &Action, result: &ActionResult) -> String {
        if matches!(action, Action::WebFetch { .. }) && result.succeeded() {
            if let Some(summary) = self.summarize_fetch(&result.stdout) {
                return format!("{}. {action}\n{summary}", result.action_id + 1);
            }
        }

        let body = if result.succeeded() {
            snippet(&result.stdout)
        } else {
            snippet(&result.stderr)
        };
        let mut block = format!(
            "{}. {action} — exit {} ({} ms)",
            result.action_id + 1,
            result.exit_code,
            result.duration_ms
        );
        if !body.is_empty() {
            block.push('\n');
            block.push_str(&body);
        }
        block
    }

    /// Intent-aware summarization of fetched page content.
    fn summarize_fetch(&self, fetched: &str) -> Option<String> {
        let prompt = format!(
            "Summarize the following fetched web content in a few sentences \
             for a chat message. Content:\n\n{fetched}"
        );
        match self.planner.complete(None, &prompt, false) {
            Ok(reply) if !reply.text.trim().is_empty() => Some(reply.text.trim().to_string()),
            _ => None,
        }
    }

    fn send_chunked(&self, chat_id: &str, text: &str) -> Result<(), NanoclawError> {
        for chunk in chunk_message(text, self.chat_max_len) {
            self.transport.send_text(chat_id, &chunk)?;
        }
        Ok(())
    }
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(RESULT_SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
