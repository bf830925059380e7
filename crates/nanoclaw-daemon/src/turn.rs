//! The shared planner-turn pipeline.
//!
//! Both the message loop and the scheduler funnel through this path:
//! memory header, planner invocation, plan parse with one repair attempt,
//! fallback fetch injection, proposal enqueue, and chat egress.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use nanoclaw_plan::{inject_fallback_fetch, parse_plan, repair_prompt, strip_plan_block};
use nanoclaw_store::{ProposalStore, SessionMap};
use nanoclaw_types::{Action, NanoclawError, Plan, Proposal};

use crate::channel::{chunk_message, ChatTransport};
use crate::memory::MemoryProvider;
use crate::planner::{Planner, PLANNER_FALLBACK_REPLY};

/// Shared collaborators for running a turn.
pub struct TurnDeps {
    pub planner: Arc<dyn Planner>,
    pub memory: Arc<dyn MemoryProvider>,
    pub transport: Arc<dyn ChatTransport>,
    pub proposals: Arc<Mutex<ProposalStore>>,
    pub sessions: Arc<Mutex<SessionMap>>,
    pub data_dir: PathBuf,
    pub chat_max_len: usize,
}

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub proposal_id: Option<String>,
}

/// Run one planner turn for a group and deliver its output to the chat.
pub fn run_planner_turn(
    deps: &TurnDeps,
    group_folder: &str,
    chat_id: &str,
    user_prompt: &str,
    scheduled: bool,
) -> Result<TurnOutcome, NanoclawError> {
    let prompt = match deps.memory.memory_header(group_folder, user_prompt) {
        Some(header) => format!("{header}\n\n{user_prompt}"),
        None => user_prompt.to_string(),
    };

    let session_id = {
        let sessions = deps.sessions.lock().expect("session map lock poisoned");
        sessions.get(group_folder).map(String::from)
    };

    // First planner attempt. A planner failure surfaces the deterministic
    // fallback reply but still gets one shot at plan repair.
    let (reply_text, mut new_session, parse) =
        match deps.planner.complete(session_id.as_deref(), &prompt, scheduled) {
            Ok(reply) => {
                let parse = parse_plan(&reply.text);
                (reply.text, reply.session_id, parse)
            }
            Err(e) => {
                warn!(chat = chat_id, error = %e, "planner failed");
                let parse = parse_plan("");
                (PLANNER_FALLBACK_REPLY.to_string(), None, parse)
            }
        };

    let mut plan = match parse.plan {
        Some(plan) => Some(plan),
        None => {
            // One repair attempt with the fixed JSON-only prompt.
            match deps.planner.complete(
                new_session.as_deref().or(session_id.as_deref()),
                &repair_prompt(&parse.errors),
                scheduled,
            ) {
                Ok(repair) => {
                    if repair.session_id.is_some() {
                        new_session = repair.session_id;
                    }
                    let reparse = parse_plan(&repair.text);
                    if reparse.plan.is_none() {
                        error!(
                            chat = chat_id,
                            errors = ?reparse.errors,
                            "plan repair failed, treating plan as empty"
                        );
                    }
                    reparse.plan
                }
                Err(e) => {
                    error!(chat = chat_id, error = %e, "plan repair attempt failed");
                    None
                }
            }
        }
    };

    // Fallback fetch injection runs only on a successfully parsed plan,
    // before enqueue.
    if let Some(ref mut plan) = plan {
        inject_fallback_fetch(plan, user_prompt);
    }

    let plan = plan.unwrap_or_else(Plan::empty);

    // After repair failure only the textual reply is delivered; no proposal.
    let proposal_id = if plan.has_executable_actions() {
        let proposal = Proposal::new(
            group_folder,
            chat_id,
            Some(user_prompt.to_string()),
            plan.actions.clone(),
        );
        let id = proposal.id.clone();
        deps.proposals
            .lock()
            .expect("proposal store lock poisoned")
            .enqueue(proposal)?;
        Some(id)
    } else {
        None
    };

    if let Some(session) = new_session {
        let mut sessions = deps.sessions.lock().expect("session map lock poisoned");
        sessions.set(group_folder, session);
        sessions.save(&deps.data_dir)?;
    }

    let mut reply = strip_plan_block(&reply_text);
    if reply.is_empty() {
        if let Some(Action::Question { question }) = plan
            .actions
            .iter()
            .find(|a| matches!(a, Action::Question { .. }))
        {
            reply = question.clone();
        }
    }
    if reply.is_empty() {
        if let Some(ref id) = proposal_id {
            reply = format!(
                "Proposed {} action(s) for approval ({id}).",
                plan.actions.iter().filter(|a| a.is_executable()).count()
            );
        }
    }

    if !reply.is_empty() {
        for chunk in chunk_message(&reply, deps.chat_max_len) {
            deps.transport.send_text(chat_id, &chunk)?;
        }
    }

    if let Some(ref id) = proposal_id {
        let summary = summarize_actions(&plan);
        deps.transport.send_approval_buttons(chat_id, id, &summary)?;
        info!(chat = chat_id, proposal = %id, "approval surface sent");
    }

    Ok(TurnOutcome { reply, proposal_id })
}

/// One line per executable action, for the approval surface.
pub fn summarize_actions(plan: &Plan) -> String {
    plan.actions
        .iter()
        .filter(|a| a.is_executable())
        .map(|a| format!("- {a}"))
        .collect::<Vec<_>>()
        .join("\n")
}
