//! The message loop.
//!
//! One cooperative loop drains inbound chat messages in time order,
//! strictly after the persisted watermark, and routes each one: approval
//! commands to the gateway, everything else through the planner-turn
//! pipeline. The watermark only advances after a message is fully
//! processed, so a failing message is retried next iteration
//! (at-least-once delivery).

use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::{debug, warn};

use nanoclaw_store::{GroupRegistry, RouterState};
use nanoclaw_types::NanoclawError;

use crate::channel::InboundMessage;
use crate::gateway::ApprovalGateway;
use crate::turn::{run_planner_turn, TurnDeps};

pub struct MessageLoop {
    deps: TurnDeps,
    gateway: Arc<ApprovalGateway>,
    groups: Arc<Mutex<GroupRegistry>>,
    state: RouterState,
    assistant_name: String,
}

impl MessageLoop {
    pub fn new(
        deps: TurnDeps,
        gateway: Arc<ApprovalGateway>,
        groups: Arc<Mutex<GroupRegistry>>,
        assistant_name: impl Into<String>,
    ) -> Result<Self, NanoclawError> {
        let state = RouterState::load(&deps.data_dir)?;
        Ok(Self {
            deps,
            gateway,
            groups,
            state,
            assistant_name: assistant_name.into(),
        })
    }

    /// The loop's persisted watermark state (for inspection and tests).
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// One iteration: fetch new messages and process them in time order.
    /// Returns the number of messages fully processed. A failing message
    /// stops the batch; its watermark is not advanced.
    pub fn tick(&mut self) -> Result<usize, NanoclawError> {
        let chat_ids: Vec<String> = {
            let groups = self.groups.lock().expect("group registry lock poisoned");
            groups.chat_ids().iter().map(|s| s.to_string()).collect()
        };
        if chat_ids.is_empty() {
            return Ok(0);
        }

        let mut messages = self
            .deps
            .transport
            .fetch_since(self.state.last_timestamp, &chat_ids)?;
        messages.sort_by_key(|m| m.timestamp);

        let mut processed = 0;
        for message in messages {
            let timestamp = message.timestamp;
            if let Err(e) = self.process_message(&message) {
                warn!(
                    chat = %message.chat_id,
                    error = %e,
                    "message processing failed, batch stopped for retry"
                );
                return Ok(processed);
            }
            self.state.last_timestamp = Some(timestamp);
            self.state.save(&self.deps.data_dir)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn process_message(&mut self, message: &InboundMessage) -> Result<(), NanoclawError> {
        let group = {
            let groups = self.groups.lock().expect("group registry lock poisoned");
            groups.get(&message.chat_id).cloned()
        };
        let Some(group) = group else {
            debug!(chat = %message.chat_id, "message from unregistered chat ignored");
            return Ok(());
        };

        // Approval commands and callbacks are consumed by the gateway.
        if self.gateway.handle_ingress(&message.chat_id, &message.text)? {
            return Ok(());
        }

        // Outside the main group the assistant only answers when addressed.
        if !group.is_main() && !self.trigger_matches(&group.trigger, &message.text) {
            return Ok(());
        }

        // Already folded into an earlier turn's prompt concatenation.
        let agent_after = self.state.last_agent_timestamp.get(&message.chat_id).copied();
        if let Some(after) = agent_after {
            if message.timestamp <= after {
                return Ok(());
            }
        }

        // Collect everything in this chat past the agent watermark and fold
        // it into one prompt.
        let mut batch = self
            .deps
            .transport
            .fetch_chat_since(&message.chat_id, agent_after)?;
        batch.sort_by_key(|m| m.timestamp);
        if batch.is_empty() {
            batch.push(message.clone());
        }

        let prompt = batch
            .iter()
            .map(|m| m.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if prompt.is_empty() {
            return Ok(());
        }

        run_planner_turn(&self.deps, &group.folder, &message.chat_id, &prompt, false)?;

        let newest = batch
            .iter()
            .map(|m| m.timestamp)
            .max()
            .unwrap_or(message.timestamp);
        self.state
            .last_agent_timestamp
            .insert(message.chat_id.clone(), newest);
        self.state.save(&self.deps.data_dir)?;
        Ok(())
    }

    fn trigger_matches(&self, group_trigger: &str, text: &str) -> bool {
        let name = if group_trigger.is_empty() {
            &self.assistant_name
        } else {
            group_trigger
        };
        Regex::new(&format!(r"(?i)^@{}\b", regex::escape(name)))
            .map(|re| re.is_match(text.trim()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InboundMessage;
    use crate::memory::NoopMemory;
    use crate::planner::PlannerReply;
    use crate::testing::{RecordingTransport, ScriptedPlanner};
    use chrono::{Duration, Utc};
    use nanoclaw_dispatch::Dispatcher;
    use nanoclaw_store::{ProposalStore, SessionMap};
    use nanoclaw_types::{RegisteredGroup, WebhookConfig};

    fn plan_reply(text: &str) -> Result<PlannerReply, String> {
        Ok(PlannerReply {
            text: text.to_string(),
            session_id: None,
        })
    }

    struct Fixture {
        transport: Arc<RecordingTransport>,
        groups: Arc<Mutex<GroupRegistry>>,
        proposals: Arc<Mutex<ProposalStore>>,
        data_dir: std::path::PathBuf,
    }

    fn fixture(script: Vec<Result<PlannerReply, String>>) -> (MessageLoop, Fixture) {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        std::mem::forget(dir);

        let transport = Arc::new(RecordingTransport::default());
        let planner: Arc<ScriptedPlanner> = Arc::new(ScriptedPlanner::new(script));
        let proposals = Arc::new(Mutex::new(
            ProposalStore::open(data_dir.join("action-queue.json")).unwrap(),
        ));
        let sessions = Arc::new(Mutex::new(SessionMap::default()));

        let mut registry = GroupRegistry::default();
        registry.register(
            "chat-main",
            RegisteredGroup {
                name: "Ops".into(),
                folder: "main".into(),
                trigger: "claw".into(),
                added_at: Utc::now(),
            },
        );
        registry.register(
            "chat-side",
            RegisteredGroup {
                name: "Side".into(),
                folder: "side".into(),
                trigger: "claw".into(),
                added_at: Utc::now(),
            },
        );
        let groups = Arc::new(Mutex::new(registry));

        let deps = TurnDeps {
            planner: planner.clone(),
            memory: Arc::new(NoopMemory),
            transport: transport.clone(),
            proposals: proposals.clone(),
            sessions,
            data_dir: data_dir.clone(),
            chat_max_len: 4000,
        };

        let gateway = Arc::new(ApprovalGateway::new(
            proposals.clone(),
            Dispatcher::new(WebhookConfig {
                url: "http://127.0.0.1:1/dispatch".into(),
                secret: "s".into(),
                timeout_secs: 1,
                enable_approved_execution: true,
                enable_local_approved_execution: false,
            })
            .unwrap(),
            transport.clone(),
            planner,
            4000,
        ));

        let message_loop = MessageLoop::new(deps, gateway, groups.clone(), "claw").unwrap();
        (
            message_loop,
            Fixture {
                transport,
                groups,
                proposals,
                data_dir,
            },
        )
    }

    fn message(chat: &str, text: &str, ts: chrono::DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            chat_id: chat.into(),
            sender: "alice".into(),
            text: text.into(),
            timestamp: ts,
        }
    }

    #[test]
    fn empty_tick_without_groups_is_a_noop() {
        let (mut message_loop, fixture) = fixture(vec![]);
        fixture.groups.lock().unwrap().groups.clear();
        assert_eq!(message_loop.tick().unwrap(), 0);
    }

    #[test]
    fn processing_advances_watermark_to_message_timestamp() {
        let (mut message_loop, fixture) = fixture(vec![plan_reply("```json\n{}\n```")]);
        let ts = Utc::now();
        fixture
            .transport
            .push_inbound(message("chat-main", "how are things", ts));

        assert_eq!(message_loop.tick().unwrap(), 1);
        assert_eq!(message_loop.state().last_timestamp, Some(ts));
        assert_eq!(
            message_loop.state().last_agent_timestamp.get("chat-main"),
            Some(&ts)
        );

        // The saved state matches what the loop holds.
        let persisted = RouterState::load(&fixture.data_dir).unwrap();
        assert_eq!(persisted.last_timestamp, Some(ts));
    }

    #[test]
    fn transport_failure_leaves_watermark_unchanged() {
        let (mut message_loop, fixture) =
            fixture(vec![plan_reply("All quiet.\n```json\n{}\n```")]);
        let ts = Utc::now();
        fixture
            .transport
            .push_inbound(message("chat-main", "hello", ts));
        fixture
            .transport
            .fail_sends
            .store(true, std::sync::atomic::Ordering::Relaxed);

        assert_eq!(message_loop.tick().unwrap(), 0);
        assert_eq!(message_loop.state().last_timestamp, None);
        assert!(message_loop
            .state()
            .last_agent_timestamp
            .get("chat-main")
            .is_none());
    }

    #[test]
    fn untriggered_side_group_message_ignored_but_watermark_advances() {
        let (mut message_loop, fixture) = fixture(vec![]);
        let ts = Utc::now();
        fixture
            .transport
            .push_inbound(message("chat-side", "random chatter", ts));

        assert_eq!(message_loop.tick().unwrap(), 1);
        assert_eq!(message_loop.state().last_timestamp, Some(ts));
        // The planner was never invoked: no replies sent.
        assert!(fixture.transport.sent_texts().is_empty());
    }

    #[test]
    fn triggered_side_group_message_processed() {
        let (mut message_loop, fixture) = fixture(vec![plan_reply("```json\n{}\n```")]);
        let ts = Utc::now();
        fixture
            .transport
            .push_inbound(message("chat-side", "@claw how are things", ts));

        assert_eq!(message_loop.tick().unwrap(), 1);
        assert_eq!(
            message_loop.state().last_agent_timestamp.get("chat-side"),
            Some(&ts)
        );
    }

    #[test]
    fn approval_command_routed_to_gateway() {
        let (mut message_loop, fixture) = fixture(vec![]);
        let ts = Utc::now();
        fixture
            .transport
            .push_inbound(message("chat-main", "/approvals", ts));

        assert_eq!(message_loop.tick().unwrap(), 1);
        let sent = fixture.transport.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("No pending approvals"));
        assert!(fixture.proposals.lock().unwrap().is_empty());
    }

    #[test]
    fn multiple_chat_messages_concatenate_into_one_prompt() {
        let (mut message_loop, fixture) = fixture(vec![plan_reply("```json\n{}\n```")]);
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        fixture
            .transport
            .push_inbound(message("chat-main", "first part", t0));
        fixture
            .transport
            .push_inbound(message("chat-main", "second part", t1));

        // Both messages fold into one planner turn; the second is then
        // skipped as already consumed.
        assert_eq!(message_loop.tick().unwrap(), 2);
        assert_eq!(
            message_loop.state().last_agent_timestamp.get("chat-main"),
            Some(&t1)
        );
    }
}
