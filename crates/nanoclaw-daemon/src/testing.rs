//! Test doubles for the daemon's external collaborators.
//!
//! A scripted planner that replays canned replies and a transport that
//! records every outbound send. Used by unit tests and integration tests;
//! real deployments wire [`crate::planner::HttpPlanner`] and a live
//! transport instead.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use nanoclaw_types::NanoclawError;

use crate::channel::{ChatTransport, InboundMessage};
use crate::planner::{Planner, PlannerReply};

/// Planner that replays a fixed script of replies, in order.
pub struct ScriptedPlanner {
    script: Mutex<std::vec::IntoIter<Result<PlannerReply, String>>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<Result<PlannerReply, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter()),
        }
    }

    /// A planner that always answers with the same text.
    pub fn constant(text: &str) -> Self {
        let reply = PlannerReply {
            text: text.to_string(),
            session_id: None,
        };
        Self::new(vec![Ok(reply.clone()), Ok(reply.clone()), Ok(reply)])
    }
}

impl Planner for ScriptedPlanner {
    fn complete(
        &self,
        _session_id: Option<&str>,
        _prompt: &str,
        _scheduled: bool,
    ) -> Result<PlannerReply, NanoclawError> {
        let next = self
            .script
            .lock()
            .expect("scripted planner lock poisoned")
            .next();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(NanoclawError::PlannerError(e)),
            None => Err(NanoclawError::PlannerError(
                "scripted planner exhausted".into(),
            )),
        }
    }
}

/// Transport that records outbound traffic and serves queued inbound
/// messages.
#[derive(Default)]
pub struct RecordingTransport {
    inbound: Mutex<Vec<InboundMessage>>,
    sent: Mutex<Vec<(String, String)>>,
    buttons: Mutex<Vec<(String, String)>>,
    /// When set, every send fails (transport-down simulation).
    pub fail_sends: std::sync::atomic::AtomicBool,
}

impl RecordingTransport {
    /// Queue an inbound message for the next fetch.
    pub fn push_inbound(&self, message: InboundMessage) {
        self.inbound
            .lock()
            .expect("inbound lock poisoned")
            .push(message);
    }

    /// Every `(chat_id, text)` sent so far.
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    /// Every `(chat_id, proposal_id)` approval surface sent so far.
    pub fn button_sends(&self) -> Vec<(String, String)> {
        self.buttons.lock().expect("buttons lock poisoned").clone()
    }

    fn failing(&self) -> bool {
        self.fail_sends.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl ChatTransport for RecordingTransport {
    fn fetch_since(
        &self,
        after: Option<DateTime<Utc>>,
        chat_ids: &[String],
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        let inbound = self.inbound.lock().expect("inbound lock poisoned");
        let mut messages: Vec<InboundMessage> = inbound
            .iter()
            .filter(|m| chat_ids.contains(&m.chat_id))
            .filter(|m| after.map(|a| m.timestamp > a).unwrap_or(true))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    fn fetch_chat_since(
        &self,
        chat_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        let inbound = self.inbound.lock().expect("inbound lock poisoned");
        let mut messages: Vec<InboundMessage> = inbound
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .filter(|m| after.map(|a| m.timestamp > a).unwrap_or(true))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<(), NanoclawError> {
        if self.failing() {
            return Err(NanoclawError::TransportError("transport down".into()));
        }
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    fn send_approval_buttons(
        &self,
        chat_id: &str,
        proposal_id: &str,
        _summary: &str,
    ) -> Result<(), NanoclawError> {
        if self.failing() {
            return Err(NanoclawError::TransportError("transport down".into()));
        }
        self.buttons
            .lock()
            .expect("buttons lock poisoned")
            .push((chat_id.to_string(), proposal_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_planner_replays_in_order() {
        let planner = ScriptedPlanner::new(vec![
            Ok(PlannerReply {
                text: "one".into(),
                session_id: None,
            }),
            Err("down".into()),
        ]);
        assert_eq!(planner.complete(None, "x", false).unwrap().text, "one");
        assert!(planner.complete(None, "x", false).is_err());
        // Exhausted script keeps failing.
        assert!(planner.complete(None, "x", false).is_err());
    }

    #[test]
    fn recording_transport_filters_by_chat_and_watermark() {
        let transport = RecordingTransport::default();
        let t0 = Utc::now();
        transport.push_inbound(InboundMessage {
            chat_id: "chat-1".into(),
            sender: "alice".into(),
            text: "first".into(),
            timestamp: t0,
        });
        transport.push_inbound(InboundMessage {
            chat_id: "chat-2".into(),
            sender: "bob".into(),
            text: "other chat".into(),
            timestamp: t0,
        });

        let fetched = transport
            .fetch_since(None, &["chat-1".to_string()])
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].text, "first");

        let after = transport
            .fetch_since(Some(t0), &["chat-1".to_string()])
            .unwrap();
        assert!(after.is_empty());
    }
}
