//! Chat transport interface.
//!
//! The transport is an external collaborator; the core only needs message
//! ingress after a watermark, text egress, and an inline approve/deny button
//! surface. Implementations are blocking, matching the daemon's synchronous
//! loops.

use chrono::{DateTime, Utc};
use tracing::info;

use nanoclaw_types::NanoclawError;

/// One inbound chat message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Blocking chat transport used by the daemon's loops.
pub trait ChatTransport: Send + Sync {
    /// New messages strictly after `after`, limited to the given chats,
    /// in ascending time order.
    fn fetch_since(
        &self,
        after: Option<DateTime<Utc>>,
        chat_ids: &[String],
    ) -> Result<Vec<InboundMessage>, NanoclawError>;

    /// Messages in one chat strictly after `after`, ascending.
    fn fetch_chat_since(
        &self,
        chat_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, NanoclawError>;

    /// Send plain text to a chat.
    fn send_text(&self, chat_id: &str, text: &str) -> Result<(), NanoclawError>;

    /// Send the inline approve/deny surface for a pending proposal.
    fn send_approval_buttons(
        &self,
        chat_id: &str,
        proposal_id: &str,
        summary: &str,
    ) -> Result<(), NanoclawError>;
}

/// Split a message at line boundaries so every chunk fits the transport's
/// maximum size. A single oversized line is hard-split.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        let mut line = line;
        // Hard-split lines that alone exceed the limit.
        while line.len() > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let split_at = line
                .char_indices()
                .take_while(|(idx, c)| idx + c.len_utf8() <= max_len)
                .last()
                .map(|(idx, c)| idx + c.len_utf8())
                .unwrap_or(line.len());
            chunks.push(line[..split_at].to_string());
            line = &line[split_at..];
        }

        let needed = line.len() + usize::from(!current.is_empty());
        if current.len() + needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// A transport that drops outbound traffic and yields no messages.
///
/// Used when no real transport is wired, and as the base for tests that only
/// exercise the loops.
#[derive(Default)]
pub struct NullTransport;

impl ChatTransport for NullTransport {
    fn fetch_since(
        &self,
        _after: Option<DateTime<Utc>>,
        _chat_ids: &[String],
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        Ok(vec![])
    }

    fn fetch_chat_since(
        &self,
        _chat_id: &str,
        _after: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        Ok(vec![])
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<(), NanoclawError> {
        info!(chat = chat_id, len = text.len(), "outbound message dropped (null transport)");
        Ok(())
    }

    fn send_approval_buttons(
        &self,
        chat_id: &str,
        proposal_id: &str,
        _summary: &str,
    ) -> Result<(), NanoclawError> {
        info!(chat = chat_id, proposal = proposal_id, "approval surface dropped (null transport)");
        Ok(())
    }
}

/// HTTP-backed transport for a bot-gateway sidecar.
///
/// The gateway polls the chat network and exposes three endpoints:
/// `GET /messages?after=<rfc3339>` returning `{messages: [...]}`,
/// `POST /send` with `{chatJid, text}`, and `POST /buttons` with
/// `{chatJid, proposalId, summary}` for the inline approve/deny surface.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(serde::Deserialize)]
struct WireMessage {
    #[serde(rename = "chatJid")]
    chat_jid: String,
    sender: String,
    text: String,
    timestamp: DateTime<Utc>,
}

#[derive(serde::Deserialize)]
struct WireMessages {
    messages: Vec<WireMessage>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NanoclawError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("nanoclaw-daemon/0.1")
            .build()
            .map_err(|e| NanoclawError::TransportError(format!("client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn fetch(
        &self,
        after: Option<DateTime<Utc>>,
        chat_id: Option<&str>,
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        let mut request = self.client.get(self.url("messages"));
        if let Some(after) = after {
            request = request.query(&[("after", after.to_rfc3339())]);
        }
        if let Some(chat_id) = chat_id {
            request = request.query(&[("chat", chat_id)]);
        }

        let response = request
            .send()
            .map_err(|e| NanoclawError::TransportError(format!("gateway unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(NanoclawError::TransportError(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let parsed: WireMessages = response
            .json()
            .map_err(|e| NanoclawError::TransportError(format!("invalid gateway body: {e}")))?;
        let mut messages: Vec<InboundMessage> = parsed
            .messages
            .into_iter()
            .map(|m| InboundMessage {
                chat_id: m.chat_jid,
                sender: m.sender,
                text: m.text,
                timestamp: m.timestamp,
            })
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    fn post(&self, path: &str, body: serde_json::Value) -> Result<(), NanoclawError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .map_err(|e| NanoclawError::TransportError(format!("gateway unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(NanoclawError::TransportError(format!(
                "gateway returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl ChatTransport for HttpTransport {
    fn fetch_since(
        &self,
        after: Option<DateTime<Utc>>,
        chat_ids: &[String],
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        let mut messages = self.fetch(after, None)?;
        messages.retain(|m| chat_ids.contains(&m.chat_id));
        Ok(messages)
    }

    fn fetch_chat_since(
        &self,
        chat_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, NanoclawError> {
        self.fetch(after, Some(chat_id))
    }

    fn send_text(&self, chat_id: &str, text: &str) -> Result<(), NanoclawError> {
        self.post(
            "send",
            serde_json::json!({ "chatJid": chat_id, "text": text }),
        )
    }

    fn send_approval_buttons(
        &self,
        chat_id: &str,
        proposal_id: &str,
        summary: &str,
    ) -> Result<(), NanoclawError> {
        self.post(
            "buttons",
            serde_json::json!({
                "chatJid": chat_id,
                "proposalId": proposal_id,
                "summary": summary,
            }),
        )
    }
}
