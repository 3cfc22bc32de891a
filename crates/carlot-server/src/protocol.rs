//! JSON text frames exchanged over the chat WebSocket.
//!
//! Every frame carries a `type` tag. Clients send `send`; the server emits
//! `connected`, `receive`, `sent` and `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use carlot_core::{ChatError, ChatMessage, ConnectionHandle, Identity, MessageId, NewMessage};

pub const PARSE_ERROR: &str = "parse_error";

/// Inbound frame from a client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Send(SendRequest),
}

/// Payload of a `send` frame. Missing text fields default to empty so the
/// validator reports them as `invalid_message` rather than a parse error.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub content: String,
    /// Optional echo of the handshake identity.
    #[serde(default)]
    pub sender: Option<String>,
    /// Client correlation token echoed on `sent`/`error`.
    #[serde(default, rename = "ref")]
    pub reference: Option<Value>,
}

impl SendRequest {
    /// Build the message to persist, stamping the connection's identity as
    /// the sender. A conflicting `sender` field is rejected.
    pub fn into_message(self, identity: &Identity) -> Result<NewMessage, ChatError> {
        if let Some(claimed) = self.sender.as_deref() {
            if claimed != identity.as_str() {
                return Err(ChatError::InvalidMessage(format!(
                    "sender {claimed} does not match connection identity {identity}"
                )));
            }
        }
        Ok(NewMessage::new(
            self.subject,
            identity.as_str(),
            self.receiver,
            self.content,
        ))
    }
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Outbound frame to a client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        handle: ConnectionHandle,
        identity: Identity,
    },
    Receive {
        message: ChatMessage,
    },
    Sent {
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
        message_id: MessageId,
        created_at: String,
    },
    Error {
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn sent(reference: Option<Value>, message: &ChatMessage) -> Self {
        Self::Sent {
            reference,
            message_id: message.id.clone(),
            created_at: message.created_at.clone(),
        }
    }

    pub fn error(reference: Option<Value>, error: &ChatError) -> Self {
        Self::Error {
            reference,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::Error {
            reference: None,
            code: PARSE_ERROR.to_string(),
            message: format!("unparseable frame: {detail}"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
