use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::{Identity, MessageId, SubjectId};

/// An inbound send request before it has been persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub subject: SubjectId,
    pub sender: Identity,
    pub receiver: Identity,
    pub content: String,
}

impl NewMessage {
    pub fn new(
        subject: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            subject: SubjectId::from_raw(subject),
            sender: Identity::from_raw(sender),
            receiver: Identity::from_raw(receiver),
            content: content.into(),
        }
    }

    /// Check required fields and the content size limit (bytes).
    pub fn validate(&self, max_content_len: usize) -> Result<(), ChatError> {
        if self.subject.is_blank() {
            return Err(ChatError::InvalidMessage("subject is required".into()));
        }
        if self.sender.is_blank() {
            return Err(ChatError::InvalidMessage("sender is required".into()));
        }
        if self.receiver.is_blank() {
            return Err(ChatError::InvalidMessage("receiver is required".into()));
        }
        if self.content.trim().is_empty() {
            return Err(ChatError::InvalidMessage("content is required".into()));
        }
        if self.content.len() > max_content_len {
            return Err(ChatError::InvalidMessage(format!(
                "content is {} bytes, limit is {max_content_len}",
                self.content.len()
            )));
        }
        Ok(())
    }

    /// True if `identity` sent or received this message.
    pub fn involves(&self, identity: &Identity) -> bool {
        &self.sender == identity || &self.receiver == identity
    }
}

/// A persisted chat message. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub subject: SubjectId,
    pub sender: Identity,
    pub receiver: Identity,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatMessage {
    pub fn involves(&self, identity: &Identity) -> bool {
        &self.sender == identity || &self.receiver == identity
    }
}

/// Pagination window for history reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::MAX_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
