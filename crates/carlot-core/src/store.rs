use async_trait::async_trait;

use crate::errors::ChatError;
use crate::ids::{Identity, MessageId, SubjectId};
use crate::messages::{ChatMessage, NewMessage, Page};

/// Durable, append-only message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assign id and timestamps, persist atomically, return the stored record.
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, ChatError>;

    /// Messages for one conversation subject, oldest first.
    async fn list_by_conversation(
        &self,
        subject: &SubjectId,
        page: Page,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    /// Remove messages of `subject` where `participant` is sender or receiver.
    /// Returns the number of messages removed. Not transactional with
    /// concurrent appends to the same subject.
    async fn delete_by_conversation_and_participant(
        &self,
        subject: &SubjectId,
        participant: &Identity,
    ) -> Result<u64, ChatError>;

    async fn count_by_conversation(&self, subject: &SubjectId) -> Result<u64, ChatError>;

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, ChatError>;
}
