use chrono::{SecondsFormat, Utc};
use tracing::instrument;

use carlot_core::{ChatMessage, Identity, MessageId, NewMessage, Page, SubjectId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_COLUMNS: &str =
    "SELECT id, subject, sender, receiver, content, created_at, updated_at FROM messages";

/// Fixed-width UTC timestamps so lexical order equals chronological order.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Synchronous repository over the `messages` table.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new message. A single INSERT, so either the whole record
    /// is visible or none of it is.
    #[instrument(skip(self, message), fields(subject = %message.subject, sender = %message.sender))]
    pub fn append(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let id = MessageId::new();
        let now = now_timestamp();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, subject, sender, receiver, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    message.subject.as_str(),
                    message.sender.as_str(),
                    message.receiver.as_str(),
                    message.content,
                    now,
                    now,
                ],
            )?;

            Ok(ChatMessage {
                id,
                subject: message.subject,
                sender: message.sender,
                receiver: message.receiver,
                content: message.content,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get(&self, id: &MessageId) -> Result<ChatMessage, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// Messages for a subject, oldest first. Ties on timestamp fall back to
    /// insertion order.
    #[instrument(skip(self), fields(subject = %subject, limit = page.limit, offset = page.offset))]
    pub fn list_by_conversation(
        &self,
        subject: &SubjectId,
        page: Page,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE subject = ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt.query(rusqlite::params![subject.as_str(), page.limit, page.offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(subject = %subject))]
    pub fn count_by_conversation(&self, subject: &SubjectId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE subject = ?1",
                [subject.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Remove every message of `subject` sent or received by `participant`.
    #[instrument(skip(self), fields(subject = %subject, participant = %participant))]
    pub fn delete_by_conversation_and_participant(
        &self,
        subject: &SubjectId,
        participant: &Identity,
    ) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM messages WHERE subject = ?1 AND (sender = ?2 OR receiver = ?2)",
                rusqlite::params![subject.as_str(), participant.as_str()],
            )?;
            Ok(deleted as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        subject: SubjectId::from_raw(row_helpers::get::<String>(row, 1, "messages", "subject")?),
        sender: Identity::from_raw(row_helpers::get::<String>(row, 2, "messages", "sender")?),
        receiver: Identity::from_raw(row_helpers::get::<String>(row, 3, "messages", "receiver")?),
        content: row_helpers::get(row, 4, "messages", "content")?,
        created_at: row_helpers::get(row, 5, "messages", "created_at")?,
        updated_at: row_helpers::get(row, 6, "messages", "updated_at")?,
    })
}
