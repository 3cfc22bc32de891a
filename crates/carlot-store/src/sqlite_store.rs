use async_trait::async_trait;
use tracing::warn;

use carlot_core::{
    ChatError, ChatMessage, Identity, MessageId, MessageStore, NewMessage, Page, SubjectId,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;

/// [`MessageStore`] backed by SQLite. Repo calls run on the blocking pool so
/// the connection mutex is never held on a runtime worker.
#[derive(Clone)]
pub struct SqliteMessageStore {
    repo: MessageRepo,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: MessageRepo::new(db),
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&MessageRepo) -> Result<T, StoreError> + Send + 'static,
    {
        let repo = self.repo.clone();
        match tokio::task::spawn_blocking(move || f(&repo)).await {
            Ok(result) => result.map_err(|e| {
                warn!(op, error = %e, "store operation failed");
                ChatError::from(e)
            }),
            Err(join) => Err(ChatError::StoreUnavailable(format!("{op} task aborted: {join}"))),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage, ChatError> {
        self.run("append", move |repo| repo.append(message)).await
    }

    async fn list_by_conversation(
        &self,
        subject: &SubjectId,
        page: Page,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let subject = subject.clone();
        self.run("list_by_conversation", move |repo| {
            repo.list_by_conversation(&subject, page)
        })
        .await
    }

    async fn delete_by_conversation_and_participant(
        &self,
        subject: &SubjectId,
        participant: &Identity,
    ) -> Result<u64, ChatError> {
        let subject = subject.clone();
        let participant = participant.clone();
        self.run("delete_by_conversation_and_participant", move |repo| {
            repo.delete_by_conversation_and_participant(&subject, &participant)
        })
        .await
    }

    async fn count_by_conversation(&self, subject: &SubjectId) -> Result<u64, ChatError> {
        let subject = subject.clone();
        self.run("count_by_conversation", move |repo| {
            repo.count_by_conversation(&subject)
        })
        .await
    }

    async fn get(&self, id: &MessageId) -> Result<Option<ChatMessage>, ChatError> {
        let id = id.clone();
        self.run("get", move |repo| match repo.get(&id) {
            Ok(message) => Ok(Some(message)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> SqliteMessageStore {
        SqliteMessageStore::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn append_then_list_through_trait() {
        let store: Arc<dyn MessageStore> = Arc::new(store());
        let stored = store
            .append(NewMessage::new("car_1", "alice", "bob", "is it still for sale?"))
            .await
            .unwrap();

        let history = store
            .list_by_conversation(&SubjectId::from_raw("car_1"), Page::default())
            .await
            .unwrap();
        assert_eq!(history, vec![stored]);
    }

    #[tokio::test]
    async fn get_finds_appended_message() {
        let store = store();
        let stored = store
            .append(NewMessage::new("car_1", "alice", "bob", "still available?"))
            .await
            .unwrap();
        let found = store.get(&stored.id).await.unwrap();
        assert_eq!(found, Some(stored));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = store();
        let found = store.get(&MessageId::from_raw("msg_nope")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn concurrent_appends_all_persist() {
        let store = Arc::new(store());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append(NewMessage::new("car_1", "alice", "bob", format!("m{i}")))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let count = store
            .count_by_conversation(&SubjectId::from_raw("car_1"))
            .await
            .unwrap();
        assert_eq!(count, 16);
    }

    #[tokio::test]
    async fn delete_through_trait_reports_count() {
        let store = store();
        store.append(NewMessage::new("car_1", "alice", "bob", "hi")).await.unwrap();
        store.append(NewMessage::new("car_1", "bob", "alice", "hey")).await.unwrap();
        let deleted = store
            .delete_by_conversation_and_participant(
                &SubjectId::from_raw("car_1"),
                &Identity::from_raw("alice"),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn database_errors_surface_as_store_unavailable() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();
        let store = SqliteMessageStore::new(db);
        let err = store
            .append(NewMessage::new("car_1", "alice", "bob", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "store_unavailable");
    }
}
