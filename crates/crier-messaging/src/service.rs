use std::collections::HashMap;
use std::sync::Arc;

use crier_database::DbConnection;
use crier_entities::{direct_messages, message_reads, message_threads, thread_participants};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("thread {id} not found")]
    ThreadNotFound { id: i32 },
    #[error("message {id} not found")]
    MessageNotFound { id: i32 },
    #[error("user {user_id} is not a participant of thread {thread_id}")]
    NotParticipant { thread_id: i32, user_id: i32 },
    #[error("{details}")]
    Invalid { details: String },
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl MessagingError {
    fn invalid(details: impl Into<String>) -> Self {
        MessagingError::Invalid {
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateThreadRequest {
    pub subject: String,
    pub participant_ids: Vec<i32>,
}

/// A thread together with its participant list.
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub thread: message_threads::Model,
    pub participant_ids: Vec<i32>,
}

/// A message together with who has read it.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub message: direct_messages::Model,
    pub read_by: Vec<i32>,
}

/// CRUD over message threads. Every operation is scoped to the calling user:
/// a thread is only visible to its participants, and the creator is always a
/// participant.
pub struct MessagingService {
    db: Arc<DbConnection>,
}

impl MessagingService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create_thread(
        &self,
        creator_id: i32,
        request: CreateThreadRequest,
    ) -> Result<ThreadView, MessagingError> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(MessagingError::invalid("Thread subject must not be empty"));
        }

        let mut participant_ids = request.participant_ids;
        participant_ids.push(creator_id);
        participant_ids.sort_unstable();
        participant_ids.dedup();

        let thread = message_threads::ActiveModel {
            subject: Set(subject.to_string()),
            created_by: Set(creator_id),
            last_message_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        for user_id in &participant_ids {
            thread_participants::ActiveModel {
                thread_id: Set(thread.id),
                user_id: Set(*user_id),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await?;
        }

        tracing::info!(
            thread_id = thread.id,
            participants = participant_ids.len(),
            "Created message thread"
        );
        Ok(ThreadView {
            thread,
            participant_ids,
        })
    }

    /// Threads the user participates in, most recently active first. Threads
    /// without messages sort by creation time.
    pub async fn list_threads(&self, user_id: i32) -> Result<Vec<ThreadView>, MessagingError> {
        let memberships = thread_participants::Entity::find()
            .filter(thread_participants::Column::UserId.eq(user_id))
            .all(self.db.as_ref())
            .await?;
        let thread_ids: Vec<i32> = memberships.iter().map(|m| m.thread_id).collect();
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut threads = message_threads::Entity::find()
            .filter(message_threads::Column::Id.is_in(thread_ids.clone()))
            .all(self.db.as_ref())
            .await?;
        threads.sort_by_key(|t| std::cmp::Reverse(t.last_message_at.unwrap_or(t.created_at)));

        let participants = thread_participants::Entity::find()
            .filter(thread_participants::Column::ThreadId.is_in(thread_ids))
            .all(self.db.as_ref())
            .await?;
        let mut by_thread: HashMap<i32, Vec<i32>> = HashMap::new();
        for participant in participants {
            by_thread
                .entry(participant.thread_id)
                .or_default()
                .push(participant.user_id);
        }

        Ok(threads
            .into_iter()
            .map(|thread| {
                let mut participant_ids = by_thread.remove(&thread.id).unwrap_or_default();
                participant_ids.sort_unstable();
                ThreadView {
                    participant_ids,
                    thread,
                }
            })
            .collect())
    }

    async fn require_participant(
        &self,
        thread_id: i32,
        user_id: i32,
    ) -> Result<message_threads::Model, MessagingError> {
        let thread = message_threads::Entity::find_by_id(thread_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(MessagingError::ThreadNotFound { id: thread_id })?;
        let is_member = thread_participants::Entity::find()
            .filter(thread_participants::Column::ThreadId.eq(thread_id))
            .filter(thread_participants::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .is_some();
        if !is_member {
            return Err(MessagingError::NotParticipant { thread_id, user_id });
        }
        Ok(thread)
    }

    /// Append a message and bump the thread's activity timestamp.
    pub async fn post_message(
        &self,
        thread_id: i32,
        sender_id: i32,
        content: &str,
    ) -> Result<direct_messages::Model, MessagingError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MessagingError::invalid("Message content must not be empty"));
        }
        let thread = self.require_participant(thread_id, sender_id).await?;

        let message = direct_messages::ActiveModel {
            thread_id: Set(thread_id),
            sender_id: Set(sender_id),
            content: Set(content.to_string()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        let mut bump: message_threads::ActiveModel = thread.into();
        bump.last_message_at = Set(Some(message.created_at));
        bump.update(self.db.as_ref()).await?;

        Ok(message)
    }

    /// Messages in a thread, oldest first, with read receipts.
    pub async fn list_messages(
        &self,
        thread_id: i32,
        caller_id: i32,
    ) -> Result<Vec<MessageView>, MessagingError> {
        self.require_participant(thread_id, caller_id).await?;

        let messages = direct_messages::Entity::find()
            .filter(direct_messages::Column::ThreadId.eq(thread_id))
            .order_by_asc(direct_messages::Column::Id)
            .all(self.db.as_ref())
            .await?;
        let message_ids: Vec<i32> = messages.iter().map(|m| m.id).collect();

        let reads = message_reads::Entity::find()
            .filter(message_reads::Column::MessageId.is_in(message_ids))
            .all(self.db.as_ref())
            .await?;
        let mut by_message: HashMap<i32, Vec<i32>> = HashMap::new();
        for read in reads {
            by_message
                .entry(read.message_id)
                .or_default()
                .push(read.user_id);
        }

        Ok(messages
            .into_iter()
            .map(|message| {
                let mut read_by = by_message.remove(&message.id).unwrap_or_default();
                read_by.sort_unstable();
                MessageView { message, read_by }
            })
            .collect())
    }

    /// Record a read receipt. Returns false when the message was already
    /// read by this user; marking twice is a no-op, not an error.
    pub async fn mark_message_read(
        &self,
        message_id: i32,
        user_id: i32,
    ) -> Result<bool, MessagingError> {
        let message = direct_messages::Entity::find_by_id(message_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(MessagingError::MessageNotFound { id: message_id })?;
        self.require_participant(message.thread_id, user_id).await?;

        let existing = message_reads::Entity::find()
            .filter(message_reads::Column::MessageId.eq(message_id))
            .filter(message_reads::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        message_reads::ActiveModel {
            message_id: Set(message_id),
            user_id: Set(user_id),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;

    async fn messaging() -> (TestDatabase, MessagingService) {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let service = MessagingService::new(test_db.connection_arc());
        (test_db, service)
    }

    fn thread_request(subject: &str, participants: Vec<i32>) -> CreateThreadRequest {
        CreateThreadRequest {
            subject: subject.to_string(),
            participant_ids: participants,
        }
    }

    #[tokio::test]
    async fn creator_is_always_a_participant() {
        let (_db, service) = messaging().await;

        let view = service
            .create_thread(1, thread_request("Field trip", vec![2, 3, 2]))
            .await
            .unwrap();
        assert_eq!(view.thread.subject, "Field trip");
        assert_eq!(view.thread.created_by, 1);
        // Deduplicated, creator included.
        assert_eq!(view.participant_ids, vec![1, 2, 3]);

        let err = service
            .create_thread(1, thread_request("   ", vec![2]))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Invalid { .. }));
    }

    #[tokio::test]
    async fn listing_orders_by_latest_activity() {
        let (_db, service) = messaging().await;

        let first = service
            .create_thread(1, thread_request("First", vec![2]))
            .await
            .unwrap();
        let second = service
            .create_thread(1, thread_request("Second", vec![2]))
            .await
            .unwrap();
        // Other users' threads stay invisible.
        service
            .create_thread(3, thread_request("Private", vec![4]))
            .await
            .unwrap();

        // New messages float the older thread to the top.
        service
            .post_message(first.thread.id, 2, "hello")
            .await
            .unwrap();

        let threads = service.list_threads(1).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread.id, first.thread.id);
        assert_eq!(threads[1].thread.id, second.thread.id);
        assert!(threads[0].thread.last_message_at.is_some());

        assert!(service.list_threads(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_participants_can_post_or_read() {
        let (_db, service) = messaging().await;
        let view = service
            .create_thread(1, thread_request("Homework", vec![2]))
            .await
            .unwrap();

        let err = service
            .post_message(view.thread.id, 9, "intruding")
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::NotParticipant { .. }));

        let err = service.list_messages(view.thread.id, 9).await.unwrap_err();
        assert!(matches!(err, MessagingError::NotParticipant { .. }));

        let err = service.post_message(404, 1, "hello").await.unwrap_err();
        assert!(matches!(err, MessagingError::ThreadNotFound { id: 404 }));

        let err = service
            .post_message(view.thread.id, 1, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Invalid { .. }));
    }

    #[tokio::test]
    async fn read_receipts_apply_once() {
        let (_db, service) = messaging().await;
        let view = service
            .create_thread(1, thread_request("Homework", vec![2]))
            .await
            .unwrap();
        let message = service
            .post_message(view.thread.id, 1, "Please review")
            .await
            .unwrap();

        assert!(service.mark_message_read(message.id, 2).await.unwrap());
        // Second marking is a no-op.
        assert!(!service.mark_message_read(message.id, 2).await.unwrap());

        let messages = service.list_messages(view.thread.id, 1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].read_by, vec![2]);

        let err = service.mark_message_read(404, 2).await.unwrap_err();
        assert!(matches!(err, MessagingError::MessageNotFound { id: 404 }));
        let err = service.mark_message_read(message.id, 9).await.unwrap_err();
        assert!(matches!(err, MessagingError::NotParticipant { .. }));
    }
}
