use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use crier_channels::{ChannelAdapter, DeliveryItem, DeliveryResult, SendOutcome};
use crier_database::DbConnection;
use crier_entities::{users, ChannelList, CommsChannel};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use crate::store::{CreateNotificationRequest, NotificationStore};

/// In-app delivery writes a notification row instead of leaving the process.
/// The only per-recipient failure is an unknown user; storage trouble defers
/// so the scheduler retries.
pub struct InAppAdapter {
    store: Arc<NotificationStore>,
    db: Arc<DbConnection>,
}

impl InAppAdapter {
    pub fn new(store: Arc<NotificationStore>, db: Arc<DbConnection>) -> Self {
        Self { store, db }
    }
}

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn channel(&self) -> CommsChannel {
        CommsChannel::InApp
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send_batch(&self, items: &[DeliveryItem]) -> Vec<DeliveryResult> {
        let user_ids: Vec<i32> = items.iter().map(|item| item.user_id).collect();
        let known: HashSet<i32> = match users::Entity::find()
            .filter(users::Column::Id.is_in(user_ids))
            .all(self.db.as_ref())
            .await
        {
            Ok(rows) => rows.into_iter().map(|u| u.id).collect(),
            Err(e) => {
                tracing::error!("In-app batch user lookup failed: {}", e);
                return items
                    .iter()
                    .map(|item| {
                        DeliveryResult::new(
                            item.user_id,
                            SendOutcome::deferred(format!("storage: {}", e)),
                        )
                    })
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if !known.contains(&item.user_id) {
                results.push(DeliveryResult::new(
                    item.user_id,
                    SendOutcome::failed("unknown_user"),
                ));
                continue;
            }

            let request = CreateNotificationRequest {
                user_id: item.user_id,
                title: item.message.subject.clone(),
                content: item.message.body.clone(),
                notification_type: item.category,
                priority: Some(item.priority),
                reference_type: item.reference_type.clone(),
                reference_id: item.reference_id,
                channels_used: Some(ChannelList(vec![CommsChannel::InApp])),
            };
            match self.store.create(request).await {
                Ok(_) => results.push(DeliveryResult::new(item.user_id, SendOutcome::Sent)),
                Err(e) => {
                    tracing::error!(user_id = item.user_id, "In-app write failed: {}", e);
                    results.push(DeliveryResult::new(
                        item.user_id,
                        SendOutcome::deferred(format!("storage: {}", e)),
                    ));
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::{MessageCategory, Priority};
    use crier_templates::RenderedMessage;
    use sea_orm::{ActiveModelTrait, Set};

    async fn seed_user(db: &sea_orm::DatabaseConnection) -> i32 {
        users::ActiveModel {
            first_name: Set("Asha".to_string()),
            last_name: Set("Rao".to_string()),
            email: Set(None),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
        .id
    }

    fn item(user_id: i32, title: &str) -> DeliveryItem {
        DeliveryItem::new(
            user_id,
            RenderedMessage {
                subject: title.to_string(),
                body: format!("{} details", title),
            },
        )
        .with_category(MessageCategory::Attendance)
        .with_priority(Priority::High)
        .with_reference("announcement", 7)
    }

    #[tokio::test]
    async fn batch_writes_rows_and_flags_unknown_users() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let user_id = seed_user(test_db.connection()).await;
        let store = Arc::new(NotificationStore::new(test_db.connection_arc()));
        let adapter = InAppAdapter::new(store.clone(), test_db.connection_arc());

        assert_eq!(adapter.channel(), CommsChannel::InApp);
        assert!(adapter.is_configured());

        let results = adapter
            .send_batch(&[item(user_id, "Late arrival"), item(424242, "Ghost")])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].user_id, user_id);
        assert!(results[0].outcome.is_sent());
        assert_eq!(
            results[1].outcome,
            SendOutcome::failed("unknown_user")
        );

        assert_eq!(store.unread_count(user_id).await.unwrap(), 1);
        let row = crier_entities::notifications::Entity::find()
            .one(test_db.connection())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.title, "Late arrival");
        assert_eq!(row.notification_type, MessageCategory::Attendance);
        assert_eq!(row.priority, Priority::High);
        assert_eq!(row.reference_type.as_deref(), Some("announcement"));
        assert_eq!(row.reference_id, Some(7));
    }
}
