use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crier_core::pagination::PaginationParams;
use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_entities::{
    notification_counters, notifications, users, ChannelList, CommsChannel, DeliveryStatus,
    MessageCategory, Priority,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Deserialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Notification {id} not found")]
    NotFound { id: i32 },
    #[error("Invalid request: {details}")]
    Invalid { details: String },
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    pub user_id: i32,
    pub title: String,
    pub content: String,
    pub notification_type: MessageCategory,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    /// Channels the surrounding dispatch used; defaults to in-app only.
    #[serde(default)]
    pub channels_used: Option<ChannelList>,
}

/// Common payload when the same notification goes to many users at once.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NotificationPayload {
    pub title: String,
    pub content: String,
    pub notification_type: MessageCategory,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
}

/// In-app notification rows plus the denormalized per-user unread counter.
/// Every write that inserts an unread row or flips `is_read` adjusts the
/// counter inside the same transaction, so the cached badge value always
/// equals the live count.
pub struct NotificationStore {
    db: Arc<DbConnection>,
}

impl NotificationStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        request: CreateNotificationRequest,
    ) -> Result<notifications::Model, NotificationError> {
        if request.title.trim().is_empty() {
            return Err(NotificationError::Invalid {
                details: "notification title cannot be empty".to_string(),
            });
        }

        let txn = self.db.begin().await?;
        let model = insert_notification(&txn, &request).await?;
        adjust_unread_counter(&txn, request.user_id, 1).await?;
        txn.commit().await?;
        Ok(model)
    }

    /// Insert the same payload for a set of users. Unknown and duplicate ids
    /// are skipped; returns how many rows were created.
    pub async fn create_many(
        &self,
        user_ids: &[i32],
        payload: &NotificationPayload,
    ) -> Result<u64, NotificationError> {
        if payload.title.trim().is_empty() {
            return Err(NotificationError::Invalid {
                details: "notification title cannot be empty".to_string(),
            });
        }
        let mut unique: Vec<i32> = Vec::new();
        let mut seen = HashSet::new();
        for id in user_ids {
            if seen.insert(*id) {
                unique.push(*id);
            }
        }
        if unique.is_empty() {
            return Ok(0);
        }

        let known: HashSet<i32> = users::Entity::find()
            .filter(users::Column::Id.is_in(unique.iter().copied()))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();

        let txn = self.db.begin().await?;
        let mut created = 0u64;
        for user_id in unique {
            if !known.contains(&user_id) {
                tracing::warn!(user_id, "Skipping notification for unknown user");
                continue;
            }
            let request = CreateNotificationRequest {
                user_id,
                title: payload.title.clone(),
                content: payload.content.clone(),
                notification_type: payload.notification_type,
                priority: payload.priority,
                reference_type: payload.reference_type.clone(),
                reference_id: payload.reference_id,
                channels_used: None,
            };
            insert_notification(&txn, &request).await?;
            adjust_unread_counter(&txn, user_id, 1).await?;
            created += 1;
        }
        txn.commit().await?;
        Ok(created)
    }

    /// A user's notifications, newest first.
    pub async fn list(
        &self,
        user_id: i32,
        params: &PaginationParams,
        unread_only: bool,
    ) -> Result<(Vec<notifications::Model>, u64), NotificationError> {
        let (page, page_size) = params.normalize();

        let mut query = notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id))
            .order_by_desc(notifications::Column::CreatedAt)
            .order_by_desc(notifications::Column::Id);
        if unread_only {
            query = query.filter(notifications::Column::IsRead.eq(false));
        }

        let paginator = query.paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    /// The cached unread badge value; zero when the user has no counter row.
    pub async fn unread_count(&self, user_id: i32) -> Result<i32, NotificationError> {
        let counter = notification_counters::Entity::find()
            .filter(notification_counters::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?;
        Ok(counter.map(|c| c.unread_count).unwrap_or(0))
    }

    /// Count of unread rows straight from the notifications table.
    pub async fn live_unread_count(&self, user_id: i32) -> Result<u64, NotificationError> {
        Ok(notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await?)
    }

    /// Mark one owned notification read. Returns false when the row was
    /// already read; first transition wins and `read_at` never changes after.
    pub async fn mark_read(
        &self,
        user_id: i32,
        notification_id: i32,
    ) -> Result<bool, NotificationError> {
        let row = notifications::Entity::find_by_id(notification_id)
            .filter(notifications::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?
            .ok_or(NotificationError::NotFound {
                id: notification_id,
            })?;
        if row.is_read {
            return Ok(false);
        }

        let txn = self.db.begin().await?;
        let mut active: notifications::ActiveModel = row.into();
        active.is_read = Set(true);
        active.read_at = Set(Some(chrono::Utc::now()));
        active.update(&txn).await?;
        adjust_unread_counter(&txn, user_id, -1).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Mark a set of owned notifications read; ids the user does not own, or
    /// rows already read, are ignored. Returns how many rows transitioned.
    pub async fn mark_many_read(
        &self,
        user_id: i32,
        notification_ids: &[i32],
    ) -> Result<u64, NotificationError> {
        if notification_ids.is_empty() {
            return Ok(0);
        }

        let txn = self.db.begin().await?;
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::IsRead, Expr::value(true))
            .col_expr(
                notifications::Column::ReadAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(notifications::Column::UserId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .filter(notifications::Column::Id.is_in(notification_ids.iter().copied()))
            .exec(&txn)
            .await?;
        if result.rows_affected > 0 {
            adjust_unread_counter(&txn, user_id, -(result.rows_affected as i32)).await?;
        }
        txn.commit().await?;
        Ok(result.rows_affected)
    }

    /// Unread rows created at or after `since`, newest first, for digests.
    pub async fn unread_since(
        &self,
        user_id: i32,
        since: UtcDateTime,
    ) -> Result<Vec<notifications::Model>, NotificationError> {
        Ok(notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .filter(notifications::Column::CreatedAt.gte(since))
            .order_by_desc(notifications::Column::CreatedAt)
            .order_by_desc(notifications::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Delete read notifications older than the cutoff; unread rows are never
    /// cleaned up. Returns the number of rows removed.
    pub async fn delete_read_before(&self, cutoff: UtcDateTime) -> Result<u64, NotificationError> {
        let result = notifications::Entity::delete_many()
            .filter(notifications::Column::IsRead.eq(true))
            .filter(notifications::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Delete every notification derived from a campaign, keeping unread
    /// counters in step. Used when the owning campaign is deleted.
    pub async fn delete_for_reference(
        &self,
        reference_type: &str,
        reference_id: i32,
    ) -> Result<u64, NotificationError> {
        let rows = notifications::Entity::find()
            .filter(notifications::Column::ReferenceType.eq(reference_type))
            .filter(notifications::Column::ReferenceId.eq(reference_id))
            .all(self.db.as_ref())
            .await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut unread_per_user: HashMap<i32, i32> = HashMap::new();
        for row in &rows {
            if !row.is_read {
                *unread_per_user.entry(row.user_id).or_default() += 1;
            }
        }

        let txn = self.db.begin().await?;
        let result = notifications::Entity::delete_many()
            .filter(notifications::Column::ReferenceType.eq(reference_type))
            .filter(notifications::Column::ReferenceId.eq(reference_id))
            .exec(&txn)
            .await?;
        for (user_id, unread) in unread_per_user {
            adjust_unread_counter(&txn, user_id, -unread).await?;
        }
        txn.commit().await?;
        Ok(result.rows_affected)
    }

    /// Per-user read state of the notifications derived from a campaign, as
    /// `(user_id, is_read)` pairs. Campaign metric refreshes fold these in
    /// alongside the recipient rows.
    pub async fn reference_read_stats(
        &self,
        reference_type: &str,
        reference_id: i32,
    ) -> Result<Vec<(i32, bool)>, NotificationError> {
        let rows = notifications::Entity::find()
            .filter(notifications::Column::ReferenceType.eq(reference_type))
            .filter(notifications::Column::ReferenceId.eq(reference_id))
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(|row| (row.user_id, row.is_read)).collect())
    }
}

async fn insert_notification<C: ConnectionTrait>(
    conn: &C,
    request: &CreateNotificationRequest,
) -> Result<notifications::Model, NotificationError> {
    let channels = match &request.channels_used {
        Some(list) if !list.is_empty() => list.clone(),
        _ => ChannelList(vec![CommsChannel::InApp]),
    };
    let model = notifications::ActiveModel {
        user_id: Set(request.user_id),
        title: Set(request.title.clone()),
        content: Set(request.content.clone()),
        notification_type: Set(request.notification_type),
        priority: Set(request.priority.unwrap_or(Priority::Medium)),
        reference_type: Set(request.reference_type.clone()),
        reference_id: Set(request.reference_id),
        channels_used: Set(channels),
        delivery_status: Set(DeliveryStatus::Sent),
        is_read: Set(false),
        read_at: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(model)
}

/// Apply a delta to a user's unread counter, creating the row on first use.
/// The counter never goes below zero.
async fn adjust_unread_counter<C: ConnectionTrait>(
    conn: &C,
    user_id: i32,
    delta: i32,
) -> Result<(), sea_orm::DbErr> {
    let existing = notification_counters::Entity::find()
        .filter(notification_counters::Column::UserId.eq(user_id))
        .one(conn)
        .await?;

    match existing {
        Some(counter) => {
            let next = (counter.unread_count + delta).max(0);
            let mut active: notification_counters::ActiveModel = counter.into();
            active.unread_count = Set(next);
            active.update(conn).await?;
        }
        None => {
            notification_counters::ActiveModel {
                user_id: Set(user_id),
                unread_count: Set(delta.max(0)),
                ..Default::default()
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}
