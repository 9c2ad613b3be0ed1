use std::sync::Arc;

use crier_config::DispatchSettings;
use crier_core::pagination::PaginationParams;
use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_directory::AudienceDescriptor;
use crier_entities::{
    bulk_messages, Audience, BulkMessageStatus, ChannelList, IdList, MessageCategory, Priority,
    TargetFilters,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::types::{effective_channels, DispatchError};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateBulkMessageRequest {
    /// Operator-facing campaign name.
    pub name: String,
    #[serde(default)]
    pub subject: String,
    /// Literal body; may be empty when a template supplies the content.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub template_id: Option<i32>,
    /// Extra variables merged into each recipient's render context.
    #[serde(default)]
    pub template_context: Option<serde_json::Value>,
    pub target_audience: Audience,
    #[serde(default)]
    pub target_filters: Option<TargetFilters>,
    #[serde(default)]
    pub target_user_ids: Option<IdList>,
    #[serde(default)]
    pub channels: Option<ChannelList>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub category: Option<MessageCategory>,
    /// A future time hands the draft to the scheduled publisher.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub scheduled_at: Option<UtcDateTime>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema)]
pub struct ListBulkMessagesQuery {
    #[serde(default)]
    pub status: Option<BulkMessageStatus>,
}

/// Persistence and status lifecycle for bulk messages. Campaign status moves
/// strictly forward (draft, sending, then sent or failed) through conditional
/// updates; cancellation is reachable from draft and sending, and a cancelled
/// draft that never started may be reopened.
pub struct BulkMessageService {
    db: Arc<DbConnection>,
    settings: Arc<DispatchSettings>,
}

impl BulkMessageService {
    pub fn new(db: Arc<DbConnection>, settings: Arc<DispatchSettings>) -> Self {
        Self { db, settings }
    }

    pub async fn create_draft(
        &self,
        sender_id: i32,
        request: CreateBulkMessageRequest,
    ) -> Result<bulk_messages::Model, DispatchError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(DispatchError::invalid("campaign name cannot be empty"));
        }
        if request.content.trim().is_empty() && request.template_id.is_none() {
            return Err(DispatchError::invalid(
                "either message content or a template is required",
            ));
        }

        let descriptor = AudienceDescriptor {
            audience: request.target_audience,
            filters: request.target_filters.clone(),
            user_ids: request.target_user_ids.clone(),
        };
        descriptor.validate()?;

        let channels = effective_channels(request.channels, &self.settings)?;

        let message = bulk_messages::ActiveModel {
            name: Set(name),
            subject: Set(request.subject),
            content: Set(request.content),
            sender_id: Set(sender_id),
            target_audience: Set(request.target_audience),
            target_filters: Set(request.target_filters),
            target_user_ids: Set(request.target_user_ids),
            channels: Set(channels),
            priority: Set(request.priority.unwrap_or(self.settings.default_priority)),
            category: Set(request.category.unwrap_or(MessageCategory::General)),
            template_id: Set(request.template_id),
            template_context: Set(request.template_context),
            status: Set(BulkMessageStatus::Draft),
            scheduled_at: Set(request.scheduled_at),
            total_recipients: Set(0),
            sent_count: Set(0),
            failed_count: Set(0),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            bulk_message_id = message.id,
            name = %message.name,
            audience = %message.target_audience,
            scheduled = message.scheduled_at.is_some(),
            "Created bulk message draft"
        );
        Ok(message)
    }

    pub async fn get(&self, id: i32) -> Result<bulk_messages::Model, DispatchError> {
        bulk_messages::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(DispatchError::BulkMessageNotFound { id })
    }

    pub async fn list(
        &self,
        params: &PaginationParams,
        status: Option<BulkMessageStatus>,
    ) -> Result<(Vec<bulk_messages::Model>, u64), DispatchError> {
        let (page, page_size) = params.normalize();
        let mut query = bulk_messages::Entity::find();
        if let Some(status) = status {
            query = query.filter(bulk_messages::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(bulk_messages::Column::CreatedAt)
            .order_by_desc(bulk_messages::Column::Id)
            .paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    /// Remove a campaign that never started sending. Recipient rows (none
    /// should exist) cascade with it.
    pub async fn delete(&self, id: i32) -> Result<(), DispatchError> {
        let existing = self.get(id).await?;
        if !matches!(
            existing.status,
            BulkMessageStatus::Draft | BulkMessageStatus::Cancelled
        ) {
            return Err(DispatchError::conflict(
                "only draft or cancelled bulk messages can be deleted",
            ));
        }
        existing.delete(self.db.as_ref()).await?;
        tracing::info!(bulk_message_id = id, "Deleted bulk message");
        Ok(())
    }

    /// Claim the draft for dispatch. Returns false when the campaign is not
    /// a draft anymore (already claimed, cancelled, done).
    pub async fn mark_sending(&self, id: i32, now: UtcDateTime) -> Result<bool, DispatchError> {
        let result = bulk_messages::Entity::update_many()
            .col_expr(
                bulk_messages::Column::Status,
                Expr::value(BulkMessageStatus::Sending),
            )
            .col_expr(bulk_messages::Column::StartedAt, Expr::value(now))
            .col_expr(bulk_messages::Column::UpdatedAt, Expr::value(now))
            .filter(bulk_messages::Column::Id.eq(id))
            .filter(bulk_messages::Column::Status.eq(BulkMessageStatus::Draft))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Move a finished campaign out of `sending`. A cancellation that landed
    /// mid-run wins: the conditional update then no-ops and the status stays
    /// `cancelled`.
    pub async fn mark_completed(
        &self,
        id: i32,
        outcome: BulkMessageStatus,
        now: UtcDateTime,
    ) -> Result<bool, DispatchError> {
        debug_assert!(matches!(
            outcome,
            BulkMessageStatus::Sent | BulkMessageStatus::Failed
        ));
        let result = bulk_messages::Entity::update_many()
            .col_expr(bulk_messages::Column::Status, Expr::value(outcome))
            .col_expr(bulk_messages::Column::CompletedAt, Expr::value(now))
            .col_expr(bulk_messages::Column::UpdatedAt, Expr::value(now))
            .filter(bulk_messages::Column::Id.eq(id))
            .filter(bulk_messages::Column::Status.eq(BulkMessageStatus::Sending))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Cancel a draft or an in-flight campaign. Returns the status the
    /// campaign held beforehand so callers know whether recipient rows need
    /// freezing. Cancelling twice conflicts.
    pub async fn cancel(&self, id: i32) -> Result<BulkMessageStatus, DispatchError> {
        let existing = self.get(id).await?;
        let previous = existing.status;
        if !matches!(
            previous,
            BulkMessageStatus::Draft | BulkMessageStatus::Sending
        ) {
            return Err(DispatchError::conflict(format!(
                "a {} bulk message cannot be cancelled",
                previous
            )));
        }

        let now = chrono::Utc::now();
        let result = bulk_messages::Entity::update_many()
            .col_expr(
                bulk_messages::Column::Status,
                Expr::value(BulkMessageStatus::Cancelled),
            )
            .col_expr(bulk_messages::Column::CompletedAt, Expr::value(now))
            .col_expr(bulk_messages::Column::UpdatedAt, Expr::value(now))
            .filter(bulk_messages::Column::Id.eq(id))
            .filter(bulk_messages::Column::Status.eq(previous))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            // Lost a race with the dispatcher or another cancel.
            return Err(DispatchError::conflict(
                "the bulk message changed status while cancelling; retry",
            ));
        }

        tracing::info!(bulk_message_id = id, previous = %previous, "Cancelled bulk message");
        Ok(previous)
    }

    /// Put a cancelled campaign that never started back into draft.
    pub async fn reopen(&self, id: i32) -> Result<bulk_messages::Model, DispatchError> {
        let existing = self.get(id).await?;
        if existing.status != BulkMessageStatus::Cancelled || existing.started_at.is_some() {
            return Err(DispatchError::conflict(
                "only a cancelled bulk message that never started can be reopened",
            ));
        }
        let mut active: bulk_messages::ActiveModel = existing.into();
        active.status = Set(BulkMessageStatus::Draft);
        active.completed_at = Set(None);
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Accumulate per-batch delivery counts.
    pub async fn add_progress(
        &self,
        id: i32,
        sent_delta: i32,
        failed_delta: i32,
    ) -> Result<(), DispatchError> {
        if sent_delta == 0 && failed_delta == 0 {
            return Ok(());
        }
        bulk_messages::Entity::update_many()
            .col_expr(
                bulk_messages::Column::SentCount,
                Expr::col(bulk_messages::Column::SentCount).add(sent_delta),
            )
            .col_expr(
                bulk_messages::Column::FailedCount,
                Expr::col(bulk_messages::Column::FailedCount).add(failed_delta),
            )
            .col_expr(
                bulk_messages::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(bulk_messages::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Accumulate materialized recipients as batches resolve.
    pub async fn add_recipients(&self, id: i32, delta: i32) -> Result<(), DispatchError> {
        if delta == 0 {
            return Ok(());
        }
        bulk_messages::Entity::update_many()
            .col_expr(
                bulk_messages::Column::TotalRecipients,
                Expr::col(bulk_messages::Column::TotalRecipients).add(delta),
            )
            .col_expr(
                bulk_messages::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(bulk_messages::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Scheduled drafts whose send time has arrived.
    pub async fn due_for_sending(
        &self,
        now: UtcDateTime,
    ) -> Result<Vec<bulk_messages::Model>, DispatchError> {
        Ok(bulk_messages::Entity::find()
            .filter(bulk_messages::Column::Status.eq(BulkMessageStatus::Draft))
            .filter(bulk_messages::Column::ScheduledAt.is_not_null())
            .filter(bulk_messages::Column::ScheduledAt.lte(now))
            .order_by_asc(bulk_messages::Column::ScheduledAt)
            .order_by_asc(bulk_messages::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use crier_database::test_utils::TestDatabase;
    use crier_entities::users;

    async fn seed_user(db: &DbConnection) -> i32 {
        users::ActiveModel {
            first_name: Set("Office".to_string()),
            last_name: Set("Admin".to_string()),
            email: Set(Some("office@school.example".to_string())),
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

    async fn setup() -> (TestDatabase, BulkMessageService, i32) {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let sender = seed_user(test_db.connection()).await;
        let settings = Arc::new(DispatchSettings::from_lookup(|_| None).unwrap());
        let service = BulkMessageService::new(test_db.connection_arc(), settings);
        (test_db, service, sender)
    }

    fn minimal_request() -> CreateBulkMessageRequest {
        CreateBulkMessageRequest {
            name: "Fee reminder".to_string(),
            subject: "Term fees due".to_string(),
            content: "Term fees are due next week.".to_string(),
            template_id: None,
            template_context: None,
            target_audience: Audience::Parents,
            target_filters: None,
            target_user_ids: None,
            channels: None,
            priority: None,
            category: Some(MessageCategory::Financial),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn drafts_start_in_draft_with_defaults() {
        let (_db, service, sender) = setup().await;
        let draft = service.create_draft(sender, minimal_request()).await.unwrap();

        assert_eq!(draft.status, BulkMessageStatus::Draft);
        assert_eq!(draft.priority, Priority::Medium);
        assert!(!draft.channels.is_empty());
        assert!(draft.started_at.is_none());
        assert_eq!(draft.total_recipients, 0);
    }

    #[tokio::test]
    async fn content_or_template_is_required() {
        let (_db, service, sender) = setup().await;

        let empty = CreateBulkMessageRequest {
            content: "  ".to_string(),
            ..minimal_request()
        };
        assert!(matches!(
            service.create_draft(sender, empty).await,
            Err(DispatchError::Invalid { .. })
        ));

        // A template stands in for literal content.
        let templated = CreateBulkMessageRequest {
            content: String::new(),
            template_id: Some(7),
            ..minimal_request()
        };
        assert!(service.create_draft(sender, templated).await.is_ok());
    }

    #[tokio::test]
    async fn status_moves_strictly_forward() {
        let (_db, service, sender) = setup().await;
        let draft = service.create_draft(sender, minimal_request()).await.unwrap();
        let now = Utc::now();

        assert!(service.mark_sending(draft.id, now).await.unwrap());
        // Second claim loses.
        assert!(!service.mark_sending(draft.id, now).await.unwrap());

        assert!(service
            .mark_completed(draft.id, BulkMessageStatus::Sent, now)
            .await
            .unwrap());
        let done = service.get(draft.id).await.unwrap();
        assert_eq!(done.status, BulkMessageStatus::Sent);
        assert!(done.completed_at.is_some());

        // Nothing moves a finished campaign.
        assert!(!service
            .mark_completed(draft.id, BulkMessageStatus::Failed, now)
            .await
            .unwrap());
        assert!(matches!(
            service.cancel(draft.id).await,
            Err(DispatchError::StatusConflict { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_reports_the_previous_status() {
        let (_db, service, sender) = setup().await;

        let draft = service.create_draft(sender, minimal_request()).await.unwrap();
        assert_eq!(
            service.cancel(draft.id).await.unwrap(),
            BulkMessageStatus::Draft
        );

        let sending = service.create_draft(sender, minimal_request()).await.unwrap();
        service.mark_sending(sending.id, Utc::now()).await.unwrap();
        assert_eq!(
            service.cancel(sending.id).await.unwrap(),
            BulkMessageStatus::Sending
        );

        // A cancelled campaign cannot complete.
        assert!(!service
            .mark_completed(sending.id, BulkMessageStatus::Sent, Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reopen_only_revives_never_started_drafts() {
        let (_db, service, sender) = setup().await;

        let draft = service.create_draft(sender, minimal_request()).await.unwrap();
        service.cancel(draft.id).await.unwrap();
        let reopened = service.reopen(draft.id).await.unwrap();
        assert_eq!(reopened.status, BulkMessageStatus::Draft);
        assert!(reopened.completed_at.is_none());

        let started = service.create_draft(sender, minimal_request()).await.unwrap();
        service.mark_sending(started.id, Utc::now()).await.unwrap();
        service.cancel(started.id).await.unwrap();
        assert!(matches!(
            service.reopen(started.id).await,
            Err(DispatchError::StatusConflict { .. })
        ));
    }

    #[tokio::test]
    async fn progress_counters_accumulate() {
        let (_db, service, sender) = setup().await;
        let draft = service.create_draft(sender, minimal_request()).await.unwrap();

        service.add_recipients(draft.id, 100).await.unwrap();
        service.add_recipients(draft.id, 50).await.unwrap();
        service.add_progress(draft.id, 95, 5).await.unwrap();
        service.add_progress(draft.id, 40, 10).await.unwrap();

        let current = service.get(draft.id).await.unwrap();
        assert_eq!(current.total_recipients, 150);
        assert_eq!(current.sent_count, 135);
        assert_eq!(current.failed_count, 15);
    }

    #[tokio::test]
    async fn scheduled_drafts_become_due() {
        let (_db, service, sender) = setup().await;
        let now = Utc::now();

        let due = service
            .create_draft(
                sender,
                CreateBulkMessageRequest {
                    scheduled_at: Some(now - Duration::minutes(1)),
                    ..minimal_request()
                },
            )
            .await
            .unwrap();
        let future = service
            .create_draft(
                sender,
                CreateBulkMessageRequest {
                    scheduled_at: Some(now + Duration::hours(2)),
                    ..minimal_request()
                },
            )
            .await
            .unwrap();
        let unscheduled = service.create_draft(sender, minimal_request()).await.unwrap();

        let ready = service.due_for_sending(now).await.unwrap();
        let ids: Vec<i32> = ready.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![due.id]);
        assert!(!ids.contains(&future.id));
        assert!(!ids.contains(&unscheduled.id));

        // Claimed campaigns drop out of the due list.
        service.mark_sending(due.id, now).await.unwrap();
        assert!(service.due_for_sending(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let (_db, service, sender) = setup().await;
        let a = service.create_draft(sender, minimal_request()).await.unwrap();
        let b = service.create_draft(sender, minimal_request()).await.unwrap();
        service.mark_sending(b.id, Utc::now()).await.unwrap();

        let (drafts, total) = service
            .list(&PaginationParams::default(), Some(BulkMessageStatus::Draft))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(drafts[0].id, a.id);

        let (all, total) = service.list(&PaginationParams::default(), None).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);
    }
}
