use std::sync::Arc;

use crier_config::DispatchSettings;
use crier_core::pagination::PaginationParams;
use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_directory::AudienceDescriptor;
use crier_entities::{
    announcements, Audience, ChannelList, IdList, MessageCategory, Priority, TargetFilters,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use utoipa::ToSchema;

use super::types::{effective_channels, DispatchError};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
    pub target_audience: Audience,
    #[serde(default)]
    pub target_filters: Option<TargetFilters>,
    #[serde(default)]
    pub target_user_ids: Option<IdList>,
    /// Defaults to the configured channel set when absent.
    #[serde(default)]
    pub channels: Option<ChannelList>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub category: Option<MessageCategory>,
    /// A future start date defers publishing to the scheduled publisher.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub start_date: Option<UtcDateTime>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_date: Option<UtcDateTime>,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

/// Partial update. Wording and the display window may change at any time;
/// targeting, channels, priority and the start date are frozen once dispatch
/// has begun.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateAnnouncementRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_date: Option<UtcDateTime>,
    pub attachment_ref: Option<String>,
    pub target_audience: Option<Audience>,
    pub target_filters: Option<TargetFilters>,
    pub target_user_ids: Option<IdList>,
    pub channels: Option<ChannelList>,
    pub priority: Option<Priority>,
    pub category: Option<MessageCategory>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub start_date: Option<UtcDateTime>,
}

impl UpdateAnnouncementRequest {
    fn touches_dispatch_fields(&self) -> bool {
        self.target_audience.is_some()
            || self.target_filters.is_some()
            || self.target_user_ids.is_some()
            || self.channels.is_some()
            || self.priority.is_some()
            || self.category.is_some()
            || self.start_date.is_some()
    }
}

/// Campaign totals applied by a metric refresh, clamped so the stored
/// counters never move backwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnouncementTotals {
    pub recipients: i32,
    pub sent: i32,
    pub delivered: i32,
    pub read: i32,
}

/// Persistence and lifecycle for announcements. Dispatch itself lives in the
/// scheduler; this service owns validation, CRUD, publish/dispatch markers
/// and the denormalized totals.
pub struct AnnouncementService {
    db: Arc<DbConnection>,
    settings: Arc<DispatchSettings>,
}

impl AnnouncementService {
    pub fn new(db: Arc<DbConnection>, settings: Arc<DispatchSettings>) -> Self {
        Self { db, settings }
    }

    pub async fn create(
        &self,
        created_by: i32,
        request: CreateAnnouncementRequest,
    ) -> Result<announcements::Model, DispatchError> {
        let title = request.title.trim().to_string();
        if title.is_empty() {
            return Err(DispatchError::invalid("announcement title cannot be empty"));
        }
        if request.content.trim().is_empty() {
            return Err(DispatchError::invalid(
                "announcement content cannot be empty",
            ));
        }
        validate_dates(request.start_date, request.end_date)?;

        let descriptor = AudienceDescriptor {
            audience: request.target_audience,
            filters: request.target_filters.clone(),
            user_ids: request.target_user_ids.clone(),
        };
        descriptor.validate()?;

        let channels = effective_channels(request.channels, &self.settings)?;

        let announcement = announcements::ActiveModel {
            title: Set(title),
            content: Set(request.content),
            created_by: Set(created_by),
            target_audience: Set(request.target_audience),
            target_filters: Set(request.target_filters),
            target_user_ids: Set(request.target_user_ids),
            channels: Set(channels),
            priority: Set(request.priority.unwrap_or(self.settings.default_priority)),
            category: Set(request.category.unwrap_or(MessageCategory::General)),
            is_published: Set(false),
            start_date: Set(request.start_date),
            end_date: Set(request.end_date),
            attachment_ref: Set(request.attachment_ref),
            total_recipients: Set(0),
            total_sent: Set(0),
            total_delivered: Set(0),
            total_read: Set(0),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            announcement_id = announcement.id,
            audience = %announcement.target_audience,
            priority = %announcement.priority,
            "Created announcement"
        );
        Ok(announcement)
    }

    pub async fn get(&self, id: i32) -> Result<announcements::Model, DispatchError> {
        announcements::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(DispatchError::AnnouncementNotFound { id })
    }

    /// All announcements, newest first.
    pub async fn list(
        &self,
        params: &PaginationParams,
    ) -> Result<(Vec<announcements::Model>, u64), DispatchError> {
        let (page, page_size) = params.normalize();
        let paginator = announcements::Entity::find()
            .order_by_desc(announcements::Column::CreatedAt)
            .order_by_desc(announcements::Column::Id)
            .paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    /// Published announcements whose display window contains `now`.
    pub async fn list_active(
        &self,
        now: UtcDateTime,
    ) -> Result<Vec<announcements::Model>, DispatchError> {
        Ok(announcements::Entity::find()
            .filter(announcements::Column::IsPublished.eq(true))
            .filter(
                Condition::any()
                    .add(announcements::Column::StartDate.is_null())
                    .add(announcements::Column::StartDate.lte(now)),
            )
            .filter(
                Condition::any()
                    .add(announcements::Column::EndDate.is_null())
                    .add(announcements::Column::EndDate.gt(now)),
            )
            .order_by_desc(announcements::Column::PublishedAt)
            .order_by_desc(announcements::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn update(
        &self,
        id: i32,
        request: UpdateAnnouncementRequest,
    ) -> Result<announcements::Model, DispatchError> {
        let existing = self.get(id).await?;
        if existing.dispatched_at.is_some() && request.touches_dispatch_fields() {
            return Err(DispatchError::conflict(
                "targeting, channels, priority and start date cannot change \
                 after dispatch has begun",
            ));
        }

        let audience = request.target_audience.unwrap_or(existing.target_audience);
        let filters = request
            .target_filters
            .clone()
            .or_else(|| existing.target_filters.clone());
        let user_ids = request
            .target_user_ids
            .clone()
            .or_else(|| existing.target_user_ids.clone());
        AudienceDescriptor {
            audience,
            filters: filters.clone(),
            user_ids: user_ids.clone(),
        }
        .validate()?;

        let start = request.start_date.or(existing.start_date);
        let end = request.end_date.or(existing.end_date);
        validate_dates(start, end)?;

        let mut active: announcements::ActiveModel = existing.into();
        if let Some(title) = request.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(DispatchError::invalid("announcement title cannot be empty"));
            }
            active.title = Set(title);
        }
        if let Some(content) = request.content {
            if content.trim().is_empty() {
                return Err(DispatchError::invalid(
                    "announcement content cannot be empty",
                ));
            }
            active.content = Set(content);
        }
        if request.end_date.is_some() {
            active.end_date = Set(request.end_date);
        }
        if request.attachment_ref.is_some() {
            active.attachment_ref = Set(request.attachment_ref);
        }
        if let Some(audience) = request.target_audience {
            active.target_audience = Set(audience);
        }
        if request.target_filters.is_some() {
            active.target_filters = Set(request.target_filters);
        }
        if request.target_user_ids.is_some() {
            active.target_user_ids = Set(request.target_user_ids);
        }
        if let Some(channels) = request.channels {
            active.channels = Set(effective_channels(Some(channels), &self.settings)?);
        }
        if let Some(priority) = request.priority {
            active.priority = Set(priority);
        }
        if let Some(category) = request.category {
            active.category = Set(category);
        }
        if request.start_date.is_some() {
            active.start_date = Set(request.start_date);
        }

        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Remove the announcement; recipient rows cascade with it. Derived
    /// notifications are the facade's concern.
    pub async fn delete(&self, id: i32) -> Result<(), DispatchError> {
        let existing = self.get(id).await?;
        existing.delete(self.db.as_ref()).await?;
        tracing::info!(announcement_id = id, "Deleted announcement");
        Ok(())
    }

    /// Flip to published. Returns false when it already was.
    pub async fn mark_published(&self, id: i32, now: UtcDateTime) -> Result<bool, DispatchError> {
        let result = announcements::Entity::update_many()
            .col_expr(announcements::Column::IsPublished, Expr::value(true))
            .col_expr(announcements::Column::PublishedAt, Expr::value(now))
            .col_expr(announcements::Column::UpdatedAt, Expr::value(now))
            .filter(announcements::Column::Id.eq(id))
            .filter(announcements::Column::IsPublished.eq(false))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Claim the fan-out. The conditional write makes the scheduled publisher
    /// and the direct path race-safe: exactly one caller wins.
    pub async fn mark_dispatched(&self, id: i32, now: UtcDateTime) -> Result<bool, DispatchError> {
        let result = announcements::Entity::update_many()
            .col_expr(announcements::Column::DispatchedAt, Expr::value(now))
            .col_expr(announcements::Column::UpdatedAt, Expr::value(now))
            .filter(announcements::Column::Id.eq(id))
            .filter(announcements::Column::DispatchedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Scheduled announcements whose start date has arrived and whose fan-out
    /// has not been claimed yet.
    pub async fn due_for_publishing(
        &self,
        now: UtcDateTime,
    ) -> Result<Vec<announcements::Model>, DispatchError> {
        Ok(announcements::Entity::find()
            .filter(announcements::Column::DispatchedAt.is_null())
            .filter(announcements::Column::StartDate.is_not_null())
            .filter(announcements::Column::StartDate.lte(now))
            .order_by_asc(announcements::Column::StartDate)
            .order_by_asc(announcements::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Overwrite the denormalized totals, keeping every counter monotone.
    pub async fn apply_totals(
        &self,
        id: i32,
        totals: AnnouncementTotals,
    ) -> Result<announcements::Model, DispatchError> {
        let existing = self.get(id).await?;
        let mut active: announcements::ActiveModel = existing.clone().into();
        active.total_recipients = Set(totals.recipients.max(existing.total_recipients));
        active.total_sent = Set(totals.sent.max(existing.total_sent));
        active.total_delivered = Set(totals.delivered.max(existing.total_delivered));
        active.total_read = Set(totals.read.max(existing.total_read));
        Ok(active.update(self.db.as_ref()).await?)
    }
}

fn validate_dates(
    start: Option<UtcDateTime>,
    end: Option<UtcDateTime>,
) -> Result<(), DispatchError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            return Err(DispatchError::invalid(
                "end_date must be after start_date",
            ));
        }
    }
    Ok(())
}
