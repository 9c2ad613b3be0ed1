use std::sync::Arc;

use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_entities::{communication_logs, CommsChannel, DeliveryStatus};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde::Serialize;
use utoipa::ToSchema;

use super::types::{CampaignRef, DispatchError};

pub use crier_entities::communication_logs::event_types;

/// One event headed for the append-only communication log.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub event_type: &'static str,
    pub channel: Option<CommsChannel>,
    pub status: DeliveryStatus,
    pub sender_id: Option<i32>,
    pub recipient_user_id: i32,
    pub content_type: Option<String>,
    pub content_id: Option<i32>,
    pub metadata: Option<serde_json::Value>,
}

impl LogEvent {
    pub fn delivery(recipient_user_id: i32, channel: CommsChannel, status: DeliveryStatus) -> Self {
        Self {
            event_type: event_types::DELIVERY,
            channel: Some(channel),
            status,
            sender_id: None,
            recipient_user_id,
            content_type: None,
            content_id: None,
            metadata: None,
        }
    }

    pub fn notification(recipient_user_id: i32, channel: CommsChannel, status: DeliveryStatus) -> Self {
        Self {
            event_type: event_types::NOTIFICATION,
            channel: Some(channel),
            status,
            sender_id: None,
            recipient_user_id,
            content_type: None,
            content_id: None,
            metadata: None,
        }
    }

    pub fn recipient_dropped(recipient_user_id: i32, reason: &str) -> Self {
        Self {
            event_type: event_types::RECIPIENT_DROPPED,
            channel: None,
            status: DeliveryStatus::Failed,
            sender_id: None,
            recipient_user_id,
            content_type: None,
            content_id: None,
            metadata: Some(serde_json::json!({ "reason": reason })),
        }
    }

    pub fn for_campaign(mut self, campaign: CampaignRef) -> Self {
        self.content_type = Some(campaign.content_type().to_string());
        self.content_id = Some(campaign.content_id());
        self
    }

    pub fn from_sender(mut self, sender_id: i32) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Recent per-channel delivery health, derived from log events.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChannelFailureRate {
    pub channel: CommsChannel,
    pub events: u64,
    pub failures: u64,
    pub failure_rate: f64,
}

/// Append-only audit trail of every delivery transition, drop, and
/// short-circuit send. Rows are never updated; only the retention job
/// removes them.
pub struct CommunicationLogService {
    db: Arc<DbConnection>,
}

impl CommunicationLogService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn record(&self, event: LogEvent) -> Result<(), DispatchError> {
        communication_logs::ActiveModel {
            event_type: Set(event.event_type.to_string()),
            channel: Set(event.channel),
            status: Set(event.status),
            sender_id: Set(event.sender_id),
            recipient_user_id: Set(event.recipient_user_id),
            content_type: Set(event.content_type),
            content_id: Set(event.content_id),
            metadata: Set(event.metadata),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn record_many(&self, events: Vec<LogEvent>) -> Result<(), DispatchError> {
        for event in events {
            self.record(event).await?;
        }
        Ok(())
    }

    /// Events for one campaign, oldest first (for audit views and tests).
    pub async fn events_for_campaign(
        &self,
        campaign: CampaignRef,
    ) -> Result<Vec<communication_logs::Model>, DispatchError> {
        Ok(communication_logs::Entity::find()
            .filter(communication_logs::Column::ContentType.eq(campaign.content_type()))
            .filter(communication_logs::Column::ContentId.eq(campaign.content_id()))
            .all(self.db.as_ref())
            .await?)
    }

    /// Retention cleanup. Returns the number of rows removed.
    pub async fn delete_older_than(&self, cutoff: UtcDateTime) -> Result<u64, DispatchError> {
        let result = communication_logs::Entity::delete_many()
            .filter(communication_logs::Column::CreatedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Per-channel failure share among delivery events since the given
    /// instant, for the health endpoint.
    pub async fn failure_rates_since(
        &self,
        since: UtcDateTime,
    ) -> Result<Vec<ChannelFailureRate>, DispatchError> {
        let mut rates = Vec::with_capacity(4);
        for channel in CommsChannel::all() {
            let base = communication_logs::Entity::find()
                .filter(communication_logs::Column::EventType.eq(event_types::DELIVERY))
                .filter(communication_logs::Column::Channel.eq(channel))
                .filter(communication_logs::Column::CreatedAt.gte(since));
            let events = base.clone().count(self.db.as_ref()).await?;
            let failures = base
                .filter(
                    communication_logs::Column::Status
                        .is_in([DeliveryStatus::Failed, DeliveryStatus::Bounced]),
                )
                .count(self.db.as_ref())
                .await?;
            let failure_rate = if events == 0 {
                0.0
            } else {
                failures as f64 / events as f64
            };
            rates.push(ChannelFailureRate {
                channel,
                events,
                failures,
                failure_rate,
            });
        }
        Ok(rates)
    }
}
