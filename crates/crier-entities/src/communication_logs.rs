use sea_orm::entity::prelude::*;
use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use crier_core::UtcDateTime;

use crate::types::{CommsChannel, DeliveryStatus};

/// Event type strings recorded in the `event_type` column.
pub mod event_types {
    /// A recipient row's channel status changed (adapter result or callback).
    pub const DELIVERY: &str = "delivery";
    /// A short-circuit single-user notification send.
    pub const NOTIFICATION: &str = "notification";
    /// A resolved user was dropped at materialization, with the reason in
    /// the metadata.
    pub const RECIPIENT_DROPPED: &str = "recipient_dropped";
}

/// Append-only audit trail. Every delivery status transition, skip and drop
/// lands here; rows are never updated and are only removed by the retention
/// cleanup job. `content_type`/`content_id` identify the campaign without a
/// foreign key so log history survives campaign deletion.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "communication_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub event_type: String,
    pub channel: Option<CommsChannel>,
    pub status: DeliveryStatus,
    pub sender_id: Option<i32>,
    pub recipient_user_id: i32,
    pub content_type: Option<String>,
    pub content_id: Option<i32>,
    pub metadata: Option<Json>,
    pub created_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(chrono::Utc::now());
        }

        Ok(self)
    }
}
