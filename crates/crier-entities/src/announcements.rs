use sea_orm::entity::prelude::*;
use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use crier_core::UtcDateTime;

use crate::types::{Audience, ChannelList, IdList, MessageCategory, Priority, TargetFilters};

/// Broadcast campaign. Publishing fans delivery out to the resolved audience;
/// `dispatched_at` marks that fan-out has been enqueued so the scheduled
/// publisher never dispatches the same announcement twice. The `total_*`
/// counters are denormalized from recipient rows and only move forward.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "announcements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    pub content: String,
    pub created_by: i32,
    pub target_audience: Audience,
    pub target_filters: Option<TargetFilters>,
    pub target_user_ids: Option<IdList>,
    pub channels: ChannelList,
    pub priority: Priority,
    pub category: MessageCategory,
    pub is_published: bool,
    pub published_at: Option<UtcDateTime>,
    pub start_date: Option<UtcDateTime>,
    pub end_date: Option<UtcDateTime>,
    pub dispatched_at: Option<UtcDateTime>,
    pub attachment_ref: Option<String>,
    pub total_recipients: i32,
    pub total_sent: i32,
    pub total_delivered: i32,
    pub total_read: i32,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::CreatedBy",
        to = "super::users::Column::Id"
    )]
    Author,
    #[sea_orm(has_many = "super::message_recipients::Entity")]
    MessageRecipients,
}

impl Related<super::message_recipients::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MessageRecipients.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
