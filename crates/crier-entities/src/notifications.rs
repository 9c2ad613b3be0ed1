use sea_orm::entity::prelude::*;
use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use crier_core::UtcDateTime;

use crate::types::{ChannelList, DeliveryStatus, MessageCategory, Priority};

/// In-app notification shown in a user's notification center. The unread
/// counter in `notification_counters` is adjusted in the same transaction as
/// every insert and read-marking. `reference_type`/`reference_id` point back
/// at the announcement, bulk message, or thread that produced the row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub content: String,
    pub notification_type: MessageCategory,
    pub priority: Priority,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub channels_used: ChannelList,
    pub delivery_status: DeliveryStatus,
    pub is_read: bool,
    pub read_at: Option<UtcDateTime>,
    pub created_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

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
