use sea_orm::entity::prelude::*;
use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use crier_core::UtcDateTime;

use crate::types::DeliveryStatus;

/// Per-recipient delivery record for a campaign. Exactly one of
/// `announcement_id` and `bulk_message_id` is set. `email` and `phone` are
/// snapshots of the contact fields at dispatch time so later directory edits
/// do not rewrite delivery history. Channel status columns stay null for
/// channels the campaign never attempted for this recipient.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "message_recipients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub announcement_id: Option<i32>,
    pub bulk_message_id: Option<i32>,
    pub user_id: i32,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_status: Option<DeliveryStatus>,
    pub sms_status: Option<DeliveryStatus>,
    pub push_status: Option<DeliveryStatus>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub sent_at: Option<UtcDateTime>,
    pub delivered_at: Option<UtcDateTime>,
    pub opened_at: Option<UtcDateTime>,
    pub clicked_at: Option<UtcDateTime>,
    pub bounced_at: Option<UtcDateTime>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl Model {
    /// Channel statuses that were actually attempted, for rollups.
    pub fn channel_statuses(&self) -> impl Iterator<Item = DeliveryStatus> + '_ {
        [self.email_status, self.sms_status, self.push_status]
            .into_iter()
            .flatten()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::announcements::Entity",
        from = "Column::AnnouncementId",
        to = "super::announcements::Column::Id"
    )]
    Announcement,
    #[sea_orm(
        belongs_to = "super::bulk_messages::Entity",
        from = "Column::BulkMessageId",
        to = "super::bulk_messages::Column::Id"
    )]
    BulkMessage,
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id"
    )]
    User,
}

impl Related<super::announcements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Announcement.def()
    }
}

impl Related<super::bulk_messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BulkMessage.def()
    }
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
