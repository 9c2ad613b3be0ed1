use std::sync::Arc;

use chrono::Utc;
use crier_database::DbConnection;
use crier_entities::{device_tokens, DevicePlatform};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::debug;

use super::types::DirectoryError;

/// Push device token registry. Tokens are unique across users; a token seen
/// again is reassigned to the latest user (device handed over or re-login).
pub struct DeviceTokenService {
    db: Arc<DbConnection>,
}

impl DeviceTokenService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn register(
        &self,
        user_id: i32,
        token: &str,
        platform: DevicePlatform,
    ) -> Result<device_tokens::Model, DirectoryError> {
        let now = Utc::now();

        let existing = device_tokens::Entity::find()
            .filter(device_tokens::Column::Token.eq(token))
            .one(self.db.as_ref())
            .await?;

        let model = match existing {
            Some(existing) => {
                let mut active: device_tokens::ActiveModel = existing.into();
                active.user_id = Set(user_id);
                active.platform = Set(platform);
                active.is_active = Set(true);
                active.last_seen_at = Set(Some(now));
                active.update(self.db.as_ref()).await?
            }
            None => {
                device_tokens::ActiveModel {
                    user_id: Set(user_id),
                    token: Set(token.to_string()),
                    platform: Set(platform),
                    is_active: Set(true),
                    last_seen_at: Set(Some(now)),
                    ..Default::default()
                }
                .insert(self.db.as_ref())
                .await?
            }
        };

        debug!(user_id, platform = %model.platform, "Registered device token");
        Ok(model)
    }

    /// Deactivate a token, typically after the push provider reports it gone.
    pub async fn deactivate(&self, token: &str) -> Result<bool, DirectoryError> {
        let existing = device_tokens::Entity::find()
            .filter(device_tokens::Column::Token.eq(token))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(existing) if existing.is_active => {
                let mut active: device_tokens::ActiveModel = existing.into();
                active.is_active = Set(false);
                active.update(self.db.as_ref()).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn active_tokens_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<device_tokens::Model>, DirectoryError> {
        Ok(device_tokens::Entity::find()
            .filter(device_tokens::Column::UserId.eq(user_id))
            .filter(device_tokens::Column::IsActive.eq(true))
            .order_by_asc(device_tokens::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Batch lookup used by the push fan-out: all active tokens for a set of
    /// recipients in one query.
    pub async fn active_tokens_for_users(
        &self,
        user_ids: &[i32],
    ) -> Result<Vec<device_tokens::Model>, DirectoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(device_tokens::Entity::find()
            .filter(device_tokens::Column::UserId.is_in(user_ids.iter().copied()))
            .filter(device_tokens::Column::IsActive.eq(true))
            .order_by_asc(device_tokens::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}
