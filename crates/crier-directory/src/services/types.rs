use crier_entities::{Audience, IdList, TargetFilters};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("User not found: {id}")]
    UserNotFound { id: i32 },

    #[error("Invalid targeting: {details}")]
    InvalidTargeting { details: String },
}

/// Declarative audience selection, stored verbatim on campaign rows.
///
/// Filters AND-compose on top of the audience. `custom` must carry at least
/// one non-empty filter or an explicit id list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AudienceDescriptor {
    pub audience: Audience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<TargetFilters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<IdList>,
}

impl Default for AudienceDescriptor {
    fn default() -> Self {
        AudienceDescriptor {
            audience: Audience::All,
            filters: None,
            user_ids: None,
        }
    }
}

impl AudienceDescriptor {
    pub fn for_audience(audience: Audience) -> Self {
        AudienceDescriptor {
            audience,
            ..Default::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        self.filters.as_ref().map(|f| !f.is_empty()).unwrap_or(false)
    }

    pub fn has_user_ids(&self) -> bool {
        self.user_ids
            .as_ref()
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    /// Reject under-specified targeting before anything is persisted.
    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.audience == Audience::Custom && !self.has_filters() && !self.has_user_ids() {
            return Err(DirectoryError::InvalidTargeting {
                details: "custom audience requires filters or an explicit user id list"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Audience size preview: resolution count plus per-channel contact coverage.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReachEstimate {
    pub total: u64,
    pub reachable_by_channel: ChannelReach,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChannelReach {
    pub email: u64,
    pub sms: u64,
    pub push: u64,
    pub in_app: u64,
}
