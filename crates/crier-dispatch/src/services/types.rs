use crier_config::DispatchSettings;
use crier_core::access::Capability;
use crier_directory::DirectoryError;
use crier_entities::{ChannelList, DeliveryStatus};
use crier_notifications::{NotificationError, PreferenceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Announcement {id} not found")]
    AnnouncementNotFound { id: i32 },

    #[error("Bulk message {id} not found")]
    BulkMessageNotFound { id: i32 },

    #[error("Invalid campaign: {details}")]
    Invalid { details: String },

    #[error("{details}")]
    StatusConflict { details: String },

    #[error("This operation requires the {capability} capability")]
    Forbidden { capability: Capability },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Templates(#[from] crier_templates::TemplateError),

    #[error(transparent)]
    Notifications(#[from] NotificationError),

    #[error(transparent)]
    Preferences(#[from] PreferenceError),

    #[error("Failed to enqueue dispatch job: {0}")]
    Queue(#[from] crier_core::jobs::QueueError),
}

impl DispatchError {
    pub fn invalid(details: impl Into<String>) -> Self {
        DispatchError::Invalid {
            details: details.into(),
        }
    }

    pub fn conflict(details: impl Into<String>) -> Self {
        DispatchError::StatusConflict {
            details: details.into(),
        }
    }
}

/// Resolve a campaign's channel set: explicit lists must be non-empty, an
/// absent list falls back to the configured default.
pub(crate) fn effective_channels(
    channels: Option<ChannelList>,
    settings: &DispatchSettings,
) -> Result<ChannelList, DispatchError> {
    match channels {
        Some(list) if list.is_empty() => Err(DispatchError::invalid(
            "at least one delivery channel is required",
        )),
        Some(list) => Ok(list),
        None => Ok(settings.default_channels.clone()),
    }
}

/// Which campaign a recipient row, log event, or dispatch job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignRef {
    Announcement(i32),
    BulkMessage(i32),
}

impl CampaignRef {
    pub fn content_type(&self) -> &'static str {
        match self {
            CampaignRef::Announcement(_) => "announcement",
            CampaignRef::BulkMessage(_) => "bulk_message",
        }
    }

    pub fn content_id(&self) -> i32 {
        match self {
            CampaignRef::Announcement(id) | CampaignRef::BulkMessage(id) => *id,
        }
    }
}

impl std::fmt::Display for CampaignRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.content_type(), self.content_id())
    }
}

/// Provider delivery callback event, shared by the webhook handler and the
/// recipient tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Delivered,
    Bounced,
    Opened,
    Clicked,
}

impl CallbackKind {
    pub fn target_status(&self) -> DeliveryStatus {
        match self {
            CallbackKind::Delivered => DeliveryStatus::Delivered,
            CallbackKind::Bounced => DeliveryStatus::Bounced,
            CallbackKind::Opened => DeliveryStatus::Opened,
            CallbackKind::Clicked => DeliveryStatus::Clicked,
        }
    }
}

/// Per-channel delivery counts for campaign analytics and daily rollups.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChannelCounts {
    pub queued: u64,
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub failed: u64,
    pub bounced: u64,
    pub cancelled: u64,
}

impl ChannelCounts {
    pub fn observe(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Queued | DeliveryStatus::Sending => self.queued += 1,
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::Opened => self.opened += 1,
            DeliveryStatus::Clicked => self.clicked += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Bounced => self.bounced += 1,
            DeliveryStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Rows that reached at least `sent` on this channel.
    pub fn reached_sent(&self) -> u64 {
        self.sent + self.delivered + self.opened + self.clicked + self.bounced
    }

    /// Rows that reached at least `delivered` on this channel.
    pub fn reached_delivered(&self) -> u64 {
        self.delivered + self.opened + self.clicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_ref_identifies_content() {
        let a = CampaignRef::Announcement(3);
        assert_eq!(a.content_type(), "announcement");
        assert_eq!(a.content_id(), 3);
        assert_eq!(a.to_string(), "announcement 3");

        let b = CampaignRef::BulkMessage(9);
        assert_eq!(b.content_type(), "bulk_message");
        assert_eq!(b.content_id(), 9);
    }

    #[test]
    fn callback_kinds_map_to_statuses() {
        assert_eq!(
            CallbackKind::Delivered.target_status(),
            DeliveryStatus::Delivered
        );
        assert_eq!(CallbackKind::Bounced.target_status(), DeliveryStatus::Bounced);
        assert_eq!(CallbackKind::Opened.target_status(), DeliveryStatus::Opened);
        assert_eq!(CallbackKind::Clicked.target_status(), DeliveryStatus::Clicked);
    }

    #[test]
    fn channel_counts_fold_cumulative_stages() {
        let mut counts = ChannelCounts::default();
        for status in [
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Opened,
            DeliveryStatus::Clicked,
            DeliveryStatus::Failed,
        ] {
            counts.observe(status);
        }
        assert_eq!(counts.reached_sent(), 4);
        assert_eq!(counts.reached_delivered(), 3);
        assert_eq!(counts.failed, 1);
    }
}
