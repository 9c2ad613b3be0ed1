use std::sync::Arc;

use crier_channels::ChannelRegistry;
use crier_config::DispatchSettings;
use crier_core::error_builder::{
    conflict, forbidden, internal_server_error, not_found, unprocessable_entity,
};
use crier_core::problemdetails::Problem;
use crier_core::UtcDateTime;
use crier_directory::DirectoryError;
use crier_entities::{
    announcements, bulk_messages, message_recipients, Audience, BulkMessageStatus, ChannelList,
    DeliveryStatus, IdList, MessageCategory, Priority, TargetFilters,
};
use crier_notifications::NotificationError;
use crier_templates::TemplateError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::{
    AnnouncementService, BulkMessageService, CommunicationLogService, DeliveryScheduler,
    DispatchError, Dispatcher, RecipientTracker,
};

pub struct DispatchState {
    pub dispatcher: Arc<Dispatcher>,
    pub announcements: Arc<AnnouncementService>,
    pub bulk: Arc<BulkMessageService>,
    pub scheduler: Arc<DeliveryScheduler>,
    pub tracker: Arc<RecipientTracker>,
    pub log: Arc<CommunicationLogService>,
    pub registry: Arc<ChannelRegistry>,
    pub settings: Arc<DispatchSettings>,
}

pub(crate) fn map_dispatch_error(e: DispatchError) -> Problem {
    match e {
        DispatchError::AnnouncementNotFound { .. } | DispatchError::BulkMessageNotFound { .. } => {
            not_found().detail(e.to_string()).build()
        }
        DispatchError::Invalid { details } => unprocessable_entity().detail(details).build(),
        DispatchError::StatusConflict { details } => conflict().detail(details).build(),
        DispatchError::Forbidden { .. } => forbidden().detail(e.to_string()).build(),
        DispatchError::Directory(DirectoryError::UserNotFound { .. }) => {
            not_found().detail(e.to_string()).build()
        }
        DispatchError::Directory(DirectoryError::InvalidTargeting { .. }) => {
            unprocessable_entity().detail(e.to_string()).build()
        }
        DispatchError::Templates(TemplateError::NotFound { .. })
        | DispatchError::Templates(TemplateError::Invalid { .. })
        | DispatchError::Notifications(NotificationError::Invalid { .. }) => {
            unprocessable_entity().detail(e.to_string()).build()
        }
        DispatchError::Database(_)
        | DispatchError::Directory(_)
        | DispatchError::Templates(_)
        | DispatchError::Notifications(_)
        | DispatchError::Preferences(_)
        | DispatchError::Queue(_) => {
            tracing::error!("Dispatch error: {}", e);
            internal_server_error().build()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnnouncementResponse {
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
    #[schema(value_type = Option<String>, format = DateTime)]
    pub published_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub start_date: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_date: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub dispatched_at: Option<UtcDateTime>,
    pub attachment_ref: Option<String>,
    pub total_recipients: i32,
    pub total_sent: i32,
    pub total_delivered: i32,
    pub total_read: i32,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl AnnouncementResponse {
    pub(crate) fn map_from_announcement(a: announcements::Model) -> Self {
        Self {
            id: a.id,
            title: a.title,
            content: a.content,
            created_by: a.created_by,
            target_audience: a.target_audience,
            target_filters: a.target_filters,
            target_user_ids: a.target_user_ids,
            channels: a.channels,
            priority: a.priority,
            category: a.category,
            is_published: a.is_published,
            published_at: a.published_at,
            start_date: a.start_date,
            end_date: a.end_date,
            dispatched_at: a.dispatched_at,
            attachment_ref: a.attachment_ref,
            total_recipients: a.total_recipients,
            total_sent: a.total_sent,
            total_delivered: a.total_delivered,
            total_read: a.total_read,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnnouncementPage {
    pub items: Vec<AnnouncementResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkMessageResponse {
    pub id: i32,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub sender_id: i32,
    pub target_audience: Audience,
    pub target_filters: Option<TargetFilters>,
    pub target_user_ids: Option<IdList>,
    pub channels: ChannelList,
    pub priority: Priority,
    pub category: MessageCategory,
    pub template_id: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub template_context: Option<serde_json::Value>,
    pub status: BulkMessageStatus,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub scheduled_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub completed_at: Option<UtcDateTime>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl BulkMessageResponse {
    pub(crate) fn map_from_bulk_message(m: bulk_messages::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            subject: m.subject,
            content: m.content,
            sender_id: m.sender_id,
            target_audience: m.target_audience,
            target_filters: m.target_filters,
            target_user_ids: m.target_user_ids,
            channels: m.channels,
            priority: m.priority,
            category: m.category,
            template_id: m.template_id,
            template_context: m.template_context,
            status: m.status,
            scheduled_at: m.scheduled_at,
            started_at: m.started_at,
            completed_at: m.completed_at,
            total_recipients: m.total_recipients,
            sent_count: m.sent_count,
            failed_count: m.failed_count,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkMessagePage {
    pub items: Vec<BulkMessageResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Per-recipient delivery record as exposed to operators. Contact fields are
/// the dispatch-time snapshots, not the live directory values.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecipientResponse {
    pub id: i32,
    pub user_id: i32,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub email_status: Option<DeliveryStatus>,
    pub sms_status: Option<DeliveryStatus>,
    pub push_status: Option<DeliveryStatus>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub sent_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub delivered_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub opened_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub clicked_at: Option<UtcDateTime>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub bounced_at: Option<UtcDateTime>,
}

impl RecipientResponse {
    pub(crate) fn map_from_recipient(r: message_recipients::Model) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            email: r.email,
            phone: r.phone,
            email_status: r.email_status,
            sms_status: r.sms_status,
            push_status: r.push_status,
            retry_count: r.retry_count,
            error_message: r.error_message,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            opened_at: r.opened_at,
            clicked_at: r.clicked_at,
            bounced_at: r.bounced_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecipientPage {
    pub items: Vec<RecipientResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}
