use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveTime;
use crier_core::capability_guard;
use crier_core::error_builder::{internal_server_error, not_found, unprocessable_entity};
use crier_core::pagination::PaginationParams;
use crier_core::problemdetails::Problem;
use crier_core::{CallerContext, UtcDateTime};
use crier_entities::{
    notifications, preferences, ChannelList, CommsChannel, DeliveryStatus, DigestFrequency,
    MessageCategory, Priority,
};
use serde::{Deserialize, Serialize};
use utoipa::OpenApi;

use crate::preferences::{PreferenceError, PreferenceService, UpdatePreferencesRequest};
use crate::store::{
    CreateNotificationRequest, NotificationError, NotificationPayload, NotificationStore,
};

pub struct NotificationState {
    pub store: Arc<NotificationStore>,
    pub preferences: Arc<PreferenceService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_notifications,
        unread_count,
        create_notification,
        bulk_create_notifications,
        mark_notification_read,
        mark_notifications_read,
        get_my_preferences,
        update_my_preferences
    ),
    components(schemas(
        NotificationResponse,
        NotificationPage,
        UnreadCountResponse,
        CreateNotificationRequest,
        BulkCreateNotificationsRequest,
        BulkCreateResponse,
        MarkReadResponse,
        MarkManyReadRequest,
        NotificationPayload,
        PreferencesResponse,
        UpdatePreferencesRequest,
        MessageCategory,
        Priority,
        CommsChannel,
        ChannelList,
        DeliveryStatus,
        DigestFrequency
    )),
    info(
        title = "Notifications API",
        description = "In-app notification center: per-user notification feed, \
        unread counters, read receipts, and delivery preferences.",
        version = "1.0.0"
    )
)]
pub struct NotificationsApiDoc;

pub fn configure_routes() -> Router<Arc<NotificationState>> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications", post(create_notification))
        .route("/notifications/bulk", post(bulk_create_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read", post(mark_notifications_read))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .route("/preferences/me", get(get_my_preferences))
        .route("/preferences/me", put(update_my_preferences))
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationResponse {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub notification_type: MessageCategory,
    pub priority: Priority,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub channels_used: ChannelList,
    pub delivery_status: DeliveryStatus,
    pub is_read: bool,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub read_at: Option<UtcDateTime>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

impl NotificationResponse {
    fn map_from_notification(n: notifications::Model) -> Self {
        Self {
            id: n.id,
            title: n.title,
            content: n.content,
            notification_type: n.notification_type,
            priority: n.priority,
            reference_type: n.reference_type,
            reference_id: n.reference_id,
            channels_used: n.channels_used,
            delivery_status: n.delivery_status,
            is_read: n.is_read,
            read_at: n.read_at,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotificationPage {
    pub items: Vec<NotificationResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UnreadCountResponse {
    pub unread_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(flatten)]
    pub pagination: PaginationParams,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BulkCreateNotificationsRequest {
    pub user_ids: Vec<i32>,
    #[serde(flatten)]
    pub payload: NotificationPayload,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BulkCreateResponse {
    pub created: u64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MarkReadResponse {
    /// Rows that actually transitioned to read.
    pub updated: u64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct MarkManyReadRequest {
    pub notification_ids: Vec<i32>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PreferencesResponse {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub whatsapp_enabled: bool,
    pub academic_alerts: bool,
    pub financial_alerts: bool,
    pub attendance_alerts: bool,
    pub general_announcements: bool,
    pub marketing_messages: bool,
    #[schema(value_type = String, example = "22:00:00")]
    pub quiet_hours_start: NaiveTime,
    #[schema(value_type = String, example = "06:00:00")]
    pub quiet_hours_end: NaiveTime,
    pub weekend_notifications: bool,
    pub digest_frequency: DigestFrequency,
    pub preferred_language: String,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl PreferencesResponse {
    fn map_from_preferences(p: preferences::Model) -> Self {
        Self {
            email_enabled: p.email_enabled,
            sms_enabled: p.sms_enabled,
            push_enabled: p.push_enabled,
            in_app_enabled: p.in_app_enabled,
            whatsapp_enabled: p.whatsapp_enabled,
            academic_alerts: p.academic_alerts,
            financial_alerts: p.financial_alerts,
            attendance_alerts: p.attendance_alerts,
            general_announcements: p.general_announcements,
            marketing_messages: p.marketing_messages,
            quiet_hours_start: p.quiet_hours_start,
            quiet_hours_end: p.quiet_hours_end,
            weekend_notifications: p.weekend_notifications,
            digest_frequency: p.digest_frequency,
            preferred_language: p.preferred_language,
            updated_at: p.updated_at,
        }
    }
}

fn map_notification_error(e: NotificationError) -> Problem {
    match e {
        NotificationError::NotFound { .. } => not_found().detail(e.to_string()).build(),
        NotificationError::Invalid { details } => unprocessable_entity().detail(details).build(),
        NotificationError::Database(e) => {
            tracing::error!("Notification storage error: {}", e);
            internal_server_error().build()
        }
    }
}

fn map_preference_error(e: PreferenceError) -> Problem {
    match e {
        PreferenceError::Database(e) => {
            tracing::error!("Preference storage error: {}", e);
            internal_server_error().build()
        }
    }
}

/// List the caller's notifications
#[utoipa::path(
    tag = "Notifications",
    get,
    path = "/notifications",
    params(
        PaginationParams,
        ("unread_only" = Option<bool>, Query, description = "Only return unread rows")
    ),
    responses(
        (status = 200, description = "Newest-first page of the caller's notifications", body = NotificationPage),
        (status = 401, description = "Missing caller identity")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_notifications(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<impl IntoResponse, Problem> {
    let (page, page_size) = query.pagination.normalize();
    let (items, total) = state
        .store
        .list(caller.user_id, &query.pagination, query.unread_only)
        .await
        .map_err(map_notification_error)?;

    Ok(Json(NotificationPage {
        items: items
            .into_iter()
            .map(NotificationResponse::map_from_notification)
            .collect(),
        total,
        page,
        page_size,
    }))
}

/// The caller's unread badge value
#[utoipa::path(
    tag = "Notifications",
    get,
    path = "/notifications/unread-count",
    responses(
        (status = 200, description = "Cached unread count", body = UnreadCountResponse),
        (status = 401, description = "Missing caller identity")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn unread_count(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
) -> Result<impl IntoResponse, Problem> {
    let unread_count = state
        .store
        .unread_count(caller.user_id)
        .await
        .map_err(map_notification_error)?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// Send one user an in-app notification
#[utoipa::path(
    tag = "Notifications",
    post,
    path = "/notifications",
    request_body = CreateNotificationRequest,
    responses(
        (status = 201, description = "Notification created", body = NotificationResponse),
        (status = 403, description = "Caller lacks the notifications:send capability"),
        (status = 422, description = "Invalid notification payload")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn create_notification(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Json(request): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, NotificationsSend);

    let created = state
        .store
        .create(request)
        .await
        .map_err(map_notification_error)?;
    Ok((
        StatusCode::CREATED,
        Json(NotificationResponse::map_from_notification(created)),
    ))
}

/// Send the same notification to a set of users
#[utoipa::path(
    tag = "Notifications",
    post,
    path = "/notifications/bulk",
    request_body = BulkCreateNotificationsRequest,
    responses(
        (status = 201, description = "Rows created; unknown users are skipped", body = BulkCreateResponse),
        (status = 403, description = "Caller lacks the notifications:send capability"),
        (status = 422, description = "Invalid notification payload")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn bulk_create_notifications(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Json(request): Json<BulkCreateNotificationsRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, NotificationsSend);

    let created = state
        .store
        .create_many(&request.user_ids, &request.payload)
        .await
        .map_err(map_notification_error)?;
    Ok((StatusCode::CREATED, Json(BulkCreateResponse { created })))
}

/// Mark one notification read
#[utoipa::path(
    tag = "Notifications",
    post,
    path = "/notifications/{id}/read",
    params(
        ("id" = i32, Path, description = "Notification id")
    ),
    responses(
        (status = 200, description = "Read state after the call", body = MarkReadResponse),
        (status = 404, description = "No such notification owned by the caller")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn mark_notification_read(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let transitioned = state
        .store
        .mark_read(caller.user_id, id)
        .await
        .map_err(map_notification_error)?;
    Ok(Json(MarkReadResponse {
        updated: transitioned as u64,
    }))
}

/// Mark a set of notifications read
#[utoipa::path(
    tag = "Notifications",
    post,
    path = "/notifications/read",
    request_body = MarkManyReadRequest,
    responses(
        (status = 200, description = "How many rows transitioned", body = MarkReadResponse)
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn mark_notifications_read(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Json(request): Json<MarkManyReadRequest>,
) -> Result<impl IntoResponse, Problem> {
    let updated = state
        .store
        .mark_many_read(caller.user_id, &request.notification_ids)
        .await
        .map_err(map_notification_error)?;
    Ok(Json(MarkReadResponse { updated }))
}

/// The caller's delivery preferences
#[utoipa::path(
    tag = "Preferences",
    get,
    path = "/preferences/me",
    responses(
        (status = 200, description = "Stored preferences, created with defaults on first read", body = PreferencesResponse),
        (status = 401, description = "Missing caller identity")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn get_my_preferences(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
) -> Result<impl IntoResponse, Problem> {
    let preferences = state
        .preferences
        .get_or_create(caller.user_id)
        .await
        .map_err(map_preference_error)?;
    Ok(Json(PreferencesResponse::map_from_preferences(preferences)))
}

/// Update the caller's delivery preferences
#[utoipa::path(
    tag = "Preferences",
    put,
    path = "/preferences/me",
    request_body = UpdatePreferencesRequest,
    responses(
        (status = 200, description = "Preferences after the partial update", body = PreferencesResponse)
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn update_my_preferences(
    caller: CallerContext,
    State(state): State<Arc<NotificationState>>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, Problem> {
    let updated = state
        .preferences
        .update(caller.user_id, request)
        .await
        .map_err(map_preference_error)?;
    Ok(Json(PreferencesResponse::map_from_preferences(updated)))
}
