use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use crier_core::capability_guard;
use crier_core::pagination::PaginationParams;
use crier_core::problemdetails::Problem;
use crier_core::CallerContext;
use crier_entities::{
    Audience, ChannelList, CommsChannel, IdList, MessageCategory, Priority, TargetFilters,
};
use utoipa::OpenApi;

use crate::services::{
    CampaignAnalytics, ChannelAnalytics, ChannelCounts, ChannelFanout, CreateAnnouncementRequest,
    EmergencyAlertRequest, FanoutStatus, InAppAnalytics, NotificationSendReport,
    SendNotificationRequest, UpdateAnnouncementRequest,
};

use super::types::{map_dispatch_error, AnnouncementPage, AnnouncementResponse, DispatchState};

#[derive(OpenApi)]
#[openapi(
    paths(
        create_announcement,
        list_announcements,
        list_active_announcements,
        get_announcement,
        update_announcement,
        delete_announcement,
        refresh_announcement_metrics,
        announcement_analytics,
        send_emergency_alert,
        send_notification
    ),
    components(schemas(
        AnnouncementResponse,
        AnnouncementPage,
        CreateAnnouncementRequest,
        UpdateAnnouncementRequest,
        EmergencyAlertRequest,
        SendNotificationRequest,
        NotificationSendReport,
        ChannelFanout,
        FanoutStatus,
        CampaignAnalytics,
        ChannelAnalytics,
        InAppAnalytics,
        ChannelCounts,
        Audience,
        TargetFilters,
        IdList,
        ChannelList,
        CommsChannel,
        MessageCategory,
        Priority
    )),
    info(
        title = "Announcements API",
        description = "Broadcast campaigns: creation with immediate or scheduled \
        publishing, the active feed, delivery analytics, emergency alerts, and \
        the direct single-user send path.",
        version = "1.0.0"
    )
)]
pub struct AnnouncementsApiDoc;

pub fn configure_routes() -> Router<Arc<DispatchState>> {
    Router::new()
        .route("/announcements", post(create_announcement))
        .route("/announcements", get(list_announcements))
        .route("/announcements/active", get(list_active_announcements))
        .route("/announcements/emergency", post(send_emergency_alert))
        .route("/announcements/{id}", get(get_announcement))
        .route("/announcements/{id}", put(update_announcement))
        .route("/announcements/{id}", delete(delete_announcement))
        .route(
            "/announcements/{id}/refresh-metrics",
            post(refresh_announcement_metrics),
        )
        .route("/announcements/{id}/analytics", get(announcement_analytics))
        .route("/notifications/send", post(send_notification))
}

/// Create an announcement
///
/// Publishes immediately unless `start_date` lies in the future, in which
/// case the scheduled publisher picks it up once due.
#[utoipa::path(
    tag = "Announcements",
    post,
    path = "/announcements",
    request_body = CreateAnnouncementRequest,
    responses(
        (status = 201, description = "Announcement created (and published when due)", body = AnnouncementResponse),
        (status = 403, description = "Caller lacks the announcements:manage capability"),
        (status = 422, description = "Invalid dates, targeting, or content")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn create_announcement(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Json(request): Json<CreateAnnouncementRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsManage);

    let created = state
        .dispatcher
        .create_announcement(caller.user_id, request)
        .await
        .map_err(map_dispatch_error)?;
    Ok((
        StatusCode::CREATED,
        Json(AnnouncementResponse::map_from_announcement(created)),
    ))
}

/// List announcements, newest first
#[utoipa::path(
    tag = "Announcements",
    get,
    path = "/announcements",
    params(PaginationParams),
    responses(
        (status = 200, description = "Page of announcements", body = AnnouncementPage),
        (status = 403, description = "Caller lacks the announcements:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_announcements(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsRead);

    let (page, page_size) = params.normalize();
    let (items, total) = state
        .announcements
        .list(&params)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(AnnouncementPage {
        items: items
            .into_iter()
            .map(AnnouncementResponse::map_from_announcement)
            .collect(),
        total,
        page,
        page_size,
    }))
}

/// Published announcements currently in their display window
#[utoipa::path(
    tag = "Announcements",
    get,
    path = "/announcements/active",
    responses(
        (status = 200, description = "Active announcements, most recently published first", body = Vec<AnnouncementResponse>),
        (status = 403, description = "Caller lacks the announcements:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_active_announcements(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsRead);

    let items = state
        .announcements
        .list_active(Utc::now())
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(
        items
            .into_iter()
            .map(AnnouncementResponse::map_from_announcement)
            .collect::<Vec<_>>(),
    ))
}

/// Fetch one announcement
#[utoipa::path(
    tag = "Announcements",
    get,
    path = "/announcements/{id}",
    params(
        ("id" = i32, Path, description = "Announcement id")
    ),
    responses(
        (status = 200, description = "The announcement", body = AnnouncementResponse),
        (status = 404, description = "No such announcement")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn get_announcement(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsRead);

    let announcement = state
        .announcements
        .get(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(AnnouncementResponse::map_from_announcement(
        announcement,
    )))
}

/// Update an announcement
///
/// Wording and the display window may change at any time; targeting,
/// channels, priority and the start date are frozen once dispatch has begun.
#[utoipa::path(
    tag = "Announcements",
    put,
    path = "/announcements/{id}",
    params(
        ("id" = i32, Path, description = "Announcement id")
    ),
    request_body = UpdateAnnouncementRequest,
    responses(
        (status = 200, description = "Announcement after the partial update", body = AnnouncementResponse),
        (status = 404, description = "No such announcement"),
        (status = 409, description = "Dispatch already began and the update touches frozen fields"),
        (status = 422, description = "Invalid dates, targeting, or content")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn update_announcement(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateAnnouncementRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsManage);

    let updated = state
        .announcements
        .update(id, request)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(AnnouncementResponse::map_from_announcement(updated)))
}

/// Delete an announcement
///
/// Recipient rows cascade; derived notification-center rows are removed.
#[utoipa::path(
    tag = "Announcements",
    delete,
    path = "/announcements/{id}",
    params(
        ("id" = i32, Path, description = "Announcement id")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such announcement")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn delete_announcement(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsManage);

    state
        .dispatcher
        .delete_announcement(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Recompute an announcement's denormalized totals
///
/// Folds recipient-row progress and notification read receipts into the
/// stored counters. Counters never move backwards.
#[utoipa::path(
    tag = "Announcements",
    post,
    path = "/announcements/{id}/refresh-metrics",
    params(
        ("id" = i32, Path, description = "Announcement id")
    ),
    responses(
        (status = 200, description = "Announcement with refreshed totals", body = AnnouncementResponse),
        (status = 403, description = "Caller lacks the announcements:manage capability"),
        (status = 404, description = "No such announcement")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn refresh_announcement_metrics(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnnouncementsManage);

    let refreshed = state
        .scheduler
        .refresh_announcement_metrics(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(AnnouncementResponse::map_from_announcement(refreshed)))
}

/// Delivery analytics for one announcement
#[utoipa::path(
    tag = "Announcements",
    get,
    path = "/announcements/{id}/analytics",
    params(
        ("id" = i32, Path, description = "Announcement id")
    ),
    responses(
        (status = 200, description = "Per-channel delivery rollup", body = CampaignAnalytics),
        (status = 403, description = "Caller lacks the analytics:read capability"),
        (status = 404, description = "No such announcement")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn announcement_analytics(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnalyticsRead);

    let analytics = state
        .dispatcher
        .announcement_analytics(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(analytics))
}

/// Send an emergency alert
///
/// Urgent announcement on every channel; quiet hours and the weekend rule
/// do not apply.
#[utoipa::path(
    tag = "Announcements",
    post,
    path = "/announcements/emergency",
    request_body = EmergencyAlertRequest,
    responses(
        (status = 201, description = "Alert published and dispatching", body = AnnouncementResponse),
        (status = 403, description = "Caller lacks the emergency_alerts:send capability"),
        (status = 422, description = "Invalid targeting or content")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn send_emergency_alert(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Json(request): Json<EmergencyAlertRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, EmergencyAlertsSend);

    let announcement = state
        .dispatcher
        .send_emergency_alert(caller.user_id, request)
        .await
        .map_err(map_dispatch_error)?;
    Ok((
        StatusCode::CREATED,
        Json(AnnouncementResponse::map_from_announcement(announcement)),
    ))
}

/// Send one user a notification across their enabled channels
///
/// The notification-center entry is always written; any further listed
/// channel is attempted only where the recipient's preferences allow it.
#[utoipa::path(
    tag = "Announcements",
    post,
    path = "/notifications/send",
    request_body = SendNotificationRequest,
    responses(
        (status = 201, description = "Notification written; per-channel fan-out report", body = NotificationSendReport),
        (status = 403, description = "Caller lacks the notifications:send capability"),
        (status = 404, description = "No such user"),
        (status = 422, description = "Invalid payload")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn send_notification(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, NotificationsSend);

    let report = state
        .dispatcher
        .send_notification(caller.user_id, request)
        .await
        .map_err(map_dispatch_error)?;
    Ok((StatusCode::CREATED, Json(report)))
}
