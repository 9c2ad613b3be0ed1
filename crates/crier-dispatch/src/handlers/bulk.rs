use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use crier_core::capability_guard;
use crier_core::pagination::PaginationParams;
use crier_core::problemdetails::Problem;
use crier_core::CallerContext;
use crier_entities::{BulkMessageStatus, DeliveryStatus};
use serde::Deserialize;
use utoipa::OpenApi;

use crate::services::{CampaignAnalytics, CampaignRef, CreateBulkMessageRequest};

use super::types::{
    map_dispatch_error, BulkMessagePage, BulkMessageResponse, DispatchState, RecipientPage,
    RecipientResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        create_bulk_message,
        list_bulk_messages,
        get_bulk_message,
        send_bulk_message,
        cancel_bulk_message,
        reopen_bulk_message,
        delete_bulk_message,
        list_bulk_message_recipients,
        bulk_message_analytics
    ),
    components(schemas(
        BulkMessageResponse,
        BulkMessagePage,
        CreateBulkMessageRequest,
        RecipientResponse,
        RecipientPage,
        BulkMessageStatus,
        DeliveryStatus
    )),
    info(
        title = "Bulk Messages API",
        description = "Targeted campaigns: drafts, manual or scheduled sending, \
        cancellation, per-recipient delivery records, and campaign analytics.",
        version = "1.0.0"
    )
)]
pub struct BulkMessagesApiDoc;

pub fn configure_routes() -> Router<Arc<DispatchState>> {
    Router::new()
        .route("/bulk-messages", post(create_bulk_message))
        .route("/bulk-messages", get(list_bulk_messages))
        .route("/bulk-messages/{id}", get(get_bulk_message))
        .route("/bulk-messages/{id}", delete(delete_bulk_message))
        .route("/bulk-messages/{id}/send", post(send_bulk_message))
        .route("/bulk-messages/{id}/cancel", post(cancel_bulk_message))
        .route("/bulk-messages/{id}/reopen", post(reopen_bulk_message))
        .route(
            "/bulk-messages/{id}/recipients",
            get(list_bulk_message_recipients),
        )
        .route("/bulk-messages/{id}/analytics", get(bulk_message_analytics))
}

#[derive(Debug, Deserialize)]
struct ListBulkQuery {
    #[serde(flatten)]
    pagination: PaginationParams,
    #[serde(default)]
    status: Option<BulkMessageStatus>,
}

/// Create a bulk message draft
///
/// Nothing is sent until the draft is started explicitly or its
/// `scheduled_at` time arrives.
#[utoipa::path(
    tag = "Bulk Messages",
    post,
    path = "/bulk-messages",
    request_body = CreateBulkMessageRequest,
    responses(
        (status = 201, description = "Draft created", body = BulkMessageResponse),
        (status = 403, description = "Caller lacks the bulk_messages:manage capability"),
        (status = 422, description = "Invalid targeting, channels, or content")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn create_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Json(request): Json<CreateBulkMessageRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let created = state
        .dispatcher
        .queue_bulk_message(caller.user_id, request)
        .await
        .map_err(map_dispatch_error)?;
    Ok((
        StatusCode::CREATED,
        Json(BulkMessageResponse::map_from_bulk_message(created)),
    ))
}

/// List bulk messages, newest first
#[utoipa::path(
    tag = "Bulk Messages",
    get,
    path = "/bulk-messages",
    params(
        PaginationParams,
        ("status" = Option<BulkMessageStatus>, Query, description = "Only campaigns in this status")
    ),
    responses(
        (status = 200, description = "Page of campaigns", body = BulkMessagePage),
        (status = 403, description = "Caller lacks the bulk_messages:manage capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_bulk_messages(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Query(query): Query<ListBulkQuery>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let (page, page_size) = query.pagination.normalize();
    let (items, total) = state
        .bulk
        .list(&query.pagination, query.status)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(BulkMessagePage {
        items: items
            .into_iter()
            .map(BulkMessageResponse::map_from_bulk_message)
            .collect(),
        total,
        page,
        page_size,
    }))
}

/// Fetch one bulk message
#[utoipa::path(
    tag = "Bulk Messages",
    get,
    path = "/bulk-messages/{id}",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 200, description = "The campaign", body = BulkMessageResponse),
        (status = 404, description = "No such bulk message")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn get_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let message = state.bulk.get(id).await.map_err(map_dispatch_error)?;
    Ok(Json(BulkMessageResponse::map_from_bulk_message(message)))
}

/// Start sending a draft
#[utoipa::path(
    tag = "Bulk Messages",
    post,
    path = "/bulk-messages/{id}/send",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 200, description = "Campaign moved to sending and queued for dispatch", body = BulkMessageResponse),
        (status = 404, description = "No such bulk message"),
        (status = 409, description = "The campaign is not a draft")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn send_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let message = state
        .dispatcher
        .start_bulk_message(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(BulkMessageResponse::map_from_bulk_message(message)))
}

/// Cancel a draft or an in-flight campaign
///
/// Still-queued recipient channels freeze immediately; batches already
/// dispatched are not recalled.
#[utoipa::path(
    tag = "Bulk Messages",
    post,
    path = "/bulk-messages/{id}/cancel",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 200, description = "Campaign cancelled", body = BulkMessageResponse),
        (status = 404, description = "No such bulk message"),
        (status = 409, description = "The campaign already finished")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn cancel_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let message = state
        .dispatcher
        .cancel_bulk_message(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(BulkMessageResponse::map_from_bulk_message(message)))
}

/// Reopen a cancelled draft
///
/// Only campaigns cancelled before any sending began can return to `draft`.
#[utoipa::path(
    tag = "Bulk Messages",
    post,
    path = "/bulk-messages/{id}/reopen",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 200, description = "Campaign back in draft", body = BulkMessageResponse),
        (status = 404, description = "No such bulk message"),
        (status = 409, description = "The campaign started sending at some point")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn reopen_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    let message = state.bulk.reopen(id).await.map_err(map_dispatch_error)?;
    Ok(Json(BulkMessageResponse::map_from_bulk_message(message)))
}

/// Delete a campaign that never finished starting
#[utoipa::path(
    tag = "Bulk Messages",
    delete,
    path = "/bulk-messages/{id}",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such bulk message"),
        (status = 409, description = "Sent campaigns are kept for their delivery history")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn delete_bulk_message(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    state
        .dispatcher
        .delete_bulk_message(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Per-recipient delivery records for one campaign
#[utoipa::path(
    tag = "Bulk Messages",
    get,
    path = "/bulk-messages/{id}/recipients",
    params(
        ("id" = i32, Path, description = "Bulk message id"),
        PaginationParams
    ),
    responses(
        (status = 200, description = "Recipient rows in user-id order", body = RecipientPage),
        (status = 404, description = "No such bulk message")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_bulk_message_recipients(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, BulkMessagesManage);

    state.bulk.get(id).await.map_err(map_dispatch_error)?;
    let (page, page_size) = params.normalize();
    let (items, total) = state
        .tracker
        .list_for_campaign(CampaignRef::BulkMessage(id), &params)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(RecipientPage {
        items: items
            .into_iter()
            .map(RecipientResponse::map_from_recipient)
            .collect(),
        total,
        page,
        page_size,
    }))
}

/// Delivery analytics for one campaign
#[utoipa::path(
    tag = "Bulk Messages",
    get,
    path = "/bulk-messages/{id}/analytics",
    params(
        ("id" = i32, Path, description = "Bulk message id")
    ),
    responses(
        (status = 200, description = "Per-channel delivery rollup", body = CampaignAnalytics),
        (status = 403, description = "Caller lacks the analytics:read capability"),
        (status = 404, description = "No such bulk message")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn bulk_message_analytics(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnalyticsRead);

    let analytics = state
        .dispatcher
        .bulk_message_analytics(id)
        .await
        .map_err(map_dispatch_error)?;
    Ok(Json(analytics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{dispatch_context, json_body, request};
    use crier_core::jobs::Job;
    use tower::ServiceExt;

    fn draft_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "subject": "PTM schedule",
            "content": "Dear {{ user_name }}, the meeting is on Friday.",
            "target_audience": "all",
            "channels": ["email"],
        })
    }

    #[tokio::test]
    async fn draft_send_cancel_reopen_lifecycle() {
        let mut context = dispatch_context().await;
        let staff = context.seed_user("Asha", Some("asha@school.test")).await;
        let app = context.app();

        let created = json_body(
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json("March newsletter")),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(created["status"], "draft");
        let id = created["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/send"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "sending");
        assert!(matches!(
            context.receiver.try_recv().unwrap(),
            Job::DispatchBulkMessage(_)
        ));

        // A second send hits the status conflict.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/send"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/cancel"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "cancelled");

        // It started sending once, so it cannot reopen.
        let response = app
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/reopen"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancelled_drafts_reopen() {
        let context = dispatch_context().await;
        let staff = context.seed_user("Asha", None).await;
        let app = context.app();

        let created = json_body(
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json("Draft to shelve")),
                ))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        app.clone()
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/cancel"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{id}/reopen"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "draft");
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let context = dispatch_context().await;
        let staff = context.seed_user("Asha", None).await;
        let app = context.app();

        for name in ["One", "Two"] {
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json(name)),
                ))
                .await
                .unwrap();
        }
        let created = json_body(
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json("Cancelled one")),
                ))
                .await
                .unwrap(),
        )
        .await;
        app.clone()
            .oneshot(request(
                "POST",
                &format!("/bulk-messages/{}/cancel", created["id"]),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/bulk-messages?status=draft",
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        let page = json_body(response).await;
        assert_eq!(page["total"], 2);

        let response = app
            .oneshot(request(
                "GET",
                "/bulk-messages?status=cancelled",
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        let page = json_body(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["name"], "Cancelled one");
    }

    #[tokio::test]
    async fn drafts_are_operator_only() {
        let context = dispatch_context().await;
        let teacher = context.seed_user("Ravi", None).await;
        let app = context.app();

        // Teachers hold no bulk_messages:manage capability.
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/bulk-messages",
                teacher.id,
                "teacher",
                Some(draft_json("Nope")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request("GET", "/bulk-messages", teacher.id, "parent", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn recipients_and_analytics_answer_for_existing_campaigns() {
        let context = dispatch_context().await;
        let staff = context.seed_user("Asha", Some("asha@school.test")).await;
        let app = context.app();

        let created = json_body(
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json("Quiet campaign")),
                ))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        // Nothing dispatched yet: an empty, well-formed page.
        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/bulk-messages/{id}/recipients"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["total"], 0);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/bulk-messages/{id}/analytics"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let analytics = json_body(response).await;
        assert_eq!(analytics["recipient_rows"], 0);

        let response = app
            .oneshot(request(
                "GET",
                "/bulk-messages/4242/recipients",
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_a_draft_removes_it() {
        let context = dispatch_context().await;
        let staff = context.seed_user("Asha", None).await;
        let app = context.app();

        let created = json_body(
            app.clone()
                .oneshot(request(
                    "POST",
                    "/bulk-messages",
                    staff.id,
                    "staff",
                    Some(draft_json("Disposable")),
                ))
                .await
                .unwrap(),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/bulk-messages/{id}"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request(
                "GET",
                &format!("/bulk-messages/{id}"),
                staff.id,
                "staff",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
