use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use crier_core::capability_guard;
use crier_core::error_builder::{not_found, unauthorized};
use crier_core::problemdetails::Problem;
use crier_core::{CallerContext, UtcDateTime};
use crier_entities::CommsChannel;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::services::{CallbackKind, CallbackOutcome, ChannelFailureRate};

use super::types::{map_dispatch_error, DispatchState};

const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";
const FAILURE_WINDOW_HOURS: i64 = 24;

#[derive(OpenApi)]
#[openapi(
    paths(delivery_callback, channel_health),
    components(schemas(
        DeliveryCallbackRequest,
        DeliveryCallbackResponse,
        ChannelHealthResponse,
        ChannelStateEntry,
        ChannelFailureRate,
        CallbackKind
    )),
    info(
        title = "Dispatch System API",
        description = "Provider-facing delivery callback webhook and the \
        channel health view.",
        version = "1.0.0"
    )
)]
pub struct SystemApiDoc;

pub fn configure_routes() -> Router<Arc<DispatchState>> {
    Router::new()
        .route("/callbacks/delivery", post(delivery_callback))
        .route("/health/channels", get(channel_health))
}

/// Status callback pushed by an email/SMS/push provider.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliveryCallbackRequest {
    /// The recipient row id the provider was given at send time.
    pub message_id: i32,
    pub recipient_id: i32,
    pub channel: CommsChannel,
    pub event: CallbackKind,
    /// Provider-side event time, informational.
    #[schema(value_type = Option<String>, format = DateTime)]
    pub timestamp: Option<UtcDateTime>,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryCallbackResponse {
    /// False when the callback was a duplicate or arrived out of order.
    pub applied: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelStateEntry {
    pub channel: CommsChannel,
    pub configured: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChannelHealthResponse {
    pub channels: Vec<ChannelStateEntry>,
    pub failure_rates: Vec<ChannelFailureRate>,
    pub window_hours: i64,
}

/// Provider delivery callback
///
/// Applies one delivered/bounced/opened/clicked event to the matching
/// recipient record. Duplicate and out-of-order events no-op. Guarded by the
/// shared callback token when one is configured; providers do not pass
/// through the identity gateway.
#[utoipa::path(
    tag = "System",
    post,
    path = "/callbacks/delivery",
    request_body = DeliveryCallbackRequest,
    responses(
        (status = 200, description = "Callback processed", body = DeliveryCallbackResponse),
        (status = 401, description = "Missing or invalid callback token"),
        (status = 404, description = "No matching delivery record")
    )
)]
async fn delivery_callback(
    State(state): State<Arc<DispatchState>>,
    headers: HeaderMap,
    Json(request): Json<DeliveryCallbackRequest>,
) -> Result<impl IntoResponse, Problem> {
    if let Some(expected) = &state.settings.callback_token {
        let supplied = headers
            .get(CALLBACK_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if supplied != Some(expected.as_str()) {
            return Err(unauthorized()
                .detail("Missing or invalid callback token")
                .build());
        }
    }

    let outcome = state
        .tracker
        .apply_callback(
            request.message_id,
            request.recipient_id,
            request.channel,
            request.event,
            request.provider_reference,
        )
        .await
        .map_err(map_dispatch_error)?;

    match outcome {
        CallbackOutcome::Applied => {
            tracing::info!(
                message_id = request.message_id,
                channel = %request.channel,
                event = ?request.event,
                provider_time = ?request.timestamp,
                "Applied provider callback"
            );
            Ok(Json(DeliveryCallbackResponse { applied: true }))
        }
        CallbackOutcome::NoOp => Ok(Json(DeliveryCallbackResponse { applied: false })),
        CallbackOutcome::NotFound => Err(not_found()
            .detail("No delivery record matches this callback")
            .build()),
    }
}

/// Channel configuration and recent delivery health
#[utoipa::path(
    tag = "System",
    get,
    path = "/health/channels",
    responses(
        (status = 200, description = "Registered channels and 24h failure rates", body = ChannelHealthResponse),
        (status = 403, description = "Caller lacks the settings:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn channel_health(
    caller: CallerContext,
    State(state): State<Arc<DispatchState>>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, SettingsRead);

    let channels = state
        .registry
        .channel_states()
        .into_iter()
        .map(|(channel, configured)| ChannelStateEntry {
            channel,
            configured,
        })
        .collect();
    let failure_rates = state
        .log
        .failure_rates_since(Utc::now() - Duration::hours(FAILURE_WINDOW_HOURS))
        .await
        .map_err(map_dispatch_error)?;

    Ok(Json(ChannelHealthResponse {
        channels,
        failure_rates,
        window_hours: FAILURE_WINDOW_HOURS,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CampaignRef, CreateBulkMessageRequest, NewRecipient};
    use crate::test_utils::{dispatch_context, dispatch_context_with, json_body, request, TestContext};
    use axum::body::Body;
    use axum::http::Request;
    use crier_config::DispatchSettings;
    use crier_entities::{users, Audience, DeliveryStatus};
    use tower::ServiceExt;

    fn callback_json(message_id: i32, recipient_id: i32, event: &str) -> serde_json::Value {
        serde_json::json!({
            "message_id": message_id,
            "recipient_id": recipient_id,
            "channel": "email",
            "event": event,
            "provider_reference": "prov-123",
        })
    }

    fn callback_request(body: serde_json::Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/callbacks/delivery")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("x-callback-token", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    /// A campaign recipient row advanced to `sent` on email, ready for
    /// provider callbacks.
    async fn seed_sent_recipient(context: &TestContext, user: &users::Model) -> i32 {
        let campaign = context
            .state
            .bulk
            .create_draft(
                user.id,
                CreateBulkMessageRequest {
                    name: "Callback target".to_string(),
                    subject: "s".to_string(),
                    content: "c".to_string(),
                    template_id: None,
                    template_context: None,
                    target_audience: Audience::All,
                    target_filters: None,
                    target_user_ids: None,
                    channels: None,
                    priority: None,
                    category: None,
                    scheduled_at: None,
                },
            )
            .await
            .unwrap();
        let rows = context
            .state
            .tracker
            .materialize(
                CampaignRef::BulkMessage(campaign.id),
                &[NewRecipient {
                    user_id: user.id,
                    email: user.email.clone(),
                    phone: None,
                    queued_channels: vec![CommsChannel::Email],
                }],
            )
            .await
            .unwrap();
        let row = &rows[0];
        for status in [DeliveryStatus::Sending, DeliveryStatus::Sent] {
            context
                .state
                .tracker
                .transition(row, CommsChannel::Email, status, None, None)
                .await
                .unwrap();
        }
        row.id
    }

    #[tokio::test]
    async fn callbacks_apply_once_and_replay_as_noops() {
        let context = dispatch_context().await;
        let user = context.seed_user("Asha", Some("asha@school.test")).await;
        let row_id = seed_sent_recipient(&context, &user).await;
        let app = context.app();

        let response = app
            .clone()
            .oneshot(callback_request(
                callback_json(row_id, user.id, "delivered"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["applied"], true);

        // Replay: same event again is a no-op, not an error.
        let response = app
            .clone()
            .oneshot(callback_request(
                callback_json(row_id, user.id, "delivered"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["applied"], false);

        // A callback naming the wrong recipient does not touch the row.
        let response = app
            .oneshot(callback_request(
                callback_json(row_id, user.id + 1, "opened"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn out_of_order_callbacks_do_not_regress() {
        let context = dispatch_context().await;
        let user = context.seed_user("Asha", Some("asha@school.test")).await;
        let row_id = seed_sent_recipient(&context, &user).await;
        let app = context.app();

        for (event, applied) in [("delivered", true), ("opened", true), ("delivered", false)] {
            let response = app
                .clone()
                .oneshot(callback_request(
                    callback_json(row_id, user.id, event),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await["applied"], applied, "{event}");
        }

        let row = context
            .state
            .tracker
            .find(row_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.email_status, Some(DeliveryStatus::Opened));
    }

    #[tokio::test]
    async fn configured_tokens_gate_the_webhook() {
        let settings = DispatchSettings::from_lookup(|name| {
            (name == "CRIER_CALLBACK_TOKEN").then(|| "hook-secret".to_string())
        })
        .unwrap();
        let context = dispatch_context_with(settings).await;
        let app = context.app();

        let response = app
            .clone()
            .oneshot(callback_request(callback_json(1, 1, "delivered"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(callback_request(
                callback_json(1, 1, "delivered"),
                Some("wrong"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // The right token reaches the tracker; the row simply does not exist.
        let response = app
            .oneshot(callback_request(
                callback_json(1, 1, "delivered"),
                Some("hook-secret"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn channel_health_lists_registered_adapters() {
        let context = dispatch_context().await;
        let staff = context.seed_user("Asha", None).await;

        let response = context
            .app()
            .oneshot(request("GET", "/health/channels", staff.id, "staff", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = json_body(response).await;
        assert_eq!(health["window_hours"], 24);
        let channels = health["channels"].as_array().unwrap();
        assert!(channels
            .iter()
            .any(|entry| entry["channel"] == "email" && entry["configured"] == true));
        assert!(channels.iter().any(|entry| entry["channel"] == "in_app"));
        // Every channel reports a rate, registered or not.
        assert_eq!(health["failure_rates"].as_array().unwrap().len(), 4);

        let response = context
            .app()
            .oneshot(request("GET", "/health/channels", staff.id, "parent", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
