use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use crier_core::capability_guard;
use crier_core::error_builder::{internal_server_error, unprocessable_entity};
use crier_core::problemdetails::Problem;
use crier_core::CallerContext;
use crier_entities::{daily_analytics, CommsChannel};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::service::{
    AnalyticsError, AnalyticsService, ChannelPerformance, EngagementEntry, SummaryTotals,
};

/// Dashboards default to the most recent 30 days.
const DEFAULT_RANGE_DAYS: i64 = 29;
const DEFAULT_ENGAGEMENT_LIMIT: u64 = 10;
const MAX_ENGAGEMENT_LIMIT: u64 = 100;

#[derive(OpenApi)]
#[openapi(
    paths(summary, channel_performance, user_engagement, recompute),
    components(schemas(
        SummaryResponse,
        SummaryTotals,
        ChannelPerformanceResponse,
        ChannelPerformance,
        UserEngagementResponse,
        EngagementEntry,
        RecomputeRequest,
        RecomputeResponse,
        RollupRow
    )),
    info(
        title = "Analytics API",
        description = "Daily delivery rollups: range summaries, per-channel \
        performance, user engagement, and the manual recompute trigger.",
        version = "1.0.0"
    )
)]
pub struct AnalyticsApiDoc;

pub struct AnalyticsState {
    pub analytics: Arc<AnalyticsService>,
}

pub fn configure_routes() -> Router<Arc<AnalyticsState>> {
    Router::new()
        .route("/analytics/summary", get(summary))
        .route("/analytics/channels", get(channel_performance))
        .route("/analytics/engagement", get(user_engagement))
        .route("/analytics/recompute", post(recompute))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RangeQuery {
    /// Resolve defaults and reject inverted ranges.
    fn resolve(&self) -> Result<(NaiveDate, NaiveDate), Problem> {
        let to = self.to.unwrap_or_else(|| Utc::now().date_naive());
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
        if from > to {
            return Err(unprocessable_entity()
                .detail(format!("from ({}) is after to ({})", from, to))
                .build());
        }
        Ok((from, to))
    }
}

#[derive(Debug, Deserialize)]
pub struct EngagementQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    #[schema(value_type = String, format = Date)]
    pub from: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub to: NaiveDate,
    #[serde(flatten)]
    pub totals: SummaryTotals,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelPerformanceResponse {
    #[schema(value_type = String, format = Date)]
    pub from: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub to: NaiveDate,
    pub channels: Vec<ChannelPerformance>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserEngagementResponse {
    #[schema(value_type = String, format = Date)]
    pub from: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub to: NaiveDate,
    pub entries: Vec<EngagementEntry>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecomputeRequest {
    /// Day to recompute; defaults to yesterday (UTC).
    #[schema(value_type = Option<String>, format = Date)]
    pub date: Option<NaiveDate>,
}

/// One recomputed rollup row.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RollupRow {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    pub channel: CommsChannel,
    pub total_sent: i32,
    pub total_delivered: i32,
    pub total_failed: i32,
    pub total_bounced: i32,
    pub total_opened: i32,
    pub total_clicked: i32,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_through_rate: f64,
    pub estimated_cost: f64,
}

impl RollupRow {
    fn map_from(model: daily_analytics::Model) -> Self {
        Self {
            date: model.date,
            channel: model.channel,
            total_sent: model.total_sent,
            total_delivered: model.total_delivered,
            total_failed: model.total_failed,
            total_bounced: model.total_bounced,
            total_opened: model.total_opened,
            total_clicked: model.total_clicked,
            delivery_rate: model.delivery_rate,
            open_rate: model.open_rate,
            click_rate: model.click_rate,
            click_through_rate: model.click_through_rate,
            estimated_cost: model.estimated_cost,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecomputeResponse {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    pub rows: Vec<RollupRow>,
}

fn map_analytics_error(e: AnalyticsError) -> Problem {
    match e {
        AnalyticsError::Invalid(details) => unprocessable_entity().detail(details).build(),
        AnalyticsError::Database(e) => {
            tracing::error!("Analytics storage error: {}", e);
            internal_server_error().build()
        }
    }
}

/// Delivery totals over a date range
///
/// Rates are derived from the summed counters across the whole range, not
/// averaged per day.
#[utoipa::path(
    tag = "Analytics",
    get,
    path = "/analytics/summary",
    params(
        ("from" = Option<String>, Query, description = "Range start date (YYYY-MM-DD), default 30 days back"),
        ("to" = Option<String>, Query, description = "Range end date (YYYY-MM-DD), default today")
    ),
    responses(
        (status = 200, description = "Aggregated totals for the range", body = SummaryResponse),
        (status = 403, description = "Caller lacks the analytics:read capability"),
        (status = 422, description = "Inverted date range")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn summary(
    caller: CallerContext,
    State(state): State<Arc<AnalyticsState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnalyticsRead);
    let (from, to) = query.resolve()?;

    let totals = state
        .analytics
        .summary(from, to)
        .await
        .map_err(map_analytics_error)?;
    Ok(Json(SummaryResponse { from, to, totals }))
}

/// Per-channel delivery performance over a date range
#[utoipa::path(
    tag = "Analytics",
    get,
    path = "/analytics/channels",
    params(
        ("from" = Option<String>, Query, description = "Range start date (YYYY-MM-DD), default 30 days back"),
        ("to" = Option<String>, Query, description = "Range end date (YYYY-MM-DD), default today")
    ),
    responses(
        (status = 200, description = "One entry per channel, zero-filled when idle", body = ChannelPerformanceResponse),
        (status = 403, description = "Caller lacks the analytics:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn channel_performance(
    caller: CallerContext,
    State(state): State<Arc<AnalyticsState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnalyticsRead);
    let (from, to) = query.resolve()?;

    let channels = state
        .analytics
        .channel_performance(from, to)
        .await
        .map_err(map_analytics_error)?;
    Ok(Json(ChannelPerformanceResponse { from, to, channels }))
}

/// Most-notified users and their read rates over a date range
#[utoipa::path(
    tag = "Analytics",
    get,
    path = "/analytics/engagement",
    params(
        ("from" = Option<String>, Query, description = "Range start date (YYYY-MM-DD), default 30 days back"),
        ("to" = Option<String>, Query, description = "Range end date (YYYY-MM-DD), default today"),
        ("limit" = Option<u64>, Query, description = "Number of users to return, default 10, max 100")
    ),
    responses(
        (status = 200, description = "Users ranked by notification volume", body = UserEngagementResponse),
        (status = 403, description = "Caller lacks the analytics:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn user_engagement(
    caller: CallerContext,
    State(state): State<Arc<AnalyticsState>>,
    Query(query): Query<EngagementQuery>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AnalyticsRead);
    let range = RangeQuery {
        from: query.from,
        to: query.to,
    };
    let (from, to) = range.resolve()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ENGAGEMENT_LIMIT)
        .clamp(1, MAX_ENGAGEMENT_LIMIT);

    let entries = state
        .analytics
        .user_engagement(from, to, limit)
        .await
        .map_err(map_analytics_error)?;
    Ok(Json(UserEngagementResponse { from, to, entries }))
}

/// Manually recompute one day's rollups
///
/// The nightly job does this on its own; the endpoint exists for backfills
/// after provider callbacks arrive late.
#[utoipa::path(
    tag = "Analytics",
    post,
    path = "/analytics/recompute",
    request_body = RecomputeRequest,
    responses(
        (status = 200, description = "Refreshed rollup rows for the day", body = RecomputeResponse),
        (status = 403, description = "Caller lacks the maintenance:run capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn recompute(
    caller: CallerContext,
    State(state): State<Arc<AnalyticsState>>,
    Json(request): Json<RecomputeRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, MaintenanceRun);
    let date = request
        .date
        .unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));

    let rows = state
        .analytics
        .recompute_day(date)
        .await
        .map_err(map_analytics_error)?;
    tracing::info!(%date, by = caller.user_id, "Manual analytics recompute");
    Ok(Json(RecomputeResponse {
        date,
        rows: rows.into_iter().map(RollupRow::map_from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use crier_database::test_utils::TestDatabase;
    use crier_entities::{communication_logs, communication_logs::event_types, DeliveryStatus};
    use http_body_util::BodyExt;
    use sea_orm::{ActiveModelTrait, Set};
    use tower::ServiceExt;

    async fn analytics_app() -> (TestDatabase, Router) {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let state = Arc::new(AnalyticsState {
            analytics: Arc::new(AnalyticsService::new(test_db.connection_arc())),
        });
        let app = configure_routes().with_state(state);
        (test_db, app)
    }

    fn request(method: &str, uri: &str, role: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "1")
            .header("x-user-role", role)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed_sent_email_events(test_db: &TestDatabase, count: usize) {
        for _ in 0..count {
            communication_logs::ActiveModel {
                event_type: Set(event_types::DELIVERY.to_string()),
                channel: Set(Some(CommsChannel::Email)),
                status: Set(DeliveryStatus::Sent),
                recipient_user_id: Set(1),
                ..Default::default()
            }
            .insert(test_db.connection())
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn recompute_then_summary_round_trip() {
        let (test_db, app) = analytics_app().await;
        seed_sent_email_events(&test_db, 3).await;
        let today = Utc::now().date_naive();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/analytics/recompute",
                "admin",
                Some(serde_json::json!({ "date": today.to_string() })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rows"].as_array().unwrap().len(), 4);

        let response = app
            .oneshot(request("GET", "/analytics/summary", "staff", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_sent"], 3);
        assert_eq!(body["delivery_rate"], 0.0);
    }

    #[tokio::test]
    async fn channel_listing_covers_every_channel() {
        let (_test_db, app) = analytics_app().await;

        let response = app
            .oneshot(request("GET", "/analytics/channels", "staff", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let channels = body["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 4);
        assert!(channels.iter().any(|c| c["channel"] == "in_app"));
    }

    #[tokio::test]
    async fn reads_require_the_analytics_capability() {
        let (_test_db, app) = analytics_app().await;

        for uri in [
            "/analytics/summary",
            "/analytics/channels",
            "/analytics/engagement",
        ] {
            let response = app
                .clone()
                .oneshot(request("GET", uri, "parent", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }

        // Recompute is maintenance, not analytics: staff cannot trigger it.
        let response = app
            .oneshot(request(
                "POST",
                "/analytics/recompute",
                "staff",
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn inverted_ranges_are_rejected() {
        let (_test_db, app) = analytics_app().await;

        let response = app
            .oneshot(request(
                "GET",
                "/analytics/summary?from=2026-08-10&to=2026-08-01",
                "admin",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
