use crate::services::{AudienceDescriptor, AudienceResolver, ChannelReach, DirectoryError, ReachEstimate};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use crier_core::capability_guard;
use crier_core::error_builder::ErrorBuilder;
use crier_core::problemdetails::Problem;
use crier_core::CallerContext;
use crier_entities::{Audience, IdList, TargetFilters};
use std::sync::Arc;
use utoipa::OpenApi;

pub struct DirectoryState {
    pub resolver: Arc<AudienceResolver>,
}

#[derive(OpenApi)]
#[openapi(
    paths(preview_audience),
    components(schemas(
        AudienceDescriptor,
        ReachEstimate,
        ChannelReach,
        Audience,
        TargetFilters,
        IdList
    )),
    info(
        title = "Audiences API",
        description = "Audience resolution previews. Lets a sender see how many \
        users a targeting descriptor reaches, per channel, before dispatching.",
        version = "1.0.0"
    )
)]
pub struct DirectoryApiDoc;

pub fn configure_routes() -> Router<Arc<DirectoryState>> {
    Router::new().route("/audiences/preview", post(preview_audience))
}

/// Preview how many users a targeting descriptor reaches
#[utoipa::path(
    tag = "Audiences",
    post,
    path = "/audiences/preview",
    request_body = AudienceDescriptor,
    responses(
        (status = 200, description = "Resolution count and per-channel contact coverage", body = ReachEstimate),
        (status = 400, description = "Invalid targeting"),
        (status = 401, description = "Missing caller identity"),
        (status = 403, description = "Caller lacks the audiences:preview capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn preview_audience(
    caller: CallerContext,
    State(state): State<Arc<DirectoryState>>,
    Json(descriptor): Json<AudienceDescriptor>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, AudiencesPreview);

    match state.resolver.estimate_reach(&descriptor).await {
        Ok(estimate) => Ok(Json(estimate)),
        Err(DirectoryError::InvalidTargeting { details }) => {
            Err(ErrorBuilder::new(StatusCode::BAD_REQUEST)
                .type_("https://crier.sh/probs/invalid-targeting")
                .title("Invalid Targeting")
                .detail(details)
                .build())
        }
        Err(e) => {
            tracing::error!("Failed to estimate audience reach: {}", e);
            Err(ErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
                .type_("https://crier.sh/probs/directory-error")
                .title("Directory Error")
                .detail(format!("Failed to estimate audience reach: {}", e))
                .build())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::users;
    use sea_orm::{ActiveModelTrait, Set};
    use tower::ServiceExt;

    async fn test_app() -> (TestDatabase, Router) {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let state = Arc::new(DirectoryState {
            resolver: Arc::new(AudienceResolver::new(test_db.connection_arc())),
        });
        let app = configure_routes().with_state(state);
        (test_db, app)
    }

    fn preview_request(role: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/audiences/preview")
            .header("content-type", "application/json")
            .header("x-user-id", "1")
            .header("x-user-role", role)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn preview_reports_reach_counts() {
        let (test_db, app) = test_app().await;

        users::ActiveModel {
            first_name: Set("Asha".to_string()),
            last_name: Set("Rao".to_string()),
            email: Set(Some("asha@school.example".to_string())),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(test_db.connection())
        .await
        .unwrap();

        let response = app
            .oneshot(preview_request("admin", serde_json::json!({"audience": "all"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let estimate: ReachEstimate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(estimate.total, 1);
        assert_eq!(estimate.reachable_by_channel.email, 1);
        assert_eq!(estimate.reachable_by_channel.sms, 0);
        assert_eq!(estimate.reachable_by_channel.in_app, 1);
    }

    #[tokio::test]
    async fn invalid_targeting_is_a_bad_request() {
        let (_test_db, app) = test_app().await;

        let response = app
            .oneshot(preview_request(
                "admin",
                serde_json::json!({"audience": "custom"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preview_is_capability_guarded() {
        let (_test_db, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(preview_request(
                "student",
                serde_json::json!({"audience": "all"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // No gateway headers at all
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/audiences/preview")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"audience\":\"all\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
