use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use crier_core::capability_guard;
use crier_core::error_builder::{conflict, internal_server_error, not_found, unprocessable_entity};
use crier_core::problemdetails::Problem;
use crier_core::{CallerContext, UtcDateTime};
use crier_entities::{templates, ChannelList, CommsChannel, MessageCategory, StringList};
use serde::{Deserialize, Serialize};
use utoipa::OpenApi;

use crate::service::{
    CreateTemplateRequest, TemplateError, TemplatePreview, TemplateService, UpdateTemplateRequest,
};

pub struct TemplatesState {
    pub templates: Arc<TemplateService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_templates,
        create_template,
        get_template,
        update_template,
        delete_template,
        preview_template
    ),
    components(schemas(
        CreateTemplateRequest,
        UpdateTemplateRequest,
        TemplateResponse,
        TemplatePreview,
        PreviewRequest,
        MessageCategory,
        CommsChannel,
        ChannelList,
        StringList
    )),
    info(
        title = "Templates API",
        description = "Reusable message templates with placeholder variables, \
        per-channel rendering, and sample previews.",
        version = "1.0.0"
    )
)]
pub struct TemplatesApiDoc;

pub fn configure_routes() -> Router<Arc<TemplatesState>> {
    Router::new()
        .route("/templates", get(list_templates))
        .route("/templates", post(create_template))
        .route("/templates/{id}", get(get_template))
        .route("/templates/{id}", put(update_template))
        .route("/templates/{id}", delete(delete_template))
        .route("/templates/{id}/preview", post(preview_template))
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TemplateResponse {
    pub id: i32,
    pub name: String,
    pub template_type: MessageCategory,
    pub subject_template: String,
    pub content_template: String,
    pub supported_channels: ChannelList,
    pub declared_variables: StringList,
    pub is_active: bool,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: UtcDateTime,
}

impl TemplateResponse {
    fn map_from_template(template: templates::Model) -> Self {
        Self {
            id: template.id,
            name: template.name,
            template_type: template.template_type,
            subject_template: template.subject_template,
            content_template: template.content_template,
            supported_channels: template.supported_channels,
            declared_variables: template.declared_variables,
            is_active: template.is_active,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTemplatesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct PreviewRequest {
    /// Channel whose formatting to apply. Defaults to the template's first
    /// supported channel.
    #[serde(default)]
    pub channel: Option<CommsChannel>,
}

fn map_template_error(e: TemplateError) -> Problem {
    match e {
        TemplateError::NotFound { .. } => not_found().detail(e.to_string()).build(),
        TemplateError::DuplicateName { .. } => conflict().detail(e.to_string()).build(),
        TemplateError::Invalid { details } => unprocessable_entity().detail(details).build(),
        TemplateError::Database(e) => {
            tracing::error!("Template storage error: {}", e);
            internal_server_error().build()
        }
    }
}

/// List templates
#[utoipa::path(
    tag = "Templates",
    get,
    path = "/templates",
    params(
        ("include_inactive" = Option<bool>, Query, description = "Also return deactivated templates")
    ),
    responses(
        (status = 200, description = "Templates ordered by name", body = Vec<TemplateResponse>),
        (status = 401, description = "Missing caller identity"),
        (status = 403, description = "Caller lacks the templates:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_templates(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Query(query): Query<ListTemplatesQuery>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesRead);

    let templates = state
        .templates
        .list_templates(query.include_inactive)
        .await
        .map_err(map_template_error)?;
    Ok(Json(
        templates
            .into_iter()
            .map(TemplateResponse::map_from_template)
            .collect::<Vec<_>>(),
    ))
}

/// Create a template
#[utoipa::path(
    tag = "Templates",
    post,
    path = "/templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = TemplateResponse),
        (status = 409, description = "A template with that name exists"),
        (status = 422, description = "References an undeclared variable or fails validation")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn create_template(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesManage);

    let template = state
        .templates
        .create_template(request)
        .await
        .map_err(map_template_error)?;
    Ok((
        StatusCode::CREATED,
        Json(TemplateResponse::map_from_template(template)),
    ))
}

/// Fetch a template
#[utoipa::path(
    tag = "Templates",
    get,
    path = "/templates/{id}",
    params(("id" = i32, Path, description = "Template id")),
    responses(
        (status = 200, description = "The template", body = TemplateResponse),
        (status = 404, description = "No such template")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn get_template(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesRead);

    let template = state
        .templates
        .get_template(id)
        .await
        .map_err(map_template_error)?;
    Ok(Json(TemplateResponse::map_from_template(template)))
}

/// Update a template
#[utoipa::path(
    tag = "Templates",
    put,
    path = "/templates/{id}",
    params(("id" = i32, Path, description = "Template id")),
    request_body = UpdateTemplateRequest,
    responses(
        (status = 200, description = "Updated template", body = TemplateResponse),
        (status = 404, description = "No such template"),
        (status = 409, description = "A template with the new name exists"),
        (status = 422, description = "References an undeclared variable or fails validation")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn update_template(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Path(id): Path<i32>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesManage);

    let template = state
        .templates
        .update_template(id, request)
        .await
        .map_err(map_template_error)?;
    Ok(Json(TemplateResponse::map_from_template(template)))
}

/// Delete a template
#[utoipa::path(
    tag = "Templates",
    delete,
    path = "/templates/{id}",
    params(("id" = i32, Path, description = "Template id")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 404, description = "No such template")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn delete_template(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesManage);

    state
        .templates
        .delete_template(id)
        .await
        .map_err(map_template_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Render a template against sample values
#[utoipa::path(
    tag = "Templates",
    post,
    path = "/templates/{id}/preview",
    params(("id" = i32, Path, description = "Template id")),
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Sample rendering", body = TemplatePreview),
        (status = 404, description = "No such template")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn preview_template(
    caller: CallerContext,
    State(state): State<Arc<TemplatesState>>,
    Path(id): Path<i32>,
    Json(request): Json<PreviewRequest>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, TemplatesRead);

    let preview = state
        .templates
        .render_preview(id, request.channel)
        .await
        .map_err(map_template_error)?;
    Ok(Json(preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TemplateEngine;
    use axum::body::Body;
    use axum::http::Request;
    use crier_database::test_utils::TestDatabase;
    use tower::ServiceExt;

    async fn test_app() -> (TestDatabase, Router) {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let engine = Arc::new(TemplateEngine::new("Sample School".to_string(), 500));
        let state = Arc::new(TemplatesState {
            templates: Arc::new(TemplateService::new(test_db.connection_arc(), engine)),
        });
        let app = configure_routes().with_state(state);
        (test_db, app)
    }

    fn request(role: &str, method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "1")
            .header("x-user-role", role);
        match body {
            Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn create_body(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "template_type": "general",
            "subject_template": "Update from {{ school_name }}",
            "content_template": "Hello {{ user_name }}, {{ details }}",
            "supported_channels": ["email", "in_app"],
            "declared_variables": ["details"],
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn crud_round_trip_over_http() {
        let (_test_db, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request("admin", "POST", "/templates", Some(create_body("welcome"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["name"], "welcome");

        let response = app
            .clone()
            .oneshot(request(
                "admin",
                "PUT",
                &format!("/templates/{}", id),
                Some(serde_json::json!({"name": "welcome-back"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "welcome-back");

        let response = app
            .clone()
            .oneshot(request("teacher", "GET", "/templates", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(request("admin", "DELETE", &format!("/templates/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("admin", "GET", &format!("/templates/{}", id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn writes_require_the_manage_capability() {
        let (_test_db, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request("teacher", "POST", "/templates", Some(create_body("blocked"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request("staff", "POST", "/templates", Some(create_body("allowed"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn validation_failures_map_to_conflict_and_unprocessable() {
        let (_test_db, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request("admin", "POST", "/templates", Some(create_body("dup"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request("admin", "POST", "/templates", Some(create_body("dup"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let mut undeclared = create_body("loose");
        undeclared["declared_variables"] = serde_json::json!([]);
        let response = app
            .oneshot(request("admin", "POST", "/templates", Some(undeclared)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn preview_applies_channel_formatting() {
        let (_test_db, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request("admin", "POST", "/templates", Some(create_body("previewed"))))
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .oneshot(request(
                "teacher",
                "POST",
                &format!("/templates/{}/preview", id),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let preview = body_json(response).await;
        assert_eq!(preview["channel"], "email");
        assert!(preview["body"].as_str().unwrap().contains("[details]"));
        assert!(preview["subject"]
            .as_str()
            .unwrap()
            .contains("Sample School"));
    }
}
