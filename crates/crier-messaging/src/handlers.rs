use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use crier_core::error_builder::{
    internal_server_error, not_found, unprocessable_entity, ErrorBuilder,
};
use crier_core::problemdetails::Problem;
use crier_core::{CallerContext, UtcDateTime};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::service::{CreateThreadRequest, MessageView, MessagingError, MessagingService, ThreadView};

#[derive(OpenApi)]
#[openapi(
    paths(
        create_thread,
        list_threads,
        post_message,
        list_messages,
        mark_message_read
    ),
    components(schemas(
        CreateThreadBody,
        ThreadResponse,
        ThreadListResponse,
        PostMessageBody,
        MessageResponse,
        MessageListResponse,
        MarkMessageReadResponse
    )),
    info(
        title = "Messaging API",
        description = "Threaded direct messaging: threads, messages, and read \
        receipts. Visible only to thread participants.",
        version = "1.0.0"
    )
)]
pub struct MessagingApiDoc;

pub struct MessagingState {
    pub messaging: Arc<MessagingService>,
}

pub fn configure_routes() -> Router<Arc<MessagingState>> {
    Router::new()
        .route("/threads", post(create_thread).get(list_threads))
        .route(
            "/threads/{id}/messages",
            post(post_message).get(list_messages),
        )
        .route("/messages/{id}/read", post(mark_message_read))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateThreadBody {
    pub subject: String,
    /// Users to include; the caller is added automatically.
    #[serde(default)]
    pub participant_ids: Vec<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreadResponse {
    pub id: i32,
    pub subject: String,
    pub created_by: i32,
    pub participant_ids: Vec<i32>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_message_at: Option<UtcDateTime>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

impl ThreadResponse {
    fn map_from(view: ThreadView) -> Self {
        Self {
            id: view.thread.id,
            subject: view.thread.subject,
            created_by: view.thread.created_by,
            participant_ids: view.participant_ids,
            last_message_at: view.thread.last_message_at,
            created_at: view.thread.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostMessageBody {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i32,
    pub thread_id: i32,
    pub sender_id: i32,
    pub content: String,
    /// Participants who have marked this message read.
    pub read_by: Vec<i32>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: UtcDateTime,
}

impl MessageResponse {
    fn map_from(view: MessageView) -> Self {
        Self {
            id: view.message.id,
            thread_id: view.message.thread_id,
            sender_id: view.message.sender_id,
            content: view.message.content,
            read_by: view.read_by,
            created_at: view.message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkMessageReadResponse {
    /// False when the caller had already read the message.
    pub applied: bool,
}

fn map_messaging_error(e: MessagingError) -> Problem {
    match e {
        MessagingError::ThreadNotFound { .. } | MessagingError::MessageNotFound { .. } => {
            not_found().detail(e.to_string()).build()
        }
        MessagingError::NotParticipant { .. } => {
            ErrorBuilder::new(StatusCode::FORBIDDEN)
                .type_("https://crier.sh/probs/not-a-participant")
                .title("Not A Participant")
                .detail(e.to_string())
                .build()
        }
        MessagingError::Invalid { details } => unprocessable_entity().detail(details).build(),
        MessagingError::Database(e) => {
            tracing::error!("Messaging storage error: {}", e);
            internal_server_error().build()
        }
    }
}

/// Start a thread
///
/// Threads are peer-to-peer; any authenticated user may start one, no
/// capability required. The caller becomes a participant automatically.
#[utoipa::path(
    tag = "Messaging",
    post,
    path = "/threads",
    request_body = CreateThreadBody,
    responses(
        (status = 201, description = "Thread created", body = ThreadResponse),
        (status = 422, description = "Empty subject")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn create_thread(
    caller: CallerContext,
    State(state): State<Arc<MessagingState>>,
    Json(body): Json<CreateThreadBody>,
) -> Result<impl IntoResponse, Problem> {
    let view = state
        .messaging
        .create_thread(
            caller.user_id,
            CreateThreadRequest {
                subject: body.subject,
                participant_ids: body.participant_ids,
            },
        )
        .await
        .map_err(map_messaging_error)?;
    Ok((StatusCode::CREATED, Json(ThreadResponse::map_from(view))))
}

/// List the caller's threads, most recently active first
#[utoipa::path(
    tag = "Messaging",
    get,
    path = "/threads",
    responses(
        (status = 200, description = "Threads the caller participates in", body = ThreadListResponse),
        (status = 401, description = "Missing caller identity")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_threads(
    caller: CallerContext,
    State(state): State<Arc<MessagingState>>,
) -> Result<impl IntoResponse, Problem> {
    let threads = state
        .messaging
        .list_threads(caller.user_id)
        .await
        .map_err(map_messaging_error)?;
    Ok(Json(ThreadListResponse {
        threads: threads.into_iter().map(ThreadResponse::map_from).collect(),
    }))
}

/// Post a message to a thread
#[utoipa::path(
    tag = "Messaging",
    post,
    path = "/threads/{id}/messages",
    params(
        ("id" = i32, Path, description = "Thread id")
    ),
    request_body = PostMessageBody,
    responses(
        (status = 201, description = "Message posted", body = MessageResponse),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "No such thread"),
        (status = 422, description = "Empty content")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn post_message(
    caller: CallerContext,
    State(state): State<Arc<MessagingState>>,
    Path(id): Path<i32>,
    Json(body): Json<PostMessageBody>,
) -> Result<impl IntoResponse, Problem> {
    let message = state
        .messaging
        .post_message(id, caller.user_id, &body.content)
        .await
        .map_err(map_messaging_error)?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::map_from(MessageView {
            message,
            read_by: Vec::new(),
        })),
    ))
}

/// List a thread's messages, oldest first
#[utoipa::path(
    tag = "Messaging",
    get,
    path = "/threads/{id}/messages",
    params(
        ("id" = i32, Path, description = "Thread id")
    ),
    responses(
        (status = 200, description = "Messages with read receipts", body = MessageListResponse),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "No such thread")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn list_messages(
    caller: CallerContext,
    State(state): State<Arc<MessagingState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let messages = state
        .messaging
        .list_messages(id, caller.user_id)
        .await
        .map_err(map_messaging_error)?;
    Ok(Json(MessageListResponse {
        messages: messages
            .into_iter()
            .map(MessageResponse::map_from)
            .collect(),
    }))
}

/// Mark a message as read
///
/// Idempotent: re-marking reports `applied: false`.
#[utoipa::path(
    tag = "Messaging",
    post,
    path = "/messages/{id}/read",
    params(
        ("id" = i32, Path, description = "Message id")
    ),
    responses(
        (status = 200, description = "Read state after the call", body = MarkMessageReadResponse),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "No such message")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn mark_message_read(
    caller: CallerContext,
    State(state): State<Arc<MessagingState>>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let applied = state
        .messaging
        .mark_message_read(id, caller.user_id)
        .await
        .map_err(map_messaging_error)?;
    Ok(Json(MarkMessageReadResponse { applied }))
}
