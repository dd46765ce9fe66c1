//! The v1 REST API.
//!
//! Endpoints:
//! - `POST /v1/conversations`: open a conversation
//! - `GET  /v1/conversations/{id}`: conversation record and stored messages
//! - `POST /v1/conversations/{id}/messages`: send a message, receive an SSE stream
//! - `POST /v1/conversations/{id}/stop`: cancel the running turn
//! - `GET  /v1/tools`: list capabilities

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use triage_agent::{ChatService, SendMessage, SessionError};
use triage_core::error::StoreError;
use triage_core::store::{ConversationRecord, ConversationStore, StoredMessage};
use triage_store::InMemoryStore;

/// State shared by every v1 handler.
pub struct ApiV1State {
    pub chat: ChatService,
    pub store: Arc<InMemoryStore>,
    /// Tenant used when a request names none
    pub default_organization: String,
}

pub type SharedApiState = Arc<ApiV1State>;

pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/{id}", get(get_conversation))
        .route("/conversations/{id}/messages", post(send_message))
        .route("/conversations/{id}/stop", post(stop_turn))
        .route("/tools", get(list_tools))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound { .. } => api_error(StatusCode::NOT_FOUND, e.to_string()),
        StoreError::Storage(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub id: String,
    pub organization_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: ConversationRecord,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
    pub count: usize,
}

// ── Conversations ─────────────────────────────────────────────────────────

/// `POST /v1/conversations`
async fn create_conversation(
    State(state): State<SharedApiState>,
    body: Option<Json<CreateConversationRequest>>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let organization_id = request
        .organization_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| state.default_organization.clone());

    let id = state
        .store
        .create_conversation(&organization_id)
        .await
        .map_err(store_error)?;
    if let Some(title) = request.title.filter(|t| !t.trim().is_empty()) {
        state.store.set_title(&id, &title).await.map_err(store_error)?;
    }

    info!(conversation_id = %id, organization_id = %organization_id, "Conversation created");
    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse { id, organization_id }),
    ))
}

/// `GET /v1/conversations/{id}`
async fn get_conversation(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation = state.store.get_conversation(&id).await.map_err(store_error)?;
    let messages = state.store.list_messages(&id).await.map_err(store_error)?;
    Ok(Json(ConversationResponse { conversation, messages }))
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/conversations/{id}/messages`: each turn event becomes one SSE
/// event named by its kind.
async fn send_message(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<SendMessage>,
) -> Result<Response, ApiError> {
    info!(
        conversation_id = %id,
        content_len = payload.content.chars().count(),
        trace = payload.capture_full_trace,
        "v1 message SSE request"
    );

    let rx = state.chat.send_message(&id, payload).await.map_err(|e| match e {
        SessionError::InvalidContent => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        SessionError::Busy(_) => api_error(StatusCode::CONFLICT, e.to_string()),
        SessionError::Store(e) => store_error(e),
    })?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().event(event_type).data(data))
    });

    Ok((
        [(header::CACHE_CONTROL, "no-cache"), (header::HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(stream),
    )
        .into_response())
}

/// `POST /v1/conversations/{id}/stop`
async fn stop_turn(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    if state.chat.stop(&id).await {
        Ok(Json(StopResponse { stopped: true }))
    } else {
        warn!(conversation_id = %id, "Stop requested with no running turn");
        Err(api_error(StatusCode::NOT_FOUND, format!("No running turn for conversation {id}")))
    }
}

// ── Tools ─────────────────────────────────────────────────────────────────

/// `GET /v1/tools`
async fn list_tools(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .chat
        .runner()
        .registry()
        .definitions()
        .into_iter()
        .map(|d| ToolInfo { name: d.name, description: d.description })
        .collect();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}
