use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shopkeep_agent::{
    AgentRuntime, ApprovalRequest, PendingActionView, SelectionOption, TurnRequest, TurnResult,
    TurnStatus,
};
use shopkeep_core::checkpoint::SessionSummary;
use shopkeep_core::domain::conversation::SessionId;
use shopkeep_core::domain::customer::CustomerId;
use shopkeep_core::errors::{ApplicationError, DialogueError, InterfaceError};
use shopkeep_db::DbPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub db_pool: DbPool,
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.db_pool.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/chat", post(chat))
        .route("/approve", post(approve))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_id}", delete(delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub session_id: String,
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub status: TurnStatus,
    pub response: String,
    pub pending_action: Option<PendingActionView>,
    pub selections: Vec<SelectionOption>,
    pub waiting_for_approval: bool,
    pub error_code: Option<String>,
}

impl From<TurnResult> for ChatResponse {
    fn from(result: TurnResult) -> Self {
        Self {
            waiting_for_approval: result.waiting_for_approval(),
            session_id: result.session_id.0,
            status: result.status,
            response: result.response,
            pending_action: result.pending_action,
            selections: result.selections,
            error_code: result.error_code,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub active_sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub session_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

/// Transport error; turn failures are not errors at this level and are
/// returned as `status = error` turn responses instead.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let (status, kind) = match &error {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        };
        let message = match &error {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::NotFound { message, .. } => message.clone(),
            InterfaceError::ServiceUnavailable { .. } => error.user_message().to_string(),
        };
        Self {
            status,
            body: ErrorBody {
                error: kind.to_string(),
                message,
                correlation_id: error.correlation_id().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn bad_request(message: impl Into<String>, correlation_id: &str) -> ApiError {
    InterfaceError::BadRequest {
        message: message.into(),
        correlation_id: correlation_id.to_string(),
    }
    .into()
}

fn dialogue_error(error: DialogueError, correlation_id: &str) -> ApiError {
    ApplicationError::from(error).into_interface(correlation_id).into()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = correlation_id();
    let Json(request) = payload.map_err(|rejection| {
        warn!(
            event_name = "ingress.chat.rejected",
            correlation_id = %correlation_id,
            error = %rejection.body_text(),
            "malformed chat request"
        );
        bad_request(rejection.body_text(), &correlation_id)
    })?;

    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty", &correlation_id));
    }

    let session_id = non_blank(request.session_id).map(SessionId);
    info!(
        event_name = "ingress.chat.received",
        correlation_id = %correlation_id,
        session_id = session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("new"),
        "chat request received"
    );

    let turn = TurnRequest {
        session_id,
        customer_id: non_blank(request.customer_id).map(CustomerId),
        message: request.message,
    };
    Ok(Json(state.runtime.handle_turn(turn).await.into()))
}

async fn approve(
    State(state): State<AppState>,
    payload: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let correlation_id = correlation_id();
    let Json(request) =
        payload.map_err(|rejection| bad_request(rejection.body_text(), &correlation_id))?;
    let Some(session_id) = non_blank(Some(request.session_id)) else {
        return Err(bad_request("session_id must not be empty", &correlation_id));
    };

    info!(
        event_name = "ingress.approve.received",
        correlation_id = %correlation_id,
        session_id = %session_id,
        approved = request.approved,
        "approval decision received"
    );

    let decision = ApprovalRequest {
        session_id: SessionId(session_id),
        approved: request.approved,
        reason: request.reason,
    };
    Ok(Json(state.runtime.resolve(decision).await.into()))
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<SessionsResponse>, ApiError> {
    let correlation_id = correlation_id();
    let active_sessions = state
        .runtime
        .list_sessions()
        .await
        .map_err(|error| dialogue_error(error, &correlation_id))?;
    Ok(Json(SessionsResponse { active_sessions }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let correlation_id = correlation_id();
    let id = SessionId(session_id.clone());
    match state.runtime.delete_session(&id).await {
        Ok(true) => Ok(Json(DeletedResponse { session_id, deleted: true })),
        Ok(false) => {
            let error = DialogueError::SessionNotFound { session_id };
            Err(dialogue_error(error, &correlation_id))
        }
        Err(error) => Err(dialogue_error(error, &correlation_id)),
    }
}
