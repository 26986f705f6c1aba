//! HTTP surface for sessions, workflows and the audit log

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditOperation};
use crate::error::{AppError, Result};
use crate::models::SessionStatus;
use crate::orchestrator::{cancel_pair, OrchestrationRun};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route(
            "/sessions/:id",
            get(session_status).delete(invalidate_session),
        )
        .route("/sessions/:id/authorize", get(authorization_url))
        .route("/sessions/:id/workflows", post(run_workflow))
        .route("/callback", get(callback))
        .route("/audit", get(audit_entries))
        .route("/audit/stream", get(audit_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionStatus>)> {
    let session = state.sessions.create_session().await?;
    Ok((StatusCode::CREATED, Json(SessionStatus::from(&session))))
}

async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>> {
    let session = state
        .sessions
        .get_session(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {}", id)))?;
    Ok(Json(SessionStatus::from(&session)))
}

async fn invalidate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.sessions.invalidate(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Session {}", id)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    /// Space- or comma-separated scopes
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub session_id: Uuid,
    pub authorization_url: String,
}

async fn authorization_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizeResponse>> {
    let scopes: Vec<String> = query
        .scope
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let url = state.sessions.build_authorization_url(id, &scopes).await?;
    Ok(Json(AuthorizeResponse {
        session_id: id,
        authorization_url: url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<SessionStatus>> {
    if let Some(error) = query.error {
        return Err(AppError::Auth(format!(
            "{}: {}",
            error,
            query.error_description.unwrap_or_default()
        )));
    }

    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("Missing code".to_string()))?;
    let session_id = query
        .state
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AppError::BadRequest("Missing or invalid state".to_string()))?;

    let session = state.sessions.complete_login(session_id, &code).await?;
    Ok(Json(SessionStatus::from(&session)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub request: String,
}

/// Runs on its own task; if the client goes away the run stops after
/// the in-flight step.
async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<WorkflowRequest>,
) -> Result<Json<OrchestrationRun>> {
    if body.request.trim().is_empty() {
        return Err(AppError::BadRequest("Request must not be empty".to_string()));
    }

    let (handle, signal) = cancel_pair();
    let guard = handle.cancel_on_drop();
    let orchestrator = state.orchestrator.clone();

    let task = tokio::spawn(async move {
        orchestrator
            .run_workflow_with_cancel(id, &body.request, signal)
            .await
    });

    let run = task
        .await
        .map_err(|e| AppError::Internal(format!("Workflow task failed: {}", e)))??;
    guard.disarm();

    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub operation: Option<AuditOperation>,
}

async fn audit_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let entries = match query.operation {
        Some(operation) => state.audit.entries_for(operation).await,
        None => state.audit.entries().await,
    };
    Json(entries)
}

async fn audit_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let mut rx = state.audit.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(entry) => {
                    yield Event::default()
                        .event(entry.operation.as_str())
                        .json_data(&entry);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Audit stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
