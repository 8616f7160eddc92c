//! Preview resolution and health routes.

use artifex_preview::Resolution;
use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::dto::{HealthResponse, PreviewResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve a shareable preview handle.
#[utoipa::path(
    get,
    path = "/p/{session_id}",
    params(("session_id" = String, Path, description = "Preview session token")),
    responses(
        (status = 200, description = "Live session", body = PreviewResponse),
        (status = 404, description = "Unknown session"),
        (status = 410, description = "Session expired"),
    ),
    tag = "preview"
)]
pub async fn resolve_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PreviewResponse>, ApiError> {
    match state.sessions.resolve(&session_id).await? {
        Resolution::Active(session) => Ok(Json(PreviewResponse {
            workflow_id: session.workflow_id,
            session_id: session.id,
            expires_at: session.expires_at,
            access_count: session.access_count,
            metadata: session.metadata,
        })),
        Resolution::Expired => Err(ApiError::Gone("preview session expired".into())),
        Resolution::NotFound => Err(ApiError::NotFound),
    }
}

/// Resolve the most recent live preview for a workflow (direct URL).
#[utoipa::path(
    get,
    path = "/preview/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Live session", body = PreviewResponse),
        (status = 404, description = "No live session for this workflow"),
    ),
    tag = "preview"
)]
pub async fn resolve_workflow_preview(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let session = state
        .sessions
        .resolve_workflow(workflow_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // Route through resolve so the access is counted.
    match state.sessions.resolve(&session.id).await? {
        Resolution::Active(session) => Ok(Json(PreviewResponse {
            workflow_id: session.workflow_id,
            session_id: session.id,
            expires_at: session.expires_at,
            access_count: session.access_count,
            metadata: session.metadata,
        })),
        _ => Err(ApiError::NotFound),
    }
}

/// Liveness plus the provider health map.
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "health"
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers: serde_json::to_value(state.router.health()).unwrap_or_default(),
    })
}
