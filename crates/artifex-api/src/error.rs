//! API error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Resource existed but is expired (preview sessions).
    #[error("{0}")]
    Gone(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::InvalidInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Gone(_) => (StatusCode::GONE, "expired"),
            Self::Internal(error) => {
                tracing::error!(error = %error, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        let body = Json(json!({
            "error": kind,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<artifex_durable::ExecutorError> for ApiError {
    fn from(error: artifex_durable::ExecutorError) -> Self {
        use artifex_durable::ExecutorError as E;
        match error {
            E::WorkflowNotFound(_) => Self::NotFound,
            E::Store(artifex_durable::StoreError::WorkflowNotFound(_)) => Self::NotFound,
            E::WorkflowTerminal(id) => {
                Self::Conflict(format!("workflow {id} is already terminal"))
            }
            other => Self::Internal(other.into()),
        }
    }
}

impl From<artifex_ledger::LedgerError> for ApiError {
    fn from(error: artifex_ledger::LedgerError) -> Self {
        match error {
            artifex_ledger::LedgerError::NotFound { .. } => Self::NotFound,
            other => Self::Internal(other.into()),
        }
    }
}

impl From<artifex_preview::SessionError> for ApiError {
    fn from(error: artifex_preview::SessionError) -> Self {
        match error {
            artifex_preview::SessionError::InvalidInput(message) => Self::InvalidInput(message),
            other => Self::Internal(other.into()),
        }
    }
}
