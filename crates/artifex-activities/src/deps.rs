//! Shared activity dependencies and the common stage output shape.

use std::sync::Arc;

use artifex_durable::activity::error_types;
use artifex_durable::ActivityError;
use artifex_ledger::{Drop, DropStore, LedgerError, NewDrop, Stage};
use artifex_preview::SessionManager;
use artifex_router::{Router, RouterError};
use serde::{Deserialize, Serialize};

use crate::collaborators::{AstValidator, SandboxExecutor, VulnerabilityScanner};

/// Everything an activity may need, injected at worker startup. Cheap to
/// clone; all fields are shared handles.
#[derive(Clone)]
pub struct ActivityDeps {
    pub router: Arc<Router>,
    pub ledger: Arc<dyn DropStore>,
    pub sessions: Arc<SessionManager>,
    pub ast: Arc<dyn AstValidator>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
    pub sandbox: Arc<dyn SandboxExecutor>,
}

impl ActivityDeps {
    /// Persist a drop and summarize it for the workflow.
    pub(crate) async fn write_drop(&self, drop: NewDrop) -> Result<StageOutput, ActivityError> {
        let stage = drop.stage;
        let stored = self.ledger.create_drop(drop).await.map_err(ledger_error)?;
        Ok(StageOutput::from_drop(stage, &stored))
    }
}

/// Summary of a stage's persisted output, returned to the workflow.
///
/// The workflow must stay deterministic, so it sees only this summary; the
/// artifact itself lives in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: Stage,
    pub version: i32,
    pub content_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl StageOutput {
    pub fn from_drop(stage: Stage, drop: &Drop) -> Self {
        Self {
            stage,
            version: drop.version,
            content_length: drop.artifact.len(),
            language: drop
                .metadata
                .get("language")
                .and_then(|v| v.as_str())
                .map(String::from),
            provider: drop
                .metadata
                .get("provider")
                .and_then(|v| v.as_str())
                .map(String::from),
        }
    }
}

/// Map a ledger error onto the activity error taxonomy.
pub(crate) fn ledger_error(error: LedgerError) -> ActivityError {
    if error.is_transient() {
        ActivityError::retryable(error.to_string()).with_type(error_types::TRANSIENT_EXTERNAL)
    } else {
        ActivityError::non_retryable(error.to_string()).with_type(error_types::INVALID_INPUT)
    }
}

/// Map a router error onto the activity error taxonomy, keeping the
/// per-provider failure log as details.
pub(crate) fn router_error(error: RouterError) -> ActivityError {
    match error {
        RouterError::InvalidRequest(message) => {
            ActivityError::non_retryable(message).with_type(error_types::INVALID_INPUT)
        }
        RouterError::AllProvidersFailed { failures } => {
            let details = serde_json::json!({
                "failures": failures
                    .iter()
                    .map(|f| serde_json::json!({
                        "provider": f.provider,
                        "kind": f.kind,
                        "error": f.error,
                    }))
                    .collect::<Vec<_>>(),
            });
            ActivityError::retryable("all providers failed")
                .with_type(error_types::ALL_PROVIDERS_FAILED)
                .with_details(details)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use artifex_router::ProviderFailure;

    #[test]
    fn router_exhaustion_maps_to_retryable_with_log() {
        let error = router_error(RouterError::AllProvidersFailed {
            failures: vec![ProviderFailure {
                provider: "openai".into(),
                error: "503".into(),
                kind: "server".into(),
            }],
        });

        assert!(error.retryable);
        assert_eq!(error.error_type.as_deref(), Some("AllProvidersFailed"));
        assert!(error.details.unwrap()["failures"][0]["provider"] == "openai");
    }

    #[test]
    fn invalid_request_maps_to_non_retryable() {
        let error = router_error(RouterError::InvalidRequest("no messages".into()));
        assert!(!error.retryable);
        assert_eq!(error.error_type.as_deref(), Some("InvalidInput"));
    }
}
