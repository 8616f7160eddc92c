//! Application state and the store-erasing orchestrator seam.

use std::sync::Arc;

use artifex_durable::{ExecutorError, WorkflowEventStore, WorkflowExecutor, WorkflowInfo};
use artifex_ledger::DropStore;
use artifex_preview::SessionManager;
use artifex_router::Router;
use artifex_workflows::{
    GenerationRequest, GenerationWorkflow, InfrastructureRequest, InfrastructureWorkflow,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Submission-time configuration resolved from the environment once at
/// startup and frozen into every workflow input.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// `ACTIVITY_MAX_ATTEMPTS`
    pub activity_max_attempts: Option<u32>,

    /// `STAGE_TIMEOUT_BASE`, seconds
    pub stage_timeout_secs: Option<u64>,

    /// `PREVIEW_DEFAULT_TTL`, seconds
    pub preview_ttl_secs: Option<u64>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            activity_max_attempts: env_parse("ACTIVITY_MAX_ATTEMPTS"),
            stage_timeout_secs: env_duration_secs("STAGE_TIMEOUT_BASE"),
            preview_ttl_secs: env_duration_secs("PREVIEW_DEFAULT_TTL"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// `WORKFLOW_TIMEOUT` as a duration (plain seconds or `30m`/`2h` forms).
pub fn env_workflow_timeout() -> Option<std::time::Duration> {
    env_duration_secs("WORKFLOW_TIMEOUT").map(std::time::Duration::from_secs)
}

/// Accepts plain seconds or `30m`/`2h`/`90s` forms.
pub(crate) fn env_duration_secs(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let (number, unit) = value.split_at(value.len().checked_sub(1)?);
    let number: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(number),
        "m" => Some(number * 60),
        "h" => Some(number * 3600),
        _ => None,
    }
}

/// Store-erased view of the workflow executor so handlers (and the OpenAPI
/// macros) stay non-generic.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn start_generation(
        &self,
        workflow_id: Uuid,
        request: GenerationRequest,
    ) -> Result<(Uuid, Uuid), ExecutorError>;

    async fn start_infrastructure(
        &self,
        workflow_id: Uuid,
        request: InfrastructureRequest,
    ) -> Result<(Uuid, Uuid), ExecutorError>;

    async fn workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, ExecutorError>;

    async fn cancel(&self, workflow_id: Uuid, reason: String) -> Result<(), ExecutorError>;
}

#[async_trait]
impl<S: WorkflowEventStore> Orchestrator for WorkflowExecutor<S> {
    async fn start_generation(
        &self,
        workflow_id: Uuid,
        request: GenerationRequest,
    ) -> Result<(Uuid, Uuid), ExecutorError> {
        self.start_workflow_with_id::<GenerationWorkflow>(workflow_id, request)
            .await
    }

    async fn start_infrastructure(
        &self,
        workflow_id: Uuid,
        request: InfrastructureRequest,
    ) -> Result<(Uuid, Uuid), ExecutorError> {
        self.start_workflow_with_id::<InfrastructureWorkflow>(workflow_id, request)
            .await
    }

    async fn workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, ExecutorError> {
        Ok(self.store().get_workflow_info(workflow_id).await?)
    }

    async fn cancel(&self, workflow_id: Uuid, reason: String) -> Result<(), ExecutorError> {
        self.request_cancellation(workflow_id, reason).await
    }
}

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub ledger: Arc<dyn DropStore>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<Router>,
    pub config: ApiConfig,
}
