//! Request/response DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use artifex_ledger::Drop;
use artifex_workflows::StageWarning;

/// Body of `POST /workflows/generate-extended`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateExtendedRequest {
    pub prompt: String,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub framework: Option<String>,

    /// Artifact kind ("api", "cli", "worker"...).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_true")]
    pub generate_tests: bool,

    #[serde(default = "default_true")]
    pub generate_docs: bool,

    /// Extra requirements appended to the prompt.
    #[serde(default)]
    pub requirements: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

/// Body of `POST /workflows/generate-infrastructure`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateInfrastructureRequest {
    pub workflow_id: Uuid,

    pub provider: String,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub compliance: Vec<String>,

    #[serde(default)]
    pub enable_golden_images: bool,

    #[serde(default)]
    pub enable_sop: bool,

    #[serde(default)]
    pub auto_deploy: bool,

    #[serde(default)]
    pub dry_run: bool,
}

/// Response to a submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowStartedResponse {
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub status: &'static str,
}

/// Response to `GET /workflows/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowStatusResponse {
    pub id: Uuid,
    pub status: String,
    #[schema(value_type = Option<String>)]
    pub current_stage: Option<String>,
    pub drop_count: u64,
    pub warnings: Vec<StageWarningDto>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A non-fatal stage failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StageWarningDto {
    pub stage: String,
    pub message: String,
}

impl From<StageWarning> for StageWarningDto {
    fn from(warning: StageWarning) -> Self {
        Self {
            stage: warning.stage,
            message: warning.message,
        }
    }
}

/// One ledger drop.
#[derive(Debug, Serialize, ToSchema)]
pub struct DropDto {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage: String,
    #[serde(rename = "type")]
    pub drop_type: String,
    pub artifact: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub version: i32,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Drop> for DropDto {
    fn from(drop: Drop) -> Self {
        Self {
            id: drop.id,
            workflow_id: drop.workflow_id,
            stage: drop.stage.name().to_string(),
            drop_type: drop.drop_type.name().to_string(),
            artifact: drop.artifact,
            metadata: serde_json::Value::Object(drop.metadata),
            version: drop.version,
            superseded: drop.superseded,
            created_at: drop.created_at,
        }
    }
}

/// Response to preview resolution.
#[derive(Debug, Serialize, ToSchema)]
pub struct PreviewResponse {
    pub workflow_id: Uuid,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

/// Liveness and provider health.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[schema(value_type = Object)]
    pub providers: serde_json::Value,
}
