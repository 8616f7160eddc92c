//! Workflow result shapes
//!
//! Results reference drops by `(stage, version)`; artifact bytes are never
//! duplicated out of the ledger.

use serde::{Deserialize, Serialize};

/// Reference to a drop in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DropRef {
    pub stage: String,
    pub version: i32,
}

impl DropRef {
    pub fn new(stage: impl Into<String>, version: i32) -> Self {
        Self {
            stage: stage.into(),
            version,
        }
    }
}

/// A non-fatal stage failure carried into the result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageWarning {
    pub stage: String,
    pub message: String,
}

/// Result of a completed generation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub primary_artifact: DropRef,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<DropRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<DropRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_session_id: Option<String>,

    pub warnings: Vec<StageWarning>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Result of a completed infrastructure sub-workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureResult {
    pub source_workflow_id: uuid::Uuid,

    pub iac: DropRef,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<DropRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<DropRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<DropRef>,

    pub warnings: Vec<StageWarning>,
}
