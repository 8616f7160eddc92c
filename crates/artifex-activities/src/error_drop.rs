//! Stage error recording
//!
//! The workflow never masks a failure: when a stage exhausts its retries the
//! workflow schedules this activity to capture the final error as a
//! `type=error` drop with full diagnostics, then either proceeds
//! (warn-on-fail stages) or terminates (code generation).

use artifex_durable::{Activity, ActivityContext, ActivityError};
use artifex_ledger::{DropType, NewDrop, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::deps::{ActivityDeps, StageOutput};

/// Diagnostics for a failed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStageErrorInput {
    pub workflow_id: Uuid,
    pub stage: Stage,
    /// Error taxonomy kind (`AllProvidersFailed`, `Timeout`, ...).
    pub error_kind: String,
    pub message: String,
    /// Attempts consumed before exhaustion.
    pub attempts: u32,
    /// Structured diagnostics (per-provider failure log and the like).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Writes the error drop for a failed stage.
pub struct RecordStageErrorActivity {
    deps: ActivityDeps,
}

impl RecordStageErrorActivity {
    pub const TYPE_NAME: &'static str = "record_stage_error";

    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for RecordStageErrorActivity {
    const TYPE: &'static str = RecordStageErrorActivity::TYPE_NAME;
    type Input = RecordStageErrorInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        warn!(
            workflow_id = %input.workflow_id,
            stage = %input.stage,
            error_kind = %input.error_kind,
            "recording stage failure"
        );

        let artifact = serde_json::to_string_pretty(&json!({
            "error_kind": input.error_kind,
            "message": input.message,
            "attempts": input.attempts,
            "details": input.details,
        }))
        .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = NewDrop::new(input.workflow_id, input.stage, DropType::Error, artifact)
            .with_metadata("error_kind", json!(input.error_kind))
            .with_metadata("attempts", json!(input.attempts));
        self.deps.write_drop(drop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test_support::sim_deps;
    use artifex_ledger::DropFilter;
    use std::time::Duration;

    #[tokio::test]
    async fn records_error_drop_with_diagnostics() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let output = RecordStageErrorActivity::new(deps.clone())
            .execute(
                &ActivityContext::new(wf, "err-5", 1, 3, Duration::from_secs(10)),
                RecordStageErrorInput {
                    workflow_id: wf,
                    stage: Stage::CodeGeneration,
                    error_kind: "AllProvidersFailed".into(),
                    message: "all providers failed".into(),
                    attempts: 3,
                    details: Some(json!({"failures": [{"provider": "openai"}]})),
                },
            )
            .await
            .unwrap();

        assert_eq!(output.stage, Stage::CodeGeneration);

        let drops = deps
            .ledger
            .list_drops(wf, DropFilter::drop_type(DropType::Error))
            .await
            .unwrap();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].metadata["error_kind"], json!("AllProvidersFailed"));
        assert!(drops[0].artifact.contains("openai"));
    }
}
