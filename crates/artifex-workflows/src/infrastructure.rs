//! Infrastructure sub-workflow
//!
//! Secondary orchestration over a completed generation workflow: IaC,
//! configuration bundle, compliance report, cost estimate. IaC generation is
//! critical; the other stages warn on failure, mirroring the main pipeline.

use std::time::Duration;

use artifex_activities::{InfraStageInput, RecordStageErrorInput, StageOutput};
use artifex_durable::activity::error_types;
use artifex_durable::{
    ActivityError, ActivityOptions, RetryPolicy, Workflow, WorkflowAction, WorkflowError,
    WorkflowSignal,
};
use artifex_ledger::Stage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::result::{DropRef, InfrastructureResult, StageWarning};

/// Frozen sub-workflow submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureRequest {
    /// The sub-workflow's own id.
    pub workflow_id: Uuid,

    /// The completed generation workflow to build infrastructure for.
    pub source_workflow_id: Uuid,

    pub provider: String,

    #[serde(default = "default_environment")]
    pub environment: String,

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

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_max_attempts: Option<u32>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl InfrastructureRequest {
    fn stage_input(&self) -> InfraStageInput {
        InfraStageInput {
            workflow_id: self.workflow_id,
            source_workflow_id: self.source_workflow_id,
            provider: self.provider.clone(),
            environment: self.environment.clone(),
            compliance: self.compliance.clone(),
            enable_golden_images: self.enable_golden_images,
            enable_sop: self.enable_sop,
            auto_deploy: self.auto_deploy,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Stage { stage: Stage, activity_id: String },
    RecordingError {
        activity_id: String,
        failed_stage: Stage,
        fail_with: Option<WorkflowError>,
    },
    Done,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Running,
    Completed,
    Failed(WorkflowError),
    Cancelled,
}

/// The four-stage infrastructure workflow.
pub struct InfrastructureWorkflow {
    request: InfrastructureRequest,
    phase: Phase,
    outcome: Outcome,
    refs: Vec<(Stage, i32)>,
    warnings: Vec<StageWarning>,
    cancel_reason: Option<String>,
    activity_seq: u32,
}

impl InfrastructureWorkflow {
    fn next_activity_id(&mut self, prefix: &str) -> String {
        self.activity_seq += 1;
        format!("{}-{}", prefix, self.activity_seq)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.request.activity_max_attempts.unwrap_or(3))
            .with_non_retryable_error(error_types::INVALID_INPUT)
            .with_non_retryable_error(error_types::PERMANENT_EXTERNAL)
    }

    fn next_stage(stage: Stage) -> Option<Stage> {
        Stage::INFRASTRUCTURE
            .iter()
            .skip_while(|s| **s != stage)
            .nth(1)
            .copied()
    }

    fn schedule_stage(&mut self, stage: Stage) -> Vec<WorkflowAction> {
        let activity_id = self.next_activity_id(stage.name());
        self.phase = Phase::Stage {
            stage,
            activity_id: activity_id.clone(),
        };
        vec![WorkflowAction::schedule_with_options(
            activity_id,
            stage.name(),
            serde_json::to_value(self.request.stage_input()).unwrap_or_default(),
            ActivityOptions::default()
                .with_retry(self.retry_policy())
                .with_start_to_close_timeout(Duration::from_secs(300)),
        )]
    }

    fn advance_from(&mut self, stage: Stage) -> Vec<WorkflowAction> {
        if let Some(reason) = self.cancel_reason.take() {
            self.phase = Phase::Done;
            self.outcome = Outcome::Cancelled;
            return vec![WorkflowAction::cancel(reason)];
        }
        match Self::next_stage(stage) {
            Some(next) => self.schedule_stage(next),
            None => self.complete(),
        }
    }

    fn complete(&mut self) -> Vec<WorkflowAction> {
        let result = self.build_result();
        self.phase = Phase::Done;
        match result {
            Some(result) => {
                self.outcome = Outcome::Completed;
                vec![WorkflowAction::complete(
                    serde_json::to_value(result).unwrap_or_default(),
                )]
            }
            None => {
                let error = WorkflowError::new("infrastructure generation produced no IaC")
                    .with_code("Critical");
                self.outcome = Outcome::Failed(error.clone());
                vec![WorkflowAction::fail(error)]
            }
        }
    }

    fn build_result(&self) -> Option<InfrastructureResult> {
        let find = |stage: Stage| {
            self.refs
                .iter()
                .find(|(s, _)| *s == stage)
                .map(|(s, v)| DropRef::new(s.name(), *v))
        };
        Some(InfrastructureResult {
            source_workflow_id: self.request.source_workflow_id,
            iac: find(Stage::IacGeneration)?,
            config: find(Stage::ConfigBundle),
            compliance: find(Stage::ComplianceReport),
            cost: find(Stage::CostEstimate),
            warnings: self.warnings.clone(),
        })
    }

    fn schedule_error_record(
        &mut self,
        stage: Stage,
        error: &ActivityError,
        fail_with: Option<WorkflowError>,
    ) -> Vec<WorkflowAction> {
        let activity_id = self.next_activity_id("record_stage_error");
        let input = RecordStageErrorInput {
            workflow_id: self.request.workflow_id,
            stage,
            error_kind: error
                .error_type
                .clone()
                .unwrap_or_else(|| error_types::TRANSIENT_EXTERNAL.to_string()),
            message: error.message.clone(),
            attempts: self.retry_policy().max_attempts,
            details: error.details.clone(),
        };
        self.phase = Phase::RecordingError {
            activity_id: activity_id.clone(),
            failed_stage: stage,
            fail_with,
        };
        vec![WorkflowAction::schedule_with_options(
            activity_id,
            "record_stage_error",
            serde_json::to_value(input).unwrap_or_default(),
            ActivityOptions::default().with_retry(self.retry_policy()),
        )]
    }

    fn after_error_recorded(
        &mut self,
        failed_stage: Stage,
        fail_with: Option<WorkflowError>,
    ) -> Vec<WorkflowAction> {
        match fail_with {
            Some(error) => {
                self.phase = Phase::Done;
                self.outcome = Outcome::Failed(error.clone());
                vec![WorkflowAction::fail(error)]
            }
            None => self.advance_from(failed_stage),
        }
    }
}

impl Workflow for InfrastructureWorkflow {
    const TYPE: &'static str = "infrastructure_generation";
    type Input = InfrastructureRequest;
    type Output = InfrastructureResult;

    fn new(input: Self::Input) -> Self {
        Self {
            request: input,
            phase: Phase::Done,
            outcome: Outcome::Running,
            refs: vec![],
            warnings: vec![],
            cancel_reason: None,
            activity_seq: 0,
        }
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.schedule_stage(Stage::IacGeneration)
    }

    fn on_activity_completed(
        &mut self,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction> {
        match self.phase.clone() {
            Phase::Stage {
                stage,
                activity_id: expected,
            } if expected == activity_id => {
                if let Ok(output) = serde_json::from_value::<StageOutput>(result) {
                    self.refs.push((stage, output.version));
                }
                self.advance_from(stage)
            }

            Phase::RecordingError {
                activity_id: expected,
                failed_stage,
                fail_with,
            } if expected == activity_id => self.after_error_recorded(failed_stage, fail_with),

            _ => vec![],
        }
    }

    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction> {
        match self.phase.clone() {
            Phase::Stage {
                stage,
                activity_id: expected,
            } if expected == activity_id => {
                let fail_with = if stage == Stage::IacGeneration {
                    Some(
                        WorkflowError::new(format!("IaC generation failed: {}", error.message))
                            .with_code(
                                error
                                    .error_type
                                    .clone()
                                    .unwrap_or_else(|| "Critical".to_string()),
                            ),
                    )
                } else {
                    self.warnings.push(StageWarning {
                        stage: stage.name().to_string(),
                        message: error.message.clone(),
                    });
                    None
                };
                self.schedule_error_record(stage, error, fail_with)
            }

            Phase::RecordingError {
                activity_id: expected,
                failed_stage,
                fail_with,
            } if expected == activity_id => {
                self.warnings.push(StageWarning {
                    stage: "error_recording".to_string(),
                    message: error.message.clone(),
                });
                self.after_error_recorded(failed_stage, fail_with)
            }

            _ => vec![],
        }
    }

    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        if signal.is_cancel() {
            self.cancel_reason = Some(
                signal
                    .cancel_reason()
                    .unwrap_or("cancellation requested")
                    .to_string(),
            );
        }
        vec![]
    }

    fn is_completed(&self) -> bool {
        self.outcome != Outcome::Running
    }

    fn result(&self) -> Option<Self::Output> {
        match &self.outcome {
            Outcome::Completed => self.build_result(),
            _ => None,
        }
    }

    fn error(&self) -> Option<WorkflowError> {
        match &self.outcome {
            Outcome::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    fn progress(&self) -> Option<serde_json::Value> {
        let current = match &self.phase {
            Phase::Stage { stage, .. } => Some(stage.name()),
            Phase::RecordingError { failed_stage, .. } => Some(failed_stage.name()),
            Phase::Done => None,
        };
        Some(json!({
            "status": match &self.outcome {
                Outcome::Running => "running",
                Outcome::Completed => "completed",
                Outcome::Failed(_) => "failed",
                Outcome::Cancelled => "cancelled",
            },
            "current_stage": current,
            "completed_stages": self.refs.iter().map(|(s, _)| s.name()).collect::<Vec<_>>(),
            "warnings": self.warnings,
            "source_workflow_id": self.request.source_workflow_id,
        }))
    }
}
