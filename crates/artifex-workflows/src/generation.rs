//! The twelve-stage generation workflow

use std::time::Duration;

use artifex_activities::{
    PublishPreviewInput, PublishPreviewOutput, RecordStageErrorInput, StageInput, StageOutput,
};
use artifex_durable::activity::error_types;
use artifex_durable::{
    ActivityError, ActivityOptions, RetryPolicy, Workflow, WorkflowAction, WorkflowError,
    WorkflowSignal,
};
use artifex_ledger::Stage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::result::{DropRef, GenerationResult, StageWarning};

/// Minimum size of the primary code artifact for a workflow to count as
/// completed.
const DEFAULT_MIN_CODE_BYTES: usize = 100;

/// Per-stage execution timeout unless the submission overrides it.
const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Frozen submission snapshot; the workflow's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The workflow's own id, fixed at submission so activities can address
    /// the ledger without the workflow reading any runtime state.
    pub workflow_id: Uuid,

    pub prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    /// Artifact kind hint ("api", "cli", "worker"...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Stages 8–9 run only when set.
    #[serde(default = "default_true")]
    pub generate_tests: bool,

    /// Stage 12 runs only when set.
    #[serde(default = "default_true")]
    pub generate_docs: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_ttl_secs: Option<u64>,

    /// `ACTIVITY_MAX_ATTEMPTS`, resolved at submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_max_attempts: Option<u32>,

    /// `STAGE_TIMEOUT_BASE` in seconds, resolved at submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_code_bytes: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl GenerationRequest {
    pub fn new(workflow_id: Uuid, prompt: impl Into<String>) -> Self {
        Self {
            workflow_id,
            prompt: prompt.into(),
            language: None,
            framework: None,
            kind: None,
            name: None,
            generate_tests: true,
            generate_docs: true,
            preview_ttl_secs: None,
            activity_max_attempts: None,
            stage_timeout_secs: None,
            min_code_bytes: None,
        }
    }

    fn stage_input(&self) -> StageInput {
        StageInput {
            workflow_id: self.workflow_id,
            prompt: self.prompt.clone(),
            language: self.language.clone(),
            framework: self.framework.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    fn stage_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::TestPlan | Stage::TestCodeGeneration => self.generate_tests,
            Stage::Documentation => self.generate_docs,
            _ => true,
        }
    }
}

/// Where the workflow goes after an error drop is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum AfterError {
    /// Warn-on-fail: advance past the failed stage.
    Continue { failed_stage: Stage },

    /// Critical: terminate as Failed (running compensations first).
    Fail { error: WorkflowError },

    /// Preview publication failed: complete without a preview.
    CompleteWithoutPreview,
}

/// What terminates the workflow after compensations run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum TerminalIntent {
    Fail { error: WorkflowError },
    Cancel { reason: String },
}

/// Current position in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum Phase {
    /// Awaiting a stage activity.
    Stage { stage: Stage, activity_id: String },

    /// Awaiting the error-drop recorder.
    RecordingError {
        activity_id: String,
        after: AfterError,
    },

    /// Awaiting preview publication.
    Publishing { activity_id: String },

    /// Running compensations before terminating.
    Compensating {
        activity_id: String,
        intent: TerminalIntent,
    },

    /// Terminal; `outcome` distinguishes how it ended.
    Done,
}

/// How the workflow ended.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Running,
    Completed,
    Failed(WorkflowError),
    Cancelled,
}

/// The twelve-stage generation pipeline.
pub struct GenerationWorkflow {
    request: GenerationRequest,
    phase: Phase,
    outcome: Outcome,
    completed_stages: Vec<Stage>,
    warnings: Vec<StageWarning>,
    code: Option<StageOutput>,
    tests_version: Option<i32>,
    docs_version: Option<i32>,
    preview: Option<PublishPreviewOutput>,
    cancel_reason: Option<String>,
    activity_seq: u32,
}

mod activity_names {
    pub const RECORD_STAGE_ERROR: &str = "record_stage_error";
    pub const PUBLISH_PREVIEW: &str = "publish_preview";
    pub const REVOKE_PREVIEW: &str = "revoke_preview";
}

impl GenerationWorkflow {
    fn next_activity_id(&mut self, prefix: &str) -> String {
        self.activity_seq += 1;
        format!("{}-{}", prefix, self.activity_seq)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.request.activity_max_attempts.unwrap_or(3))
            .with_non_retryable_error(error_types::INVALID_INPUT)
            .with_non_retryable_error(error_types::PERMANENT_EXTERNAL)
            .with_non_retryable_error(error_types::CANCELLED)
    }

    fn stage_options(&self) -> ActivityOptions {
        let timeout = self
            .request
            .stage_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STAGE_TIMEOUT);
        ActivityOptions::default()
            .with_retry(self.retry_policy())
            .with_start_to_close_timeout(timeout)
    }

    fn min_code_bytes(&self) -> usize {
        self.request.min_code_bytes.unwrap_or(DEFAULT_MIN_CODE_BYTES)
    }

    /// The next enabled stage after `stage`, if any.
    fn next_stage(&self, stage: Stage) -> Option<Stage> {
        Stage::PIPELINE
            .iter()
            .skip_while(|s| **s != stage)
            .skip(1)
            .find(|s| self.request.stage_enabled(**s))
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
            self.stage_options(),
        )]
    }

    fn schedule_error_record(
        &mut self,
        stage: Stage,
        error: &ActivityError,
        after: AfterError,
    ) -> Vec<WorkflowAction> {
        let activity_id = self.next_activity_id(activity_names::RECORD_STAGE_ERROR);
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
            after,
        };
        vec![WorkflowAction::schedule_with_options(
            activity_id,
            activity_names::RECORD_STAGE_ERROR,
            serde_json::to_value(input).unwrap_or_default(),
            // The recorder gets one generous shot per attempt; losing it
            // must never wedge the pipeline.
            ActivityOptions::default().with_retry(self.retry_policy()),
        )]
    }

    fn schedule_publish(&mut self) -> Vec<WorkflowAction> {
        let activity_id = self.next_activity_id(activity_names::PUBLISH_PREVIEW);
        let input = PublishPreviewInput {
            workflow_id: self.request.workflow_id,
            ttl_secs: self.request.preview_ttl_secs,
        };
        self.phase = Phase::Publishing {
            activity_id: activity_id.clone(),
        };
        vec![WorkflowAction::schedule_with_options(
            activity_id,
            activity_names::PUBLISH_PREVIEW,
            serde_json::to_value(input).unwrap_or_default(),
            ActivityOptions::default().with_retry(self.retry_policy()),
        )]
    }

    /// Terminate, running the preview compensation first when one is owed.
    fn terminate(&mut self, intent: TerminalIntent) -> Vec<WorkflowAction> {
        if let Some(session_id) = self.preview.take().map(|p| p.session_id) {
            let activity_id = self.next_activity_id(activity_names::REVOKE_PREVIEW);
            let input = json!({
                "workflow_id": self.request.workflow_id,
                "session_id": session_id,
            });
            self.phase = Phase::Compensating {
                activity_id: activity_id.clone(),
                intent,
            };
            return vec![WorkflowAction::schedule_with_options(
                activity_id,
                activity_names::REVOKE_PREVIEW,
                input,
                ActivityOptions::default().with_retry(RetryPolicy::no_retry()),
            )];
        }

        self.phase = Phase::Done;
        match intent {
            TerminalIntent::Fail { error } => {
                self.outcome = Outcome::Failed(error.clone());
                vec![WorkflowAction::fail(error)]
            }
            TerminalIntent::Cancel { reason } => {
                self.outcome = Outcome::Cancelled;
                vec![WorkflowAction::cancel(reason)]
            }
        }
    }

    /// Cancellation wins at every boundary.
    fn take_cancel(&mut self) -> Option<Vec<WorkflowAction>> {
        let reason = self.cancel_reason.take()?;
        Some(self.terminate(TerminalIntent::Cancel { reason }))
    }

    /// Advance past `stage` to the next enabled stage, preview publication,
    /// or completion.
    fn advance_from(&mut self, stage: Stage) -> Vec<WorkflowAction> {
        if let Some(actions) = self.take_cancel() {
            return actions;
        }
        match self.next_stage(stage) {
            Some(next) => self.schedule_stage(next),
            None => self.schedule_publish(),
        }
    }

    fn complete(&mut self) -> Vec<WorkflowAction> {
        let Some(code) = &self.code else {
            // Unreachable in the linear flow; defends the invariant anyway.
            return self.terminate(TerminalIntent::Fail {
                error: WorkflowError::new("completed without a code artifact")
                    .with_code("Critical"),
            });
        };

        let result = GenerationResult {
            primary_artifact: DropRef::new(Stage::CodeGeneration.name(), code.version),
            tests: self
                .tests_version
                .map(|v| DropRef::new(Stage::TestCodeGeneration.name(), v)),
            docs: self
                .docs_version
                .map(|v| DropRef::new(Stage::Documentation.name(), v)),
            preview_session_id: self.preview.as_ref().map(|p| p.session_id.clone()),
            warnings: self.warnings.clone(),
            provider_used: code.provider.clone(),
            language: code.language.clone(),
        };

        self.phase = Phase::Done;
        self.outcome = Outcome::Completed;
        vec![WorkflowAction::complete(
            serde_json::to_value(result).unwrap_or_default(),
        )]
    }

    fn record_stage_output(&mut self, stage: Stage, result: &serde_json::Value) {
        self.completed_stages.push(stage);
        let Ok(output) = serde_json::from_value::<StageOutput>(result.clone()) else {
            return;
        };
        match stage {
            Stage::CodeGeneration => self.code = Some(output),
            Stage::TestCodeGeneration => self.tests_version = Some(output.version),
            Stage::Documentation => self.docs_version = Some(output.version),
            _ => {}
        }
    }

    fn status_label(&self) -> &'static str {
        match (&self.outcome, &self.phase) {
            (Outcome::Completed, _) => "completed",
            (Outcome::Failed(_), _) => "failed",
            (Outcome::Cancelled, _) => "cancelled",
            (Outcome::Running, Phase::Compensating { .. }) => "compensating",
            (Outcome::Running, _) => "running",
        }
    }

    fn current_stage_label(&self) -> Option<&'static str> {
        match &self.phase {
            Phase::Stage { stage, .. } => Some(stage.name()),
            Phase::RecordingError { after, .. } => match after {
                AfterError::Continue { failed_stage } => Some(failed_stage.name()),
                AfterError::Fail { .. } => Some(Stage::CodeGeneration.name()),
                AfterError::CompleteWithoutPreview => Some(Stage::PreviewPublication.name()),
            },
            Phase::Publishing { .. } => Some(Stage::PreviewPublication.name()),
            _ => None,
        }
    }
}

impl Workflow for GenerationWorkflow {
    const TYPE: &'static str = "extended_generation";
    type Input = GenerationRequest;
    type Output = GenerationResult;

    fn new(input: Self::Input) -> Self {
        Self {
            request: input,
            phase: Phase::Done, // replaced by on_start
            outcome: Outcome::Running,
            completed_stages: vec![],
            warnings: vec![],
            code: None,
            tests_version: None,
            docs_version: None,
            preview: None,
            cancel_reason: None,
            activity_seq: 0,
        }
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.schedule_stage(Stage::PromptEnhancement)
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
                self.record_stage_output(stage, &result);

                if stage == Stage::CodeGeneration {
                    let length = self.code.as_ref().map(|c| c.content_length).unwrap_or(0);
                    if length < self.min_code_bytes() {
                        let error = ActivityError::non_retryable(format!(
                            "generated code too small: {} bytes < {} minimum",
                            length,
                            self.min_code_bytes()
                        ))
                        .with_type(error_types::VALIDATION_FAILURE);
                        let after = AfterError::Fail {
                            error: WorkflowError::new(&error.message)
                                .with_code(error_types::VALIDATION_FAILURE),
                        };
                        return self.schedule_error_record(stage, &error, after);
                    }
                }

                self.advance_from(stage)
            }

            Phase::RecordingError {
                activity_id: expected,
                after,
            } if expected == activity_id => match after {
                AfterError::Continue { failed_stage } => self.advance_from(failed_stage),
                AfterError::Fail { error } => self.terminate(TerminalIntent::Fail { error }),
                AfterError::CompleteWithoutPreview => self.complete(),
            },

            Phase::Publishing {
                activity_id: expected,
            } if expected == activity_id => {
                if let Ok(output) = serde_json::from_value::<PublishPreviewOutput>(result) {
                    self.preview = Some(output);
                }
                if let Some(actions) = self.take_cancel() {
                    // Cancelled between publication and completion: the
                    // compensation withdraws the fresh handle.
                    return actions;
                }
                self.complete()
            }

            Phase::Compensating {
                activity_id: expected,
                intent,
            } if expected == activity_id => self.terminate(intent),

            // Stale or unknown completion (e.g. output of the activity that
            // was in flight when cancellation landed): captured in the
            // ledger, nothing to drive here.
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
                if stage == Stage::CodeGeneration {
                    let code = error
                        .error_type
                        .clone()
                        .unwrap_or_else(|| "Critical".to_string());
                    let after = AfterError::Fail {
                        error: WorkflowError::new(format!(
                            "code generation failed: {}",
                            error.message
                        ))
                        .with_code(code),
                    };
                    self.schedule_error_record(stage, error, after)
                } else {
                    self.warnings.push(StageWarning {
                        stage: stage.name().to_string(),
                        message: error.message.clone(),
                    });
                    self.schedule_error_record(
                        stage,
                        error,
                        AfterError::Continue { failed_stage: stage },
                    )
                }
            }

            Phase::RecordingError {
                activity_id: expected,
                after,
            } if expected == activity_id => {
                // The recorder itself failed; note it and take the planned
                // path so the pipeline never wedges on bookkeeping.
                self.warnings.push(StageWarning {
                    stage: "error_recording".to_string(),
                    message: error.message.clone(),
                });
                match after {
                    AfterError::Continue { failed_stage } => self.advance_from(failed_stage),
                    AfterError::Fail { error } => self.terminate(TerminalIntent::Fail { error }),
                    AfterError::CompleteWithoutPreview => self.complete(),
                }
            }

            Phase::Publishing {
                activity_id: expected,
            } if expected == activity_id => {
                self.warnings.push(StageWarning {
                    stage: Stage::PreviewPublication.name().to_string(),
                    message: error.message.clone(),
                });
                self.schedule_error_record(
                    Stage::PreviewPublication,
                    error,
                    AfterError::CompleteWithoutPreview,
                )
            }

            Phase::Compensating {
                activity_id: expected,
                intent,
            } if expected == activity_id => {
                // Best-effort compensation; terminate regardless.
                self.terminate(intent)
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
            Outcome::Completed => {
                let code = self.code.as_ref()?;
                Some(GenerationResult {
                    primary_artifact: DropRef::new(Stage::CodeGeneration.name(), code.version),
                    tests: self
                        .tests_version
                        .map(|v| DropRef::new(Stage::TestCodeGeneration.name(), v)),
                    docs: self
                        .docs_version
                        .map(|v| DropRef::new(Stage::Documentation.name(), v)),
                    preview_session_id: self.preview.as_ref().map(|p| p.session_id.clone()),
                    warnings: self.warnings.clone(),
                    provider_used: code.provider.clone(),
                    language: code.language.clone(),
                })
            }
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
        Some(json!({
            "status": self.status_label(),
            "current_stage": self.current_stage_label(),
            "completed_stages": self
                .completed_stages
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>(),
            "warnings": self.warnings,
        }))
    }
}
