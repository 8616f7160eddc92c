//! Workflow trait definition

use serde::{de::DeserializeOwned, Serialize};

use super::{WorkflowAction, WorkflowSignal};
use crate::activity::ActivityError;

/// Error carried by a failed workflow.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    pub message: String,

    /// Error code for programmatic handling (e.g. `AllProvidersFailed`).
    pub code: Option<String>,

    /// Whether a fresh run of the same workflow could succeed.
    pub retryable: bool,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// A workflow is a deterministic state machine driven by events.
///
/// The executor rebuilds a workflow by constructing it from its frozen input
/// and replaying the event log through the `on_*` handlers. The handlers must
/// therefore be pure with respect to the event sequence: no clock reads, no
/// randomness, no I/O. Anything non-deterministic belongs in an activity.
///
/// Handlers return [`WorkflowAction`]s; the executor persists each action as
/// an event before carrying it out, which is what makes replay possible.
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier, used to look the workflow up in the registry.
    const TYPE: &'static str;

    /// Input type for starting the workflow.
    type Input: Serialize + DeserializeOwned + Send + Clone;

    /// Output type on successful completion.
    type Output: Serialize + DeserializeOwned + Send;

    /// Create a fresh instance from input. Called both on first start and on
    /// every replay.
    fn new(input: Self::Input) -> Self;

    /// Called when the workflow starts (and replays from the beginning).
    fn on_start(&mut self) -> Vec<WorkflowAction>;

    /// Called when an activity completes successfully.
    fn on_activity_completed(
        &mut self,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction>;

    /// Called when an activity fails for good (retries exhausted or the error
    /// was non-retryable).
    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction>;

    /// Called when an external signal is received.
    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        let _ = signal;
        vec![]
    }

    /// Whether the workflow has reached a terminal state.
    fn is_completed(&self) -> bool;

    /// The workflow result, if it completed successfully.
    fn result(&self) -> Option<Self::Output>;

    /// The workflow error, if it failed.
    fn error(&self) -> Option<WorkflowError> {
        None
    }

    /// A queryable progress snapshot, persisted by the executor after every
    /// processing round. Shape is workflow-defined.
    fn progress(&self) -> Option<serde_json::Value> {
        None
    }
}
