//! Workflow events for persistence

use serde::{Deserialize, Serialize};

use super::{ActivityOptions, WorkflowError, WorkflowSignal};
use crate::activity::ActivityError;

/// Events in a workflow's append-only log.
///
/// Events are immutable once written. Workflow state is reconstructed by
/// replaying the log in sequence order; the executor consults the log length
/// as the expected sequence for optimistic appends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow was started with the given input.
    WorkflowStarted { input: serde_json::Value },

    /// Workflow completed successfully.
    WorkflowCompleted { result: serde_json::Value },

    /// Workflow failed.
    WorkflowFailed { error: WorkflowError },

    /// Workflow was cancelled at an activity boundary.
    WorkflowCancelled { reason: String },

    /// The overall workflow deadline elapsed.
    WorkflowTimedOut { deadline_ms: u64 },

    /// Activity was scheduled on the task queue.
    ActivityScheduled {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
        options: ActivityOptions,
    },

    /// Activity was claimed by a worker.
    ActivityStarted {
        activity_id: String,
        /// 1-based attempt counter.
        attempt: u32,
        worker_id: String,
    },

    /// Activity completed successfully.
    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },

    /// Activity failed. `will_retry` distinguishes an attempt from the final
    /// failure; only final failures are replayed into the workflow.
    ActivityFailed {
        activity_id: String,
        error: ActivityError,
        will_retry: bool,
    },

    /// External signal was received.
    SignalReceived { signal: WorkflowSignal },
}

impl WorkflowEvent {
    /// The activity_id, if this is an activity-related event.
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }

    /// Whether this event terminates the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
                | Self::WorkflowTimedOut { .. }
        )
    }
}
