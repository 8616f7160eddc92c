//! WorkflowEventStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::workflow::{ActivityOptions, WorkflowError, WorkflowEvent, WorkflowSignal};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Optimistic append lost a race; the caller should reload and retry.
    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: i32, actual: i32 },

    /// A terminal workflow cannot be mutated.
    #[error("workflow {0} is in terminal state {1}")]
    TerminalState(Uuid, WorkflowStatus),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the caller may retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::ConcurrencyConflict { .. }
        )
    }
}

/// Workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Task status in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
    Cancelled,
}

/// A task to be enqueued.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub workflow_id: Uuid,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
}

/// A task claimed by a worker.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
    /// 1-based attempt counter for this claim.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Outcome of failing a task.
#[derive(Debug, Clone)]
pub enum TaskFailureOutcome {
    /// Requeued with a backoff delay.
    WillRetry { next_attempt: u32, delay: Duration },

    /// No attempts remain (or the error was non-retryable); the workflow
    /// must be notified of the final failure.
    Exhausted,
}

/// Workflow instance row.
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub id: Uuid,
    /// Unique per execution attempt of this workflow id.
    pub run_id: Uuid,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    /// Last persisted progress snapshot.
    pub progress: Option<serde_json::Value>,
    /// Absolute deadline for the whole workflow, if one was set.
    pub deadline_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowInfo {
    /// Whether the overall deadline has elapsed.
    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline_at.is_some_and(|d| now >= d)
    }
}

/// Store for workflow instances, their event logs, the activity task queue,
/// and pending signals.
///
/// Implementations must be thread-safe and tolerate concurrent writers;
/// event appends use optimistic sequence checks and task claiming must not
/// hand the same task to two workers.
#[async_trait]
pub trait WorkflowEventStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow operations
    // =========================================================================

    /// Create a new workflow instance in `Pending` state.
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        deadline_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, StoreError>;

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError>;

    /// Append events with an optimistic sequence check. Returns the new
    /// sequence (= total event count).
    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError>;

    /// Load the full event log in sequence order.
    async fn load_events(&self, workflow_id: Uuid)
        -> Result<Vec<(i32, WorkflowEvent)>, StoreError>;

    /// Update workflow status. Sets `started_at` on the transition to
    /// `Running` and `finished_at` on terminal transitions; terminal states
    /// are immutable.
    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError>;

    /// Persist the workflow's queryable progress snapshot.
    async fn update_progress(
        &self,
        workflow_id: Uuid,
        progress: serde_json::Value,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Task queue operations
    // =========================================================================

    /// Enqueue an activity task. Returns the task id.
    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError>;

    /// Claim up to `max_tasks` runnable tasks for the given activity types.
    /// Claiming increments the attempt counter.
    async fn claim_tasks(
        &self,
        worker_id: &str,
        activity_types: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    /// Mark a task completed.
    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt. The store consults the task's retry policy
    /// and the error's retryability to decide between requeue and exhaustion.
    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError>;

    /// Requeue tasks whose claim outlived their `start_to_close` timeout.
    /// Returns the ids of reclaimed tasks.
    async fn reclaim_stale_tasks(&self) -> Result<Vec<Uuid>, StoreError>;

    // =========================================================================
    // Signal operations
    // =========================================================================

    async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError>;

    async fn get_pending_signals(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowSignal>, StoreError>;

    async fn mark_signals_processed(
        &self,
        workflow_id: Uuid,
        count: usize,
    ) -> Result<(), StoreError>;
}
