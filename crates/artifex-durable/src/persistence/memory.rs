//! In-memory implementation of WorkflowEventStore.
//!
//! Backs unit and integration tests and single-process development. Same
//! semantics as the PostgreSQL store, including terminal-state immutability
//! and per-claim attempt accounting.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::activity::ActivityError;
use crate::workflow::{WorkflowError, WorkflowEvent, WorkflowSignal};

struct WorkflowState {
    run_id: Uuid,
    workflow_type: String,
    status: WorkflowStatus,
    input: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<WorkflowError>,
    progress: Option<serde_json::Value>,
    deadline_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    events: Vec<WorkflowEvent>,
    signals: Vec<WorkflowSignal>,
}

struct TaskState {
    definition: TaskDefinition,
    status: TaskStatus,
    attempt: u32,
    run_after: DateTime<Utc>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

/// In-memory event store.
pub struct InMemoryWorkflowEventStore {
    workflows: RwLock<HashMap<Uuid, WorkflowState>>,
    tasks: RwLock<HashMap<Uuid, TaskState>>,
}

impl InMemoryWorkflowEventStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn pending_task_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Clear all data (for tests).
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.tasks.write().clear();
    }
}

impl Default for InMemoryWorkflowEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowEventStore for InMemoryWorkflowEventStore {
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        deadline_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.workflows.write().insert(
            workflow_id,
            WorkflowState {
                run_id,
                workflow_type: workflow_type.to_string(),
                status: WorkflowStatus::Pending,
                input,
                result: None,
                error: None,
                progress: None,
                deadline_at,
                started_at: None,
                finished_at: None,
                events: vec![],
                signals: vec![],
            },
        );
        Ok(())
    }

    async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .map(|w| w.status)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        let workflows = self.workflows.read();
        let w = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(WorkflowInfo {
            id: workflow_id,
            run_id: w.run_id,
            workflow_type: w.workflow_type.clone(),
            status: w.status,
            input: w.input.clone(),
            result: w.result.clone(),
            error: w.error.clone(),
            progress: w.progress.clone(),
            deadline_at: w.deadline_at,
            started_at: w.started_at,
            finished_at: w.finished_at,
        })
    }

    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut workflows = self.workflows.write();
        let w = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let current = w.events.len() as i32;
        if current != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current,
            });
        }

        w.events.extend(events);
        Ok(w.events.len() as i32)
    }

    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let workflows = self.workflows.read();
        let w = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(w.events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.clone()))
            .collect())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let w = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        if w.status.is_terminal() {
            return Err(StoreError::TerminalState(workflow_id, w.status));
        }

        w.status = status;
        if result.is_some() {
            w.result = result;
        }
        if error.is_some() {
            w.error = error;
        }
        match status {
            WorkflowStatus::Running => w.started_at = Some(Utc::now()),
            s if s.is_terminal() => w.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        workflow_id: Uuid,
        progress: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let w = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        w.progress = Some(progress);
        Ok(())
    }

    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.tasks.write().insert(
            id,
            TaskState {
                definition: task,
                status: TaskStatus::Pending,
                attempt: 0,
                run_after: Utc::now(),
                claimed_by: None,
                claimed_at: None,
                last_error: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn claim_tasks(
        &self,
        worker_id: &str,
        activity_types: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();

        let mut runnable: Vec<Uuid> = tasks
            .iter()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending
                    && t.run_after <= now
                    && (activity_types.is_empty()
                        || activity_types.contains(&t.definition.activity_type))
            })
            .map(|(id, _)| *id)
            .collect();

        // Claim order: priority first, then age.
        runnable.sort_by(|a, b| {
            let ta = &tasks[a];
            let tb = &tasks[b];
            tb.definition
                .options
                .priority
                .cmp(&ta.definition.options.priority)
                .then(ta.created_at.cmp(&tb.created_at))
        });
        runnable.truncate(max_tasks);

        let mut claimed = Vec::with_capacity(runnable.len());
        for id in runnable {
            let t = tasks.get_mut(&id).expect("id collected above");
            t.status = TaskStatus::Claimed;
            t.attempt += 1;
            t.claimed_by = Some(worker_id.to_string());
            t.claimed_at = Some(now);

            claimed.push(ClaimedTask {
                id,
                workflow_id: t.definition.workflow_id,
                activity_id: t.definition.activity_id.clone(),
                activity_type: t.definition.activity_type.clone(),
                input: t.definition.input.clone(),
                options: t.definition.options.clone(),
                attempt: t.attempt,
                max_attempts: t.definition.options.retry_policy.max_attempts,
            });
        }

        Ok(claimed)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        _result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let t = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        t.status = TaskStatus::Completed;
        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tasks = self.tasks.write();
        let t = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        t.last_error = Some(error.message.clone());

        let policy = &t.definition.options.retry_policy;
        let may_retry = error.retryable
            && policy.should_retry(error.error_type.as_deref())
            && policy.has_attempts_remaining(t.attempt);

        if may_retry {
            let next_attempt = t.attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            t.status = TaskStatus::Pending;
            t.run_after = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            t.claimed_by = None;
            t.claimed_at = None;
            Ok(TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            })
        } else {
            t.status = TaskStatus::Failed;
            Ok(TaskFailureOutcome::Exhausted)
        }
    }

    async fn reclaim_stale_tasks(&self) -> Result<Vec<Uuid>, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        let mut reclaimed = vec![];

        for (id, t) in tasks.iter_mut() {
            if t.status != TaskStatus::Claimed {
                continue;
            }
            let Some(claimed_at) = t.claimed_at else {
                continue;
            };
            let limit = chrono::Duration::from_std(t.definition.options.start_to_close_timeout)
                .unwrap_or_default();
            if now - claimed_at > limit {
                t.status = TaskStatus::Pending;
                t.claimed_by = None;
                t.claimed_at = None;
                t.run_after = now;
                reclaimed.push(*id);
            }
        }

        Ok(reclaimed)
    }

    async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let w = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        w.signals.push(signal);
        Ok(())
    }

    async fn get_pending_signals(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowSignal>, StoreError> {
        let workflows = self.workflows.read();
        let w = workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        Ok(w.signals.clone())
    }

    async fn mark_signals_processed(
        &self,
        workflow_id: Uuid,
        count: usize,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let w = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        w.signals.drain(..count.min(w.signals.len()));
        Ok(())
    }
}
