//! Workflow executor with replay support
//!
//! The executor drives workflow state machines:
//! - starts new workflows and persists their start events
//! - replays event history to rebuild state after suspension
//! - applies boundary events (activity completion/failure, signals) live,
//!   persisting each resulting action before carrying it out
//! - enforces the overall workflow deadline (`TimedOut`)
//! - persists a queryable progress snapshot after every round
//!
//! Replay rebuilds state only; actions are re-emitted exclusively at the
//! boundary where their triggering event is first applied. This keeps the
//! event log append-only and the workflow deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::persistence::{StoreError, TaskDefinition, WorkflowEventStore, WorkflowStatus};
use crate::workflow::{WorkflowAction, WorkflowError, WorkflowEvent, WorkflowSignal};

use super::registry::{AnyWorkflow, RegistryError, WorkflowRegistry};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Safety cap on events per workflow.
    pub max_events_per_workflow: usize,

    /// Deadline applied to new workflows unless the caller overrides it.
    pub default_workflow_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10_000,
            default_workflow_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Errors from executor operations.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("workflow {0} already in a terminal state")]
    WorkflowTerminal(Uuid),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Non-determinism or log corruption detected during replay.
    #[error("replay error: {0}")]
    Replay(String),

    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(Uuid, usize, usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of one processing round.
#[derive(Debug)]
pub struct ProcessResult {
    /// Whether the workflow reached a terminal state.
    pub completed: bool,

    pub events_written: usize,

    pub tasks_enqueued: usize,

    pub signals_processed: usize,
}

impl ProcessResult {
    fn terminal() -> Self {
        Self {
            completed: true,
            events_written: 0,
            tasks_enqueued: 0,
            signals_processed: 0,
        }
    }
}

/// The boundary event applied in one processing round.
enum Boundary {
    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },
    ActivityFailed {
        activity_id: String,
        error: ActivityError,
    },
}

/// Drives workflows by replaying events and processing actions. Safe to share
/// across tasks; all mutable state lives in the store.
pub struct WorkflowExecutor<S: WorkflowEventStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    config: ExecutorConfig,
}

impl<S: WorkflowEventStore> WorkflowExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            registry: WorkflowRegistry::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self {
            store,
            registry: WorkflowRegistry::new(),
            config,
        }
    }

    pub fn register<W: crate::workflow::Workflow>(&mut self) {
        self.registry.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a new workflow with a generated id. Returns `(workflow_id,
    /// run_id)`.
    #[instrument(skip(self, input), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: crate::workflow::Workflow>(
        &self,
        input: W::Input,
    ) -> Result<(Uuid, Uuid), ExecutorError> {
        self.start_workflow_with_id::<W>(Uuid::now_v7(), input).await
    }

    /// Start a new workflow under a caller-chosen id.
    #[instrument(skip(self, input), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow_with_id<W: crate::workflow::Workflow>(
        &self,
        workflow_id: Uuid,
        input: W::Input,
    ) -> Result<(Uuid, Uuid), ExecutorError> {
        let run_id = Uuid::now_v7();
        let input_json = serde_json::to_value(&input)?;
        let deadline_at = self
            .config
            .default_workflow_timeout
            .map(|t| Utc::now() + chrono::Duration::from_std(t).unwrap_or_default());

        info!(%workflow_id, %run_id, "starting workflow");

        self.store
            .create_workflow(workflow_id, run_id, W::TYPE, input_json.clone(), deadline_at)
            .await?;

        self.store
            .append_events(
                workflow_id,
                0,
                vec![WorkflowEvent::WorkflowStarted { input: input_json }],
            )
            .await?;

        let mut workflow = W::new(input);
        let actions = workflow.on_start();

        let terminal_on_start = actions.iter().any(|a| {
            matches!(
                a,
                WorkflowAction::CompleteWorkflow { .. }
                    | WorkflowAction::FailWorkflow { .. }
                    | WorkflowAction::CancelWorkflow { .. }
            )
        });

        self.process_actions_internal(workflow_id, 1, actions).await?;

        if !terminal_on_start {
            self.store
                .update_workflow_status(workflow_id, WorkflowStatus::Running, None, None)
                .await?;
        }

        if let Some(progress) = workflow.progress() {
            self.store.update_progress(workflow_id, progress).await?;
        }

        Ok((workflow_id, run_id))
    }

    /// Process a workflow without a boundary event: applies pending signals,
    /// enforces the deadline, flushes completion.
    pub async fn process_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<ProcessResult, ExecutorError> {
        self.advance(workflow_id, None).await
    }

    /// Send a signal to a running workflow.
    #[instrument(skip(self, signal))]
    pub async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), ExecutorError> {
        let status = self.store.get_workflow_status(workflow_id).await?;
        if status.is_terminal() {
            warn!(%workflow_id, %status, "cannot signal a terminal workflow");
            return Err(ExecutorError::WorkflowTerminal(workflow_id));
        }

        self.store.send_signal(workflow_id, signal).await?;
        info!(%workflow_id, "signal sent");
        Ok(())
    }

    /// Request cancellation: queues a cancel signal and processes the
    /// workflow so the signal is observed promptly. The actual transition
    /// happens at the next activity boundary.
    #[instrument(skip(self))]
    pub async fn request_cancellation(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<(), ExecutorError> {
        self.send_signal(workflow_id, WorkflowSignal::cancel(reason.into()))
            .await?;
        self.process_workflow(workflow_id).await?;
        Ok(())
    }

    /// Handle an activity completion reported by a worker.
    #[instrument(skip(self, result))]
    pub async fn on_activity_completed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Result<ProcessResult, ExecutorError> {
        self.advance(
            workflow_id,
            Some(Boundary::ActivityCompleted {
                activity_id: activity_id.to_string(),
                result,
            }),
        )
        .await
    }

    /// Handle an activity failure reported by a worker. Non-final failures
    /// (`will_retry`) are recorded but not applied to the workflow.
    #[instrument(skip(self, error))]
    pub async fn on_activity_failed(
        &self,
        workflow_id: Uuid,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
    ) -> Result<ProcessResult, ExecutorError> {
        if will_retry {
            let events = self.store.load_events(workflow_id).await?;
            self.store
                .append_events(
                    workflow_id,
                    events.len() as i32,
                    vec![WorkflowEvent::ActivityFailed {
                        activity_id: activity_id.to_string(),
                        error,
                        will_retry: true,
                    }],
                )
                .await?;
            return Ok(ProcessResult {
                completed: false,
                events_written: 1,
                tasks_enqueued: 0,
                signals_processed: 0,
            });
        }

        self.advance(
            workflow_id,
            Some(Boundary::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
            }),
        )
        .await
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// One processing round: rebuild state by replay, apply the boundary
    /// event (if any), deliver pending signals, persist progress, flush
    /// completion.
    async fn advance(
        &self,
        workflow_id: Uuid,
        boundary: Option<Boundary>,
    ) -> Result<ProcessResult, ExecutorError> {
        let info = self.store.get_workflow_info(workflow_id).await?;

        if info.status.is_terminal() {
            debug!(%workflow_id, status = %info.status, "workflow already terminal");
            return Ok(ProcessResult::terminal());
        }

        let events = self.store.load_events(workflow_id).await?;
        if events.is_empty() {
            return Err(ExecutorError::WorkflowNotFound(workflow_id));
        }
        if events.len() > self.config.max_events_per_workflow {
            return Err(ExecutorError::TooManyEvents(
                workflow_id,
                events.len(),
                self.config.max_events_per_workflow,
            ));
        }
        if !matches!(&events[0].1, WorkflowEvent::WorkflowStarted { .. }) {
            return Err(ExecutorError::Replay(
                "first event must be WorkflowStarted".to_string(),
            ));
        }

        // Overall deadline enforcement.
        if info.past_deadline(Utc::now()) {
            warn!(%workflow_id, "workflow deadline elapsed");
            let deadline_ms = info
                .deadline_at
                .zip(info.started_at)
                .map(|(d, s)| (d - s).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            self.store
                .append_events(
                    workflow_id,
                    events.len() as i32,
                    vec![WorkflowEvent::WorkflowTimedOut { deadline_ms }],
                )
                .await?;
            self.store
                .update_workflow_status(
                    workflow_id,
                    WorkflowStatus::TimedOut,
                    None,
                    Some(
                        WorkflowError::new("overall workflow deadline elapsed")
                            .with_code("Timeout"),
                    ),
                )
                .await?;
            return Ok(ProcessResult::terminal());
        }

        // Rebuild state. Replay discards actions: they were already
        // persisted the first time around.
        let mut workflow = self
            .registry
            .create(&info.workflow_type, info.input.clone())?;
        for (_seq, event) in &events {
            self.replay_event(&mut *workflow, event);
        }

        let mut sequence = events.len() as i32;
        let mut events_written = 0;
        let mut tasks_enqueued = 0;

        // Apply the boundary event: persist it, then run the handler and
        // persist its actions.
        if let Some(boundary) = boundary {
            let actions = match boundary {
                Boundary::ActivityCompleted {
                    activity_id,
                    result,
                } => {
                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::ActivityCompleted {
                                activity_id: activity_id.clone(),
                                result: result.clone(),
                            }],
                        )
                        .await?;
                    workflow.on_activity_completed(&activity_id, result)
                }
                Boundary::ActivityFailed { activity_id, error } => {
                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::ActivityFailed {
                                activity_id: activity_id.clone(),
                                error: error.clone(),
                                will_retry: false,
                            }],
                        )
                        .await?;
                    workflow.on_activity_failed(&activity_id, &error)
                }
            };
            events_written += 1;

            let (new_seq, written, enqueued) = self
                .process_actions_internal(workflow_id, sequence, actions)
                .await?;
            sequence = new_seq;
            events_written += written;
            tasks_enqueued += enqueued;
        }

        // Deliver pending signals, persisting each before its actions.
        let signals = self.store.get_pending_signals(workflow_id).await?;
        let signals_processed = signals.len();

        for signal in &signals {
            sequence = self
                .store
                .append_events(
                    workflow_id,
                    sequence,
                    vec![WorkflowEvent::SignalReceived {
                        signal: signal.clone(),
                    }],
                )
                .await?;
            events_written += 1;

            let actions = workflow.on_signal(signal);
            let (new_seq, written, enqueued) = self
                .process_actions_internal(workflow_id, sequence, actions)
                .await?;
            sequence = new_seq;
            events_written += written;
            tasks_enqueued += enqueued;
        }

        if signals_processed > 0 {
            self.store
                .mark_signals_processed(workflow_id, signals_processed)
                .await?;
        }

        if let Some(progress) = workflow.progress_json() {
            self.store.update_progress(workflow_id, progress).await?;
        }

        // Terminal transitions issued through actions have already updated
        // the status; only flush result/error here if the workflow says it is
        // done but the store still shows it live.
        let completed = workflow.is_completed();
        if completed {
            let status = self.store.get_workflow_status(workflow_id).await?;
            if !status.is_terminal() {
                if let Some(result) = workflow.result_json() {
                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Completed,
                            Some(result),
                            None,
                        )
                        .await?;
                } else if let Some(error) = workflow.error() {
                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Failed,
                            None,
                            Some(error),
                        )
                        .await?;
                }
            }
        }

        Ok(ProcessResult {
            completed,
            events_written,
            tasks_enqueued,
            signals_processed,
        })
    }

    fn replay_event(&self, workflow: &mut dyn AnyWorkflow, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::WorkflowStarted { .. } => {
                let _ = workflow.on_start();
            }
            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => {
                let _ = workflow.on_activity_completed(activity_id, result.clone());
            }
            WorkflowEvent::ActivityFailed {
                activity_id,
                error,
                will_retry,
            } => {
                if !will_retry {
                    let _ = workflow.on_activity_failed(activity_id, error);
                }
            }
            WorkflowEvent::SignalReceived { signal } => {
                let _ = workflow.on_signal(signal);
            }
            // Informational during replay.
            WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowFailed { .. }
            | WorkflowEvent::WorkflowCancelled { .. }
            | WorkflowEvent::WorkflowTimedOut { .. }
            | WorkflowEvent::ActivityScheduled { .. }
            | WorkflowEvent::ActivityStarted { .. } => {}
        }
    }

    async fn process_actions_internal(
        &self,
        workflow_id: Uuid,
        mut sequence: i32,
        actions: Vec<WorkflowAction>,
    ) -> Result<(i32, usize, usize), ExecutorError> {
        let mut events_written = 0;
        let mut tasks_enqueued = 0;

        for action in actions {
            match action {
                WorkflowAction::ScheduleActivity {
                    activity_id,
                    activity_type,
                    input,
                    options,
                } => {
                    debug!(%workflow_id, %activity_id, %activity_type, "scheduling activity");

                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::ActivityScheduled {
                                activity_id: activity_id.clone(),
                                activity_type: activity_type.clone(),
                                input: input.clone(),
                                options: options.clone(),
                            }],
                        )
                        .await?;
                    events_written += 1;

                    self.store
                        .enqueue_task(TaskDefinition {
                            workflow_id,
                            activity_id,
                            activity_type,
                            input,
                            options,
                        })
                        .await?;
                    tasks_enqueued += 1;
                }

                WorkflowAction::CompleteWorkflow { result } => {
                    info!(%workflow_id, "completing workflow");

                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::WorkflowCompleted {
                                result: result.clone(),
                            }],
                        )
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Completed,
                            Some(result),
                            None,
                        )
                        .await?;
                }

                WorkflowAction::FailWorkflow { error } => {
                    error!(%workflow_id, error = %error.message, "failing workflow");

                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::WorkflowFailed {
                                error: error.clone(),
                            }],
                        )
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Failed,
                            None,
                            Some(error),
                        )
                        .await?;
                }

                WorkflowAction::CancelWorkflow { reason } => {
                    info!(%workflow_id, %reason, "cancelling workflow");

                    sequence = self
                        .store
                        .append_events(
                            workflow_id,
                            sequence,
                            vec![WorkflowEvent::WorkflowCancelled {
                                reason: reason.clone(),
                            }],
                        )
                        .await?;
                    events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Cancelled,
                            None,
                            Some(WorkflowError::new(reason).with_code("Cancelled")),
                        )
                        .await?;
                }

                WorkflowAction::None => {}
            }
        }

        Ok((sequence, events_written, tasks_enqueued))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    // A small linear workflow used to exercise the executor: it schedules
    // `steps` activities one after another, then completes with the last
    // result. A cancel signal is honored at the next completion boundary.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ChainInput {
        steps: u32,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ChainOutput {
        completed_steps: u32,
    }

    struct ChainWorkflow {
        steps: u32,
        done_steps: u32,
        cancel_requested: bool,
        state: ChainState,
    }

    #[derive(PartialEq)]
    enum ChainState {
        Running,
        Completed,
        Failed(String),
        Cancelled,
    }

    impl ChainWorkflow {
        fn next_action(&mut self) -> Vec<WorkflowAction> {
            if self.cancel_requested {
                self.state = ChainState::Cancelled;
                return vec![WorkflowAction::cancel("requested")];
            }
            if self.done_steps >= self.steps {
                self.state = ChainState::Completed;
                return vec![WorkflowAction::complete(
                    json!({ "completed_steps": self.done_steps }),
                )];
            }
            vec![WorkflowAction::schedule_activity(
                format!("step-{}", self.done_steps + 1),
                "chain_step",
                json!({ "n": self.done_steps + 1 }),
            )]
        }
    }

    impl crate::workflow::Workflow for ChainWorkflow {
        const TYPE: &'static str = "chain";
        type Input = ChainInput;
        type Output = ChainOutput;

        fn new(input: Self::Input) -> Self {
            Self {
                steps: input.steps,
                done_steps: 0,
                cancel_requested: false,
                state: ChainState::Running,
            }
        }

        fn on_start(&mut self) -> Vec<WorkflowAction> {
            self.next_action()
        }

        fn on_activity_completed(
            &mut self,
            _activity_id: &str,
            _result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            self.done_steps += 1;
            self.next_action()
        }

        fn on_activity_failed(
            &mut self,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            self.state = ChainState::Failed(error.message.clone());
            vec![WorkflowAction::fail(WorkflowError::new(&error.message))]
        }

        fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
            if signal.is_cancel() {
                self.cancel_requested = true;
            }
            vec![]
        }

        fn is_completed(&self) -> bool {
            self.state != ChainState::Running
        }

        fn result(&self) -> Option<Self::Output> {
            (self.state == ChainState::Completed).then(|| ChainOutput {
                completed_steps: self.done_steps,
            })
        }

        fn error(&self) -> Option<WorkflowError> {
            match &self.state {
                ChainState::Failed(msg) => Some(WorkflowError::new(msg)),
                _ => None,
            }
        }

        fn progress(&self) -> Option<serde_json::Value> {
            Some(json!({ "done_steps": self.done_steps }))
        }
    }

    fn executor() -> WorkflowExecutor<InMemoryWorkflowEventStore> {
        let mut executor = WorkflowExecutor::new(Arc::new(InMemoryWorkflowEventStore::new()));
        executor.register::<ChainWorkflow>();
        executor
    }

    #[tokio::test]
    async fn start_schedules_and_enqueues_first_activity() {
        let executor = executor();
        let (workflow_id, run_id) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 2 })
            .await
            .unwrap();
        assert_ne!(workflow_id, run_id);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Running);
        assert_eq!(info.progress, Some(json!({ "done_steps": 0 })));
        assert_eq!(executor.store().pending_task_count(), 1);

        let events = executor.store().load_events(workflow_id).await.unwrap();
        assert!(matches!(events[0].1, WorkflowEvent::WorkflowStarted { .. }));
        assert!(matches!(events[1].1, WorkflowEvent::ActivityScheduled { .. }));
    }

    #[tokio::test]
    async fn completion_schedules_next_task_until_done() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 2 })
            .await
            .unwrap();

        let r = executor
            .on_activity_completed(workflow_id, "step-1", json!({}))
            .await
            .unwrap();
        assert!(!r.completed);
        // The follow-on activity was persisted and enqueued.
        assert_eq!(r.tasks_enqueued, 1);

        let events = executor.store().load_events(workflow_id).await.unwrap();
        let scheduled: Vec<_> = events
            .iter()
            .filter_map(|(_, e)| match e {
                WorkflowEvent::ActivityScheduled { activity_id, .. } => Some(activity_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec!["step-1", "step-2"]);

        let r = executor
            .on_activity_completed(workflow_id, "step-2", json!({}))
            .await
            .unwrap();
        assert!(r.completed);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Completed);
        assert_eq!(info.result, Some(json!({ "completed_steps": 2 })));
        assert!(info.finished_at.is_some());
    }

    #[tokio::test]
    async fn immediate_completion() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 0 })
            .await
            .unwrap();

        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn final_activity_failure_fails_workflow() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 3 })
            .await
            .unwrap();

        let error = ActivityError::non_retryable("step exploded").with_type("PermanentExternal");
        let r = executor
            .on_activity_failed(workflow_id, "step-1", error, false)
            .await
            .unwrap();
        assert!(r.completed);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Failed);
        assert_eq!(info.error.unwrap().message, "step exploded");
    }

    #[tokio::test]
    async fn retryable_failure_does_not_reach_workflow() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 3 })
            .await
            .unwrap();

        let error = ActivityError::retryable("flaky");
        let r = executor
            .on_activity_failed(workflow_id, "step-1", error, true)
            .await
            .unwrap();
        assert!(!r.completed);

        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn cancellation_at_activity_boundary() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 5 })
            .await
            .unwrap();

        executor
            .request_cancellation(workflow_id, "user asked")
            .await
            .unwrap();

        // Signal observed but workflow still running until the boundary.
        let status = executor.store().get_workflow_status(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Running);

        // In-flight activity completes; its output is captured, then the
        // workflow transitions.
        let r = executor
            .on_activity_completed(workflow_id, "step-1", json!({}))
            .await
            .unwrap();
        assert!(r.completed);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::Cancelled);
        assert!(info.finished_at.is_some());

        let events = executor.store().load_events(workflow_id).await.unwrap();
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::ActivityCompleted { .. })));
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::WorkflowCancelled { .. })));
    }

    #[tokio::test]
    async fn cannot_signal_terminal_workflow() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 0 })
            .await
            .unwrap();

        let result = executor
            .send_signal(workflow_id, WorkflowSignal::cancel("late"))
            .await;
        assert!(matches!(result, Err(ExecutorError::WorkflowTerminal(_))));
    }

    #[tokio::test]
    async fn deadline_elapsed_times_out_workflow() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let mut executor = WorkflowExecutor::with_config(
            store,
            ExecutorConfig {
                max_events_per_workflow: 10_000,
                default_workflow_timeout: Some(Duration::ZERO),
            },
        );
        executor.register::<ChainWorkflow>();

        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 5 })
            .await
            .unwrap();

        let r = executor.process_workflow(workflow_id).await.unwrap();
        assert!(r.completed);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, WorkflowStatus::TimedOut);
        assert_eq!(info.error.unwrap().code.as_deref(), Some("Timeout"));

        let events = executor.store().load_events(workflow_id).await.unwrap();
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::WorkflowTimedOut { .. })));
    }

    #[tokio::test]
    async fn replay_is_stable_after_completion() {
        let executor = executor();
        let (workflow_id, _) = executor
            .start_workflow::<ChainWorkflow>(ChainInput { steps: 1 })
            .await
            .unwrap();

        executor
            .on_activity_completed(workflow_id, "step-1", json!({}))
            .await
            .unwrap();

        // Processing again replays the full log and lands in the same state.
        let r = executor.process_workflow(workflow_id).await.unwrap();
        assert!(r.completed);
        assert_eq!(r.events_written, 0);
    }
}
