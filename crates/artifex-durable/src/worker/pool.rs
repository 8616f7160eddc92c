//! Worker pool for activity execution
//!
//! Claims tasks, runs registered handlers under a concurrency limit, applies
//! attempt timeouts, and reports outcomes back to the executor so the owning
//! workflow advances.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{PollerConfig, TaskPoller};
use crate::activity::{error_types, Activity, ActivityContext, ActivityError};
use crate::engine::WorkflowExecutor;
use crate::persistence::{ClaimedTask, StoreError, TaskFailureOutcome, WorkflowEventStore};
use crate::workflow::WorkflowEvent;

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker id (generated if not provided).
    pub worker_id: String,

    /// Activity types this worker handles. Empty = all registered types.
    pub activity_types: Vec<String>,

    /// Maximum concurrent task executions.
    pub max_concurrency: usize,

    pub poller: PollerConfig,

    /// How often stale claims are swept back onto the queue.
    #[serde(with = "crate::workflow::action::duration_millis")]
    pub stale_reclaim_interval: Duration,

    /// Graceful shutdown budget.
    #[serde(with = "crate::workflow::action::duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            activity_types: vec![],
            max_concurrency: 10,
            poller: PollerConfig::default(),
            stale_reclaim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(activity_types: Vec<String>) -> Self {
        Self {
            activity_types,
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    #[error("no handler registered for activity type: {0}")]
    HandlerNotFound(String),
}

/// Result of one activity attempt.
pub type ActivityResult = Result<serde_json::Value, ActivityError>;

/// Type-erased activity handler.
pub type ActivityHandler = Arc<
    dyn Fn(
            Arc<ActivityContext>,
            serde_json::Value,
        ) -> Pin<Box<dyn std::future::Future<Output = ActivityResult> + Send>>
        + Send
        + Sync,
>;

/// Executes claimed tasks through registered handlers.
pub struct WorkerPool<S: WorkflowEventStore> {
    executor: Arc<WorkflowExecutor<S>>,
    config: WorkerPoolConfig,
    handlers: parking_lot::RwLock<HashMap<String, ActivityHandler>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    active_tasks: Arc<Semaphore>,
    poll_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    reclaim_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowEventStore> WorkerPool<S> {
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            executor,
            active_tasks: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            handlers: parking_lot::RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            poll_handle: parking_lot::Mutex::new(None),
            reclaim_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Register a raw handler closure for an activity type.
    pub fn register_handler<F, Fut>(&self, activity_type: &str, handler: F)
    where
        F: Fn(Arc<ActivityContext>, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ActivityResult> + Send + 'static,
    {
        let handler: ActivityHandler = Arc::new(move |ctx, input| Box::pin(handler(ctx, input)));
        self.handlers
            .write()
            .insert(activity_type.to_string(), handler);
    }

    /// Register an [`Activity`] implementation. Wraps input/output
    /// (de)serialization around the typed `execute`.
    pub fn register_activity<A: Activity>(&self, activity: A) {
        let activity = Arc::new(activity);
        self.register_handler(A::TYPE, move |ctx, input| {
            let activity = activity.clone();
            async move {
                let typed: A::Input = serde_json::from_value(input).map_err(|e| {
                    ActivityError::non_retryable(format!("invalid activity input: {e}"))
                        .with_type(error_types::INVALID_INPUT)
                })?;
                let output = activity.execute(&ctx, typed).await?;
                serde_json::to_value(output).map_err(|e| {
                    ActivityError::non_retryable(format!("unserializable activity output: {e}"))
                })
            }
        });
    }

    /// Registered activity types.
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Start the polling and reclamation loops.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        if self.poll_handle.lock().is_some() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            activity_types = ?self.effective_activity_types(),
            "starting worker pool"
        );

        *self.poll_handle.lock() = Some(self.spawn_poll_loop());
        *self.reclaim_handle.lock() = Some(self.spawn_reclaim_loop());
        Ok(())
    }

    /// Drain in-flight tasks and stop.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            if self.active_tasks.available_permits() == self.config.max_concurrency {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    in_flight = self.config.max_concurrency - self.active_tasks.available_permits(),
                    "shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Some(handle) = self.poll_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.reclaim_handle.lock().take() {
            handle.abort();
        }

        info!("worker pool stopped");
        Ok(())
    }

    /// Run every currently claimable task to completion, then return.
    ///
    /// Drives workflows without the background loops; used by tests and by
    /// single-process setups that want deterministic turn-taking.
    pub async fn drain(&self) -> Result<usize, WorkerPoolError> {
        let types = self.effective_activity_types();
        let mut executed = 0;
        loop {
            let tasks = self
                .executor
                .store()
                .claim_tasks(&self.config.worker_id, &types, self.config.max_concurrency)
                .await?;
            if tasks.is_empty() {
                return Ok(executed);
            }
            for task in tasks {
                self.execute_task(task).await;
                executed += 1;
            }
        }
    }

    /// Claim and execute at most one task. Returns whether a task ran.
    ///
    /// Used by tests that need to stop the pipeline between stages (for
    /// example to deliver a cancellation signal at a precise boundary).
    pub async fn drain_one(&self) -> Result<bool, WorkerPoolError> {
        let types = self.effective_activity_types();
        let tasks = self
            .executor
            .store()
            .claim_tasks(&self.config.worker_id, &types, 1)
            .await?;
        match tasks.into_iter().next() {
            Some(task) => {
                self.execute_task(task).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn effective_activity_types(&self) -> Vec<String> {
        if self.config.activity_types.is_empty() {
            self.registered_types()
        } else {
            self.config.activity_types.clone()
        }
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let config = self.config.clone();
        let handlers = self.handlers.read().clone();
        let active_tasks = self.active_tasks.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let types = self.effective_activity_types();

        tokio::spawn(async move {
            let mut poller = TaskPoller::new(
                executor.store().clone(),
                config.worker_id.clone(),
                types,
                config.poller.clone(),
                shutdown_rx,
            );

            loop {
                if poller.is_shutdown() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                let free = active_tasks.available_permits();
                if free == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                let tasks = match poller.poll(free).await {
                    Ok(tasks) => tasks,
                    Err(e) => {
                        error!(error = %e, "task poll failed");
                        if poller.wait().await {
                            break;
                        }
                        continue;
                    }
                };

                for task in tasks {
                    let permit = match active_tasks.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    let executor = executor.clone();
                    let handlers = handlers.clone();
                    let worker_id = config.worker_id.clone();

                    tokio::spawn(async move {
                        run_task(executor, handlers, worker_id, task).await;
                        drop(permit);
                    });
                }

                if poller.wait().await {
                    break;
                }
            }
        })
    }

    fn spawn_reclaim_loop(&self) -> JoinHandle<()> {
        let store = self.executor.store().clone();
        let interval = self.config.stale_reclaim_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }

                match store.reclaim_stale_tasks().await {
                    Ok(ids) if !ids.is_empty() => {
                        warn!(count = ids.len(), "requeued stale task claims");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "stale task reclamation failed"),
                }
            }
        })
    }

    async fn execute_task(&self, task: ClaimedTask) {
        let handlers = self.handlers.read().clone();
        run_task(
            self.executor.clone(),
            handlers,
            self.config.worker_id.clone(),
            task,
        )
        .await;
    }
}

/// Execute one claimed task end to end: record the start, run the handler
/// under its attempt timeout, and report the outcome.
async fn run_task<S: WorkflowEventStore>(
    executor: Arc<WorkflowExecutor<S>>,
    handlers: HashMap<String, ActivityHandler>,
    worker_id: String,
    task: ClaimedTask,
) {
    let store = executor.store().clone();

    let ctx = Arc::new(ActivityContext::new(
        task.workflow_id,
        task.activity_id.clone(),
        task.attempt,
        task.max_attempts,
        task.options.start_to_close_timeout,
    ));

    record_started(&store, &task, &worker_id).await;

    let outcome = match handlers.get(&task.activity_type) {
        Some(handler) => {
            let fut = handler(ctx.clone(), task.input.clone());
            match tokio::time::timeout(task.options.start_to_close_timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::retryable(format!(
                    "activity attempt exceeded {}ms",
                    task.options.start_to_close_timeout.as_millis()
                ))
                .with_type(error_types::TIMEOUT)),
            }
        }
        None => Err(ActivityError::non_retryable(format!(
            "no handler for activity type {}",
            task.activity_type
        ))),
    };

    match outcome {
        Ok(output) => {
            if let Err(e) = store.complete_task(task.id, output.clone()).await {
                error!(task_id = %task.id, error = %e, "failed to complete task");
                return;
            }
            if let Err(e) = executor
                .on_activity_completed(task.workflow_id, &task.activity_id, output)
                .await
            {
                error!(workflow_id = %task.workflow_id, error = %e, "workflow processing failed");
            }
        }
        Err(activity_error) => {
            let outcome = match store.fail_task(task.id, &activity_error).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "failed to record task failure");
                    return;
                }
            };

            let will_retry = matches!(outcome, TaskFailureOutcome::WillRetry { .. });
            debug!(
                task_id = %task.id,
                will_retry,
                error = %activity_error.message,
                "activity attempt failed"
            );

            if let Err(e) = executor
                .on_activity_failed(task.workflow_id, &task.activity_id, activity_error, will_retry)
                .await
            {
                error!(workflow_id = %task.workflow_id, error = %e, "workflow processing failed");
            }
        }
    }
}

/// Best-effort ActivityStarted marker. Appends race with the executor; a
/// couple of conflict retries is enough and losing the marker is harmless.
async fn record_started<S: WorkflowEventStore>(store: &Arc<S>, task: &ClaimedTask, worker_id: &str) {
    for _ in 0..3 {
        let Ok(events) = store.load_events(task.workflow_id).await else {
            return;
        };
        let event = WorkflowEvent::ActivityStarted {
            activity_id: task.activity_id.clone(),
            attempt: task.attempt,
            worker_id: worker_id.to_string(),
        };
        match store
            .append_events(task.workflow_id, events.len() as i32, vec![event])
            .await
        {
            Ok(_) => return,
            Err(StoreError::ConcurrencyConflict { .. }) => continue,
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowEventStore;
    use crate::workflow::{Workflow, WorkflowAction, WorkflowError};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct DoubleInput {
        value: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct DoubleOutput {
        value: i64,
    }

    struct DoubleActivity;

    #[async_trait]
    impl Activity for DoubleActivity {
        const TYPE: &'static str = "double";
        type Input = DoubleInput;
        type Output = DoubleOutput;

        async fn execute(
            &self,
            _ctx: &ActivityContext,
            input: Self::Input,
        ) -> Result<Self::Output, ActivityError> {
            Ok(DoubleOutput {
                value: input.value * 2,
            })
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OneShotInput {
        value: i64,
    }

    struct OneShotWorkflow {
        value: i64,
        result: Option<i64>,
        failed: Option<String>,
    }

    impl Workflow for OneShotWorkflow {
        const TYPE: &'static str = "one_shot";
        type Input = OneShotInput;
        type Output = serde_json::Value;

        fn new(input: Self::Input) -> Self {
            Self {
                value: input.value,
                result: None,
                failed: None,
            }
        }

        fn on_start(&mut self) -> Vec<WorkflowAction> {
            vec![WorkflowAction::schedule_activity(
                "double-1",
                "double",
                json!({ "value": self.value }),
            )]
        }

        fn on_activity_completed(
            &mut self,
            _activity_id: &str,
            result: serde_json::Value,
        ) -> Vec<WorkflowAction> {
            let value = result.get("value").and_then(|v| v.as_i64()).unwrap_or(0);
            self.result = Some(value);
            vec![WorkflowAction::complete(json!({ "value": value }))]
        }

        fn on_activity_failed(
            &mut self,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            self.failed = Some(error.message.clone());
            vec![WorkflowAction::fail(WorkflowError::new(&error.message))]
        }

        fn is_completed(&self) -> bool {
            self.result.is_some() || self.failed.is_some()
        }

        fn result(&self) -> Option<Self::Output> {
            self.result.map(|v| json!({ "value": v }))
        }
    }

    fn setup() -> (
        Arc<WorkflowExecutor<InMemoryWorkflowEventStore>>,
        WorkerPool<InMemoryWorkflowEventStore>,
    ) {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<OneShotWorkflow>();
        let executor = Arc::new(executor);
        let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::default());
        pool.register_activity(DoubleActivity);
        (executor, pool)
    }

    #[tokio::test]
    async fn drain_runs_activity_and_completes_workflow() {
        let (executor, pool) = setup();
        let (workflow_id, _) = executor
            .start_workflow::<OneShotWorkflow>(OneShotInput { value: 21 })
            .await
            .unwrap();

        let executed = pool.drain().await.unwrap();
        assert_eq!(executed, 1);

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, crate::WorkflowStatus::Completed);
        assert_eq!(info.result, Some(json!({ "value": 42 })));
    }

    #[tokio::test]
    async fn missing_handler_fails_the_workflow() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<OneShotWorkflow>();
        let executor = Arc::new(executor);
        // No activity registered at all.
        let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::new(vec!["double".into()]));

        let (workflow_id, _) = executor
            .start_workflow::<OneShotWorkflow>(OneShotInput { value: 1 })
            .await
            .unwrap();

        pool.drain().await.unwrap();

        let info = executor.store().get_workflow_info(workflow_id).await.unwrap();
        assert_eq!(info.status, crate::WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn started_marker_lands_in_event_log() {
        let (executor, pool) = setup();
        let (workflow_id, _) = executor
            .start_workflow::<OneShotWorkflow>(OneShotInput { value: 3 })
            .await
            .unwrap();

        pool.drain().await.unwrap();

        let events = executor.store().load_events(workflow_id).await.unwrap();
        assert!(events
            .iter()
            .any(|(_, e)| matches!(e, WorkflowEvent::ActivityStarted { attempt: 1, .. })));
    }
}
