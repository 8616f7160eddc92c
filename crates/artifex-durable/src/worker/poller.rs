//! Task polling with adaptive backoff
//!
//! Claims tasks from the queue, stretching the poll interval while idle and
//! snapping back to the minimum as soon as work appears.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::persistence::{ClaimedTask, StoreError, WorkflowEventStore};

/// Polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Poll interval while tasks are flowing.
    #[serde(with = "crate::workflow::action::duration_millis")]
    pub min_interval: Duration,

    /// Poll interval ceiling while idle.
    #[serde(with = "crate::workflow::action::duration_millis")]
    pub max_interval: Duration,

    /// Interval multiplier applied on each empty poll.
    pub backoff_multiplier: f64,

    /// Maximum tasks claimed per poll.
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Claims tasks with adaptive backoff.
pub struct TaskPoller<S: WorkflowEventStore> {
    store: Arc<S>,
    worker_id: String,
    activity_types: Vec<String>,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: WorkflowEventStore> TaskPoller<S> {
    pub fn new(
        store: Arc<S>,
        worker_id: String,
        activity_types: Vec<String>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            worker_id,
            activity_types,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Claim up to `max_tasks` tasks, updating the backoff state.
    pub async fn poll(&mut self, max_tasks: usize) -> Result<Vec<ClaimedTask>, StoreError> {
        if self.is_shutdown() {
            return Ok(vec![]);
        }

        let batch = max_tasks.min(self.config.batch_size);
        let tasks = self
            .store
            .claim_tasks(&self.worker_id, &self.activity_types, batch)
            .await?;

        if tasks.is_empty() {
            self.current_interval = Duration::from_secs_f64(
                (self.current_interval.as_secs_f64() * self.config.backoff_multiplier)
                    .min(self.config.max_interval.as_secs_f64()),
            );
            trace!(
                interval_ms = self.current_interval.as_millis(),
                "no tasks, backing off"
            );
        } else {
            self.current_interval = self.config.min_interval;
            debug!(count = tasks.len(), "claimed tasks");
        }

        Ok(tasks)
    }

    /// Sleep for the current interval. Returns true if shutdown was signalled
    /// while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryWorkflowEventStore, TaskDefinition};
    use crate::workflow::ActivityOptions;
    use uuid::Uuid;

    #[tokio::test]
    async fn poll_claims_and_resets_backoff() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let (_tx, rx) = watch::channel(false);
        let mut poller = TaskPoller::new(
            store.clone(),
            "w1".into(),
            vec![],
            PollerConfig::default(),
            rx,
        );

        // Empty poll grows the interval.
        assert!(poller.poll(5).await.unwrap().is_empty());
        assert!(poller.current_interval > poller.config.min_interval);

        store
            .enqueue_task(TaskDefinition {
                workflow_id: Uuid::now_v7(),
                activity_id: "a-1".into(),
                activity_type: "noop".into(),
                input: serde_json::json!({}),
                options: ActivityOptions::default(),
            })
            .await
            .unwrap();

        let tasks = poller.poll(5).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(poller.current_interval, poller.config.min_interval);
    }

    #[tokio::test]
    async fn shutdown_stops_polling() {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let (tx, rx) = watch::channel(false);
        let mut poller = TaskPoller::new(
            store,
            "w1".into(),
            vec![],
            PollerConfig::default(),
            rx,
        );

        tx.send(true).unwrap();
        assert!(poller.is_shutdown());
        assert!(poller.poll(5).await.unwrap().is_empty());
    }
}
