//! Workflow actions and activity scheduling options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::reliability::RetryPolicy;

/// Commands a workflow can issue in response to events.
///
/// Each action is persisted as a [`WorkflowEvent`](super::WorkflowEvent)
/// before it is carried out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Schedule an activity for execution on the task queue.
    ScheduleActivity {
        /// Unique identifier for this activity within the workflow.
        activity_id: String,

        /// Activity type, used to look up the handler in the worker.
        activity_type: String,

        /// Input payload (JSON).
        input: serde_json::Value,

        /// Retry and timeout options.
        options: ActivityOptions,
    },

    /// Complete the workflow successfully.
    CompleteWorkflow { result: serde_json::Value },

    /// Fail the workflow.
    FailWorkflow { error: WorkflowError },

    /// Cancel the workflow cooperatively. Issued by the workflow itself at an
    /// activity boundary after a cancel signal was observed.
    CancelWorkflow { reason: String },

    /// No action (event handling produced no new work).
    None,
}

impl WorkflowAction {
    /// Schedule an activity with default options.
    pub fn schedule_activity(
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ScheduleActivity {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
            options: ActivityOptions::default(),
        }
    }

    /// Schedule an activity with explicit options.
    pub fn schedule_with_options(
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Self {
        Self::ScheduleActivity {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
            options,
        }
    }

    pub fn complete(result: serde_json::Value) -> Self {
        Self::CompleteWorkflow { result }
    }

    pub fn fail(error: WorkflowError) -> Self {
        Self::FailWorkflow { error }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::CancelWorkflow {
            reason: reason.into(),
        }
    }
}

/// Options controlling how an activity is executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy applied by the task queue.
    pub retry_policy: RetryPolicy,

    /// Maximum time a task may sit unclaimed before it is considered lost.
    #[serde(with = "duration_millis")]
    pub schedule_to_start_timeout: Duration,

    /// Maximum time a single attempt may run. Claims older than this are
    /// reclaimed and count as a failed attempt.
    #[serde(with = "duration_millis")]
    pub start_to_close_timeout: Duration,

    /// Higher values are claimed first.
    pub priority: i32,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            schedule_to_start_timeout: Duration::from_secs(60),
            start_to_close_timeout: Duration::from_secs(300),
            priority: 0,
        }
    }
}

impl ActivityOptions {
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = timeout;
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Serde support for Duration (as milliseconds)
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_activity_action() {
        let action = WorkflowAction::schedule_activity(
            "enhance-1",
            "prompt_enhancement",
            json!({"prompt": "build a todo app"}),
        );

        match action {
            WorkflowAction::ScheduleActivity {
                activity_id,
                activity_type,
                input,
                ..
            } => {
                assert_eq!(activity_id, "enhance-1");
                assert_eq!(activity_type, "prompt_enhancement");
                assert_eq!(input, json!({"prompt": "build a todo app"}));
            }
            _ => panic!("expected ScheduleActivity"),
        }
    }

    #[test]
    fn action_serialization_round_trips() {
        let action = WorkflowAction::ScheduleActivity {
            activity_id: "s1".to_string(),
            activity_type: "noop".to_string(),
            input: json!({}),
            options: ActivityOptions::default().with_priority(3),
        };

        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"type\":\"schedule_activity\""));

        let parsed: WorkflowAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, parsed);
    }

    #[test]
    fn cancel_action() {
        let action = WorkflowAction::cancel("caller requested");
        assert!(matches!(action, WorkflowAction::CancelWorkflow { .. }));
    }

    #[test]
    fn options_builder() {
        let options = ActivityOptions::default()
            .with_start_to_close_timeout(Duration::from_secs(120))
            .with_priority(5);

        assert_eq!(options.start_to_close_timeout, Duration::from_secs(120));
        assert_eq!(options.priority, 5);
    }
}
