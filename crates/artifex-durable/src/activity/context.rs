//! Activity execution context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Context handed to an activity for one execution attempt.
///
/// Carries attempt bookkeeping, the attempt deadline, and a cancellation
/// flag. Workers flip the flag when the owning workflow is being cancelled so
/// long activities can stop at their next loop boundary.
#[derive(Debug)]
pub struct ActivityContext {
    /// Unique id for this attempt.
    pub attempt_id: Uuid,

    /// 1-based attempt counter.
    pub attempt: u32,

    /// Maximum attempts allowed by the retry policy.
    pub max_attempts: u32,

    /// Owning workflow.
    pub workflow_id: Uuid,

    /// Activity id within the workflow.
    pub activity_id: String,

    /// Hard deadline for this attempt.
    pub deadline: DateTime<Utc>,

    cancelled: Arc<AtomicBool>,
}

impl ActivityContext {
    pub fn new(
        workflow_id: Uuid,
        activity_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            attempt,
            max_attempts,
            workflow_id,
            activity_id: activity_id.into(),
            deadline: Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that can flip the cancellation flag from another task.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Whether this is the final attempt under the retry policy.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Time remaining before the attempt deadline, zero if past it.
    pub fn remaining(&self) -> Duration {
        (self.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Flips an activity's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
