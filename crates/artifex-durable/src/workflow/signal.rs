//! External signals delivered to running workflows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A signal sent to a running workflow from outside.
///
/// Signals are queued in the store and handed to the workflow the next time
/// it is processed. Cancellation is the main use: the workflow records the
/// request and performs the actual transition at its next activity boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSignal {
    pub signal_type: String,

    pub payload: serde_json::Value,

    pub sent_at: DateTime<Utc>,
}

impl WorkflowSignal {
    pub fn new(signal_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            signal_type: signal_type.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Request cooperative cancellation.
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::new(
            signal_types::CANCEL,
            serde_json::json!({ "reason": reason.into() }),
        )
    }

    pub fn is_cancel(&self) -> bool {
        self.signal_type == signal_types::CANCEL
    }

    /// The cancellation reason, if present in the payload.
    pub fn cancel_reason(&self) -> Option<&str> {
        self.payload.get("reason").and_then(|v| v.as_str())
    }
}

/// Common signal type constants
pub mod signal_types {
    /// Request workflow cancellation at the next activity boundary.
    pub const CANCEL: &str = "cancel";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signal() {
        let signal = WorkflowSignal::cancel("user closed the tab");
        assert!(signal.is_cancel());
        assert_eq!(signal.cancel_reason(), Some("user closed the tab"));
    }

    #[test]
    fn custom_signal_is_not_cancel() {
        let signal = WorkflowSignal::new("pause", serde_json::json!({}));
        assert!(!signal.is_cancel());
        assert_eq!(signal.cancel_reason(), None);
    }

    #[test]
    fn signal_serialization() {
        let signal = WorkflowSignal::cancel("test");
        let json = serde_json::to_string(&signal).unwrap();
        let parsed: WorkflowSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(signal.signal_type, parsed.signal_type);
        assert_eq!(signal.payload, parsed.payload);
    }
}
