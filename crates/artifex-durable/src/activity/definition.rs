//! Activity trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;

/// Error returned by a failed activity attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    pub message: String,

    /// Error kind for programmatic handling; see
    /// [`error_types`](super::error_types) for the shared vocabulary.
    pub error_type: Option<String>,

    /// Whether another attempt may succeed. Non-retryable errors fail the
    /// activity immediately regardless of remaining attempts.
    pub retryable: bool,

    /// Structured diagnostics (per-provider failure logs, attempt counts).
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// A unit of work scheduled by a workflow and executed by a worker.
///
/// Activities own every non-deterministic operation in the system: provider
/// calls, ledger writes, clock reads. They must be idempotent under replay —
/// executing twice with the same input must converge on the same persisted
/// outcome (the ledger's content-idempotent versioning does the heavy
/// lifting there).
///
/// Long-running activities should check `ctx.is_cancelled()` at loop
/// boundaries and give up promptly.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Unique type identifier, used to route tasks to handlers.
    const TYPE: &'static str;

    type Input: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt.
    ///
    /// Return [`ActivityError::retryable`] for transient failures and
    /// [`ActivityError::non_retryable`] for permanent ones.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_error() {
        let error = ActivityError::retryable("provider timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "provider timeout");
    }

    #[test]
    fn non_retryable_error() {
        let error = ActivityError::non_retryable("bad request shape");
        assert!(!error.retryable);
    }

    #[test]
    fn error_with_type_and_details() {
        let error = ActivityError::retryable("all candidates exhausted")
            .with_type(crate::activity::error_types::ALL_PROVIDERS_FAILED)
            .with_details(serde_json::json!({"attempted": ["openai", "anthropic"]}));

        assert_eq!(error.error_type.as_deref(), Some("AllProvidersFailed"));
        assert!(error.details.is_some());
    }

    #[test]
    fn error_serialization_round_trips() {
        let error = ActivityError::retryable("boom").with_type("TransientExternal");
        let json = serde_json::to_string(&error).unwrap();
        let parsed: ActivityError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, parsed);
    }
}
