//! Activity abstractions: the retryable unit-of-work trait and its execution
//! context.

mod context;
mod definition;

pub use context::{ActivityContext, CancellationHandle};
pub use definition::{Activity, ActivityError};

/// Well-known `error_type` values shared across the pipeline.
///
/// These feed two mechanisms: retry policies match them against their
/// non-retryable list, and workflows surface them in terminal error drops.
pub mod error_types {
    /// Submission or activity input was malformed. Never retried.
    pub const INVALID_INPUT: &str = "InvalidInput";

    /// Upstream hiccup (5xx, timeout, connection reset, store contention).
    pub const TRANSIENT_EXTERNAL: &str = "TransientExternal";

    /// Upstream rejected the request permanently (auth, quota, shape).
    pub const PERMANENT_EXTERNAL: &str = "PermanentExternal";

    /// Generated content failed post-conditions.
    pub const VALIDATION_FAILURE: &str = "ValidationFailure";

    /// Every eligible provider was exhausted.
    pub const ALL_PROVIDERS_FAILED: &str = "AllProvidersFailed";

    /// A deadline elapsed.
    pub const TIMEOUT: &str = "Timeout";

    /// Cooperative cancellation.
    pub const CANCELLED: &str = "Cancelled";
}
