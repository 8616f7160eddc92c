//! SessionStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::session::PreviewSession;

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// TTL or other parameter rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Insert hit an existing id; the manager regenerates and retries.
    #[error("session id collision: {0}")]
    IdCollision(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence for preview sessions.
///
/// Single-writer-per-session semantics: access accounting uses a
/// conditional update keyed on `id`, inserts rely on the unique id
/// constraint.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Insert a new session. Fails with [`SessionError::IdCollision`] if the
    /// id is taken.
    async fn insert(&self, session: PreviewSession) -> Result<(), SessionError>;

    /// Fetch a session regardless of expiry.
    async fn get(&self, id: &str) -> Result<Option<PreviewSession>, SessionError>;

    /// Conditionally bump `access_count` / `last_accessed_at` for a live
    /// session. Returns the updated session, or None if the id is missing or
    /// expired as of `now`.
    async fn record_access(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError>;

    /// Set `expires_at` to `now` (revocation).
    async fn expire_now(&self, id: &str, now: DateTime<Utc>) -> Result<bool, SessionError>;

    /// Delete sessions expired as of `now`. Returns how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, SessionError>;

    /// Most recent live session for a workflow, if any.
    async fn find_by_workflow(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError>;
}
