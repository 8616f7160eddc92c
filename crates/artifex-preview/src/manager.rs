//! Session lifecycle: creation, resolution, revocation, sweeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::session::{PreviewSession, Resolution};
use crate::store::{SessionError, SessionStore};

/// Token length: 16 alphanumeric characters ≈ 95 bits of entropy.
const TOKEN_LEN: usize = 16;

/// Collision retries before giving up (collisions are astronomically rare;
/// this guards against a broken RNG or a poisoned table).
const MAX_COLLISION_RETRIES: usize = 4;

/// Default TTL when the caller passes none: 60 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Manages preview sessions over a [`SessionStore`].
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    default_ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Override the default TTL (from `PREVIEW_DEFAULT_TTL`).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Default TTL from `PREVIEW_DEFAULT_TTL` (seconds or `45m`/`2h` forms),
    /// falling back to 60 minutes.
    pub fn from_env(store: Arc<dyn SessionStore>) -> Self {
        let ttl = std::env::var("PREVIEW_DEFAULT_TTL")
            .ok()
            .and_then(|v| parse_duration(&v))
            .unwrap_or(DEFAULT_TTL);
        Self::new(store).with_default_ttl(ttl)
    }

    /// Create a session for a workflow. `ttl = None` uses the default;
    /// a zero TTL is invalid input.
    #[instrument(skip(self, metadata))]
    pub async fn create_session(
        &self,
        workflow_id: Uuid,
        ttl: Option<Duration>,
        metadata: serde_json::Value,
    ) -> Result<PreviewSession, SessionError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(SessionError::InvalidInput(
                "session ttl must be positive".into(),
            ));
        }

        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        for attempt in 0..MAX_COLLISION_RETRIES {
            let session = PreviewSession {
                id: generate_token(),
                workflow_id,
                created_at: now,
                expires_at,
                access_count: 0,
                last_accessed_at: None,
                metadata: metadata.clone(),
            };

            match self.store.insert(session.clone()).await {
                Ok(()) => {
                    info!(id = %session.id, %workflow_id, "created preview session");
                    return Ok(session);
                }
                Err(SessionError::IdCollision(_)) => {
                    warn!(attempt, "preview token collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::Storage(
            "could not allocate a unique session id".into(),
        ))
    }

    /// Resolve a session id, counting the access on a hit.
    #[instrument(skip(self))]
    pub async fn resolve(&self, id: &str) -> Result<Resolution, SessionError> {
        let now = Utc::now();
        if let Some(session) = self.store.record_access(id, now).await? {
            return Ok(Resolution::Active(session));
        }
        // Distinguish expired from unknown for the caller.
        match self.store.get(id).await? {
            Some(_) => Ok(Resolution::Expired),
            None => Ok(Resolution::NotFound),
        }
    }

    /// Resolve the most recent live session for a workflow (direct preview
    /// URLs).
    pub async fn resolve_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<PreviewSession>, SessionError> {
        self.store.find_by_workflow(workflow_id, Utc::now()).await
    }

    /// Revoke a session immediately.
    #[instrument(skip(self))]
    pub async fn revoke(&self, id: &str) -> Result<bool, SessionError> {
        let revoked = self.store.expire_now(id, Utc::now()).await?;
        if revoked {
            info!(id, "revoked preview session");
        }
        Ok(revoked)
    }

    /// Remove expired sessions once.
    pub async fn sweep_once(&self) -> Result<u64, SessionError> {
        self.store.sweep(Utc::now()).await
    }

    /// Spawn the background sweeper. The handle aborts the loop on drop.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match manager.sweep_once().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "swept expired preview sessions"),
                    Err(e) => warn!(error = %e, "preview sweep failed"),
                }
            }
        });
        SweeperHandle { handle }
    }
}

/// Aborts the sweep loop when dropped.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Accepts `90`, `90s`, `45m`, `2h`.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (number, unit) = value.split_at(value.len().checked_sub(1)?);
    let number: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}
