//! In-memory session store for tests and single-process development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::session::PreviewSession;
use crate::store::{SessionError, SessionStore};

/// In-memory implementation of [`SessionStore`].
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, PreviewSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: PreviewSession) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(SessionError::IdCollision(session.id));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PreviewSession>, SessionError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn record_access(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired(now) => {
                session.access_count += 1;
                session.last_accessed_at = Some(now);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_now(&self, id: &str, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) => {
                session.expires_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }

    async fn find_by_workflow(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| s.workflow_id == workflow_id && !s.is_expired(now))
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}
