//! Preview session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shareable, TTL-bounded preview handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewSession {
    /// Short URL-safe token. 16 alphanumeric characters ≈ 95 bits of
    /// entropy, comfortably past the guessing bar.
    pub id: String,

    pub workflow_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    pub access_count: i64,

    pub last_accessed_at: Option<DateTime<Utc>>,

    pub metadata: serde_json::Value,
}

impl PreviewSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of resolving a session id.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Live session; access has been counted.
    Active(PreviewSession),

    /// The id exists but the session is past its expiry.
    Expired,

    /// No such id.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let session = PreviewSession {
            id: "abc123".into(),
            workflow_id: Uuid::now_v7(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            access_count: 0,
            last_accessed_at: None,
            metadata: serde_json::json!({}),
        };

        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + chrono::Duration::seconds(61)));
        // Boundary: exactly at expiry counts as expired.
        assert!(session.is_expired(session.expires_at));
    }
}
