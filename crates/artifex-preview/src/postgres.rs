//! PostgreSQL implementation of SessionStore

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::session::PreviewSession;
use crate::store::{SessionError, SessionStore};

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the session store's forward-only migrations.
    pub async fn migrate(pool: &PgPool) -> Result<(), SessionError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> PreviewSession {
        PreviewSession {
            id: row.get("id"),
            workflow_id: row.get("workflow_id"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            access_count: row.get("access_count"),
            last_accessed_at: row.get("last_accessed_at"),
            metadata: row.get("metadata"),
        }
    }
}

fn db_err(e: sqlx::Error) -> SessionError {
    SessionError::Storage(e.to_string())
}

const COLUMNS: &str = "id, workflow_id, created_at, expires_at, access_count, last_accessed_at, metadata";

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, session), fields(id = %session.id))]
    async fn insert(&self, session: PreviewSession) -> Result<(), SessionError> {
        let result = sqlx::query(
            r#"
            INSERT INTO preview_sessions
                (id, workflow_id, created_at, expires_at, access_count, last_accessed_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&session.id)
        .bind(session.workflow_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.access_count)
        .bind(session.last_accessed_at)
        .bind(&session.metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(SessionError::IdCollision(session.id))
            }
            Err(e) => Err(db_err(e)),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<PreviewSession>, SessionError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM preview_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::row_to_session))
    }

    #[instrument(skip(self))]
    async fn record_access(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError> {
        // Conditional update is the single-writer discipline: only a live
        // row is touched.
        let row = sqlx::query(&format!(
            r#"
            UPDATE preview_sessions
            SET access_count = access_count + 1, last_accessed_at = $2
            WHERE id = $1 AND expires_at > $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::row_to_session))
    }

    #[instrument(skip(self))]
    async fn expire_now(&self, id: &str, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let result = sqlx::query("UPDATE preview_sessions SET expires_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM preview_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "swept expired preview sessions");
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn find_by_workflow(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<PreviewSession>, SessionError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM preview_sessions
            WHERE workflow_id = $1 AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(workflow_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.as_ref().map(Self::row_to_session))
    }
}
