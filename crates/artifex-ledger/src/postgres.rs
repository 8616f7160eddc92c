//! PostgreSQL implementation of DropStore
//!
//! Version allocation is serialized per (workflow, stage) with a `FOR UPDATE`
//! scan inside a transaction; the `(workflow_id, stage, version)` unique
//! constraint backstops races between processes.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::drop::{Drop, DropType, NewDrop, Stage};
use crate::store::{DropFilter, DropOrder, DropStore, LedgerError};

/// PostgreSQL-backed drop store.
#[derive(Clone)]
pub struct PostgresDropStore {
    pool: PgPool,
}

impl PostgresDropStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the ledger's forward-only migrations.
    pub async fn migrate(pool: &PgPool) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }

    fn row_to_drop(row: &sqlx::postgres::PgRow) -> Result<Drop, LedgerError> {
        let stage_str: String = row.get("stage");
        let type_str: String = row.get("drop_type");
        let metadata: serde_json::Value = row.get("metadata");

        Ok(Drop {
            id: row.get("id"),
            workflow_id: row.get("workflow_id"),
            stage: Stage::parse(&stage_str)
                .ok_or_else(|| LedgerError::Serialization(format!("unknown stage: {stage_str}")))?,
            drop_type: DropType::parse(&type_str).ok_or_else(|| {
                LedgerError::Serialization(format!("unknown drop type: {type_str}"))
            })?,
            artifact: row.get("artifact"),
            metadata: match metadata {
                serde_json::Value::Object(map) => map,
                _ => Default::default(),
            },
            version: row.get("version"),
            superseded: row.get("superseded"),
            created_at: row.get("created_at"),
        })
    }
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

#[async_trait]
impl DropStore for PostgresDropStore {
    #[instrument(skip(self, drop), fields(workflow_id = %drop.workflow_id, stage = %drop.stage))]
    async fn create_drop(&self, drop: NewDrop) -> Result<Drop, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialize version allocation for this (workflow, stage).
        let latest = sqlx::query(
            r#"
            SELECT id, workflow_id, stage, drop_type, artifact, metadata, version, superseded, created_at
            FROM ledger_drops
            WHERE workflow_id = $1 AND stage = $2
            ORDER BY version DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(drop.workflow_id)
        .bind(drop.stage.name())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut next_version = 1;
        if let Some(row) = &latest {
            let existing = Self::row_to_drop(row)?;
            if !existing.superseded
                && existing.artifact == drop.artifact
                && existing.drop_type == drop.drop_type
            {
                tx.rollback().await.ok();
                debug!(version = existing.version, "identical content, reusing drop");
                return Ok(existing);
            }
            next_version = existing.version + 1;
        }

        let id = Uuid::now_v7();
        let metadata = serde_json::Value::Object(drop.metadata.clone());

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_drops
                (id, workflow_id, stage, stage_order, drop_type, artifact, metadata, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, workflow_id, stage, drop_type, artifact, metadata, version, superseded, created_at
            "#,
        )
        .bind(id)
        .bind(drop.workflow_id)
        .bind(drop.stage.name())
        .bind(drop.stage.order() as i16)
        .bind(drop.drop_type.name())
        .bind(&drop.artifact)
        .bind(&metadata)
        .bind(next_version)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::AlreadyExists {
                workflow_id: drop.workflow_id,
                stage: drop.stage,
                version: next_version,
            },
            _ => db_err(e),
        })?;

        let stored = Self::row_to_drop(&inserted)?;
        tx.commit().await.map_err(db_err)?;

        debug!(version = stored.version, "created drop");
        Ok(stored)
    }

    #[instrument(skip(self, filter))]
    async fn list_drops(
        &self,
        workflow_id: Uuid,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError> {
        let direction = match filter.order {
            DropOrder::Ascending => "ASC",
            DropOrder::Descending => "DESC",
        };

        let sql = format!(
            r#"
            SELECT id, workflow_id, stage, drop_type, artifact, metadata, version, superseded, created_at
            FROM ledger_drops
            WHERE workflow_id = $1
              AND ($2 OR NOT superseded)
              AND ($3::text IS NULL OR stage = $3)
              AND ($4::text IS NULL OR drop_type = $4)
            ORDER BY stage_order {direction}, version {direction}
            LIMIT $5
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(workflow_id)
            .bind(filter.include_superseded)
            .bind(filter.stage.map(|s| s.name()))
            .bind(filter.drop_type.map(|t| t.name()))
            .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::row_to_drop).collect()
    }

    #[instrument(skip(self))]
    async fn get_latest(&self, workflow_id: Uuid, stage: Stage) -> Result<Drop, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, stage, drop_type, artifact, metadata, version, superseded, created_at
            FROM ledger_drops
            WHERE workflow_id = $1 AND stage = $2 AND NOT superseded
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(stage.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(LedgerError::NotFound { workflow_id, stage })?;

        Self::row_to_drop(&row)
    }

    #[instrument(skip(self))]
    async fn rollback(&self, workflow_id: Uuid, to_stage: Stage) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_drops
            SET superseded = TRUE
            WHERE workflow_id = $1 AND stage_order > $2 AND NOT superseded
            "#,
        )
        .bind(workflow_id)
        .bind(to_stage.order() as i16)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, filter))]
    async fn search_drops(
        &self,
        query: &str,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError> {
        let pattern = format!("%{}%", query);
        let direction = match filter.order {
            DropOrder::Ascending => "ASC",
            DropOrder::Descending => "DESC",
        };

        let sql = format!(
            r#"
            SELECT id, workflow_id, stage, drop_type, artifact, metadata, version, superseded, created_at
            FROM ledger_drops
            WHERE (artifact ILIKE $1 OR metadata::text ILIKE $1)
              AND ($2 OR NOT superseded)
              AND ($3::text IS NULL OR stage = $3)
              AND ($4::text IS NULL OR drop_type = $4)
            ORDER BY stage_order {direction}, version {direction}
            LIMIT $5
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(filter.include_superseded)
            .bind(filter.stage.map(|s| s.name()))
            .bind(filter.drop_type.map(|t| t.name()))
            .bind(filter.limit.map(|l| l as i64).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(Self::row_to_drop).collect()
    }

    #[instrument(skip(self))]
    async fn count_drops(&self, workflow_id: Uuid) -> Result<u64, LedgerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM ledger_drops WHERE workflow_id = $1 AND NOT superseded",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.get::<i64, _>("n") as u64)
    }
}
