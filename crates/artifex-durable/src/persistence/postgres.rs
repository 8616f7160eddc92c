//! PostgreSQL implementation of WorkflowEventStore
//!
//! - Optimistic concurrency on the event log via sequence numbers
//! - Task claiming with `FOR UPDATE SKIP LOCKED`
//! - Terminal workflow states enforced in SQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::activity::ActivityError;
use crate::workflow::{ActivityOptions, WorkflowError, WorkflowEvent, WorkflowSignal};

/// PostgreSQL-backed event store.
#[derive(Clone)]
pub struct PostgresWorkflowEventStore {
    pool: PgPool,
}

impl PostgresWorkflowEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the engine's forward-only migrations.
    pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn ser_err(e: serde_json::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn parse_status(s: &str) -> Result<WorkflowStatus, StoreError> {
    WorkflowStatus::parse(s)
        .ok_or_else(|| StoreError::Serialization(format!("unknown workflow status: {s}")))
}

fn event_type_name(event: &WorkflowEvent) -> &'static str {
    match event {
        WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
        WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
        WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
        WorkflowEvent::WorkflowCancelled { .. } => "workflow_cancelled",
        WorkflowEvent::WorkflowTimedOut { .. } => "workflow_timed_out",
        WorkflowEvent::ActivityScheduled { .. } => "activity_scheduled",
        WorkflowEvent::ActivityStarted { .. } => "activity_started",
        WorkflowEvent::ActivityCompleted { .. } => "activity_completed",
        WorkflowEvent::ActivityFailed { .. } => "activity_failed",
        WorkflowEvent::SignalReceived { .. } => "signal_received",
    }
}

#[async_trait]
impl WorkflowEventStore for PostgresWorkflowEventStore {
    #[instrument(skip(self, input))]
    async fn create_workflow(
        &self,
        workflow_id: Uuid,
        run_id: Uuid,
        workflow_type: &str,
        input: serde_json::Value,
        deadline_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO durable_workflows (id, run_id, workflow_type, status, input, deadline_at)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            "#,
        )
        .bind(workflow_id)
        .bind(run_id)
        .bind(workflow_type)
        .bind(&input)
        .bind(deadline_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(%workflow_id, %workflow_type, "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow_status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM durable_workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        parse_status(&row.get::<String, _>("status"))
    }

    #[instrument(skip(self))]
    async fn get_workflow_info(&self, workflow_id: Uuid) -> Result<WorkflowInfo, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, run_id, workflow_type, status, input, result, error, progress,
                   deadline_at, started_at, finished_at
            FROM durable_workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let error_json: Option<serde_json::Value> = row.get("error");

        Ok(WorkflowInfo {
            id: row.get("id"),
            run_id: row.get("run_id"),
            workflow_type: row.get("workflow_type"),
            status: parse_status(&row.get::<String, _>("status"))?,
            input: row.get("input"),
            result: row.get("result"),
            error: error_json.and_then(|v| serde_json::from_value(v).ok()),
            progress: row.get("progress"),
            deadline_at: row.get("deadline_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
        })
    }

    #[instrument(skip(self, events))]
    async fn append_events(
        &self,
        workflow_id: Uuid,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialize version allocation per workflow.
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_num) + 1, 0) AS next_seq
            FROM durable_workflow_events
            WHERE workflow_id = $1
            FOR UPDATE
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let current: i32 = row.get::<i64, _>("next_seq") as i32;
        if current != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current,
            });
        }

        let mut seq = current;
        for event in events {
            let data = serde_json::to_value(&event).map_err(ser_err)?;
            sqlx::query(
                r#"
                INSERT INTO durable_workflow_events (workflow_id, sequence_num, event_type, event_data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(workflow_id)
            .bind(seq)
            .bind(event_type_name(&event))
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            seq += 1;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(%workflow_id, seq, "appended events");
        Ok(seq)
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_num, event_data
            FROM durable_workflow_events
            WHERE workflow_id = $1
            ORDER BY sequence_num
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i32 = row.get("sequence_num");
            let data: serde_json::Value = row.get("event_data");
            let event: WorkflowEvent = serde_json::from_value(data).map_err(ser_err)?;
            events.push((seq, event));
        }
        Ok(events)
    }

    #[instrument(skip(self, result, error))]
    async fn update_workflow_status(
        &self,
        workflow_id: Uuid,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let error_json = error.map(serde_json::to_value).transpose().map_err(ser_err)?;

        // Terminal rows never match the WHERE clause, preserving immutability.
        let updated = sqlx::query(
            r#"
            UPDATE durable_workflows
            SET status = $2,
                result = COALESCE($3, result),
                error = COALESCE($4, error),
                started_at = CASE WHEN $2 = 'running' THEN now() ELSE started_at END,
                finished_at = CASE
                    WHEN $2 IN ('completed', 'failed', 'cancelled', 'timed_out') THEN now()
                    ELSE finished_at
                END
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled', 'timed_out')
            "#,
        )
        .bind(workflow_id)
        .bind(status.to_string())
        .bind(&result)
        .bind(&error_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            let current = self.get_workflow_status(workflow_id).await?;
            if current.is_terminal() {
                return Err(StoreError::TerminalState(workflow_id, current));
            }
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(())
    }

    #[instrument(skip(self, progress))]
    async fn update_progress(
        &self,
        workflow_id: Uuid,
        progress: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE durable_workflows SET progress = $2 WHERE id = $1")
            .bind(workflow_id)
            .bind(&progress)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, task), fields(activity_type = %task.activity_type))]
    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        let options = serde_json::to_value(&task.options).map_err(ser_err)?;

        sqlx::query(
            r#"
            INSERT INTO durable_tasks
                (id, workflow_id, activity_id, activity_type, input, options, priority, start_to_close_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(task.workflow_id)
        .bind(&task.activity_id)
        .bind(&task.activity_type)
        .bind(&task.input)
        .bind(&options)
        .bind(task.options.priority)
        .bind(task.options.start_to_close_timeout.as_millis() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn claim_tasks(
        &self,
        worker_id: &str,
        activity_types: &[String],
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE durable_tasks
            SET status = 'claimed',
                attempt = attempt + 1,
                claimed_by = $1,
                claimed_at = now()
            WHERE id IN (
                SELECT id FROM durable_tasks
                WHERE status = 'pending'
                  AND run_after <= now()
                  AND (cardinality($2::text[]) = 0 OR activity_type = ANY($2))
                ORDER BY priority DESC, created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, workflow_id, activity_id, activity_type, input, options, attempt
            "#,
        )
        .bind(worker_id)
        .bind(activity_types)
        .bind(max_tasks as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let options: ActivityOptions =
                serde_json::from_value(row.get("options")).map_err(ser_err)?;
            let max_attempts = options.retry_policy.max_attempts;
            claimed.push(ClaimedTask {
                id: row.get("id"),
                workflow_id: row.get("workflow_id"),
                activity_id: row.get("activity_id"),
                activity_type: row.get("activity_type"),
                input: row.get("input"),
                options,
                attempt: row.get::<i32, _>("attempt") as u32,
                max_attempts,
            });
        }
        Ok(claimed)
    }

    #[instrument(skip(self, _result))]
    async fn complete_task(
        &self,
        task_id: Uuid,
        _result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE durable_tasks SET status = 'completed' WHERE id = $1 AND status = 'claimed'",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            "SELECT attempt, options FROM durable_tasks WHERE id = $1 FOR UPDATE",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let attempt: u32 = row.get::<i32, _>("attempt") as u32;
        let options: ActivityOptions =
            serde_json::from_value(row.get("options")).map_err(ser_err)?;
        let policy = &options.retry_policy;

        let may_retry = error.retryable
            && policy.should_retry(error.error_type.as_deref())
            && policy.has_attempts_remaining(attempt);

        let outcome = if may_retry {
            let next_attempt = attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            sqlx::query(
                r#"
                UPDATE durable_tasks
                SET status = 'pending',
                    claimed_by = NULL,
                    claimed_at = NULL,
                    run_after = now() + $2 * interval '1 millisecond',
                    last_error = $3
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(delay.as_millis() as i64)
            .bind(&error.message)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            }
        } else {
            sqlx::query(
                "UPDATE durable_tasks SET status = 'failed', last_error = $2 WHERE id = $1",
            )
            .bind(task_id)
            .bind(&error.message)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            TaskFailureOutcome::Exhausted
        };

        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_tasks(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE durable_tasks
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL, run_after = now()
            WHERE status = 'claimed'
              AND claimed_at < now() - start_to_close_ms * interval '1 millisecond'
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        if !ids.is_empty() {
            error!(count = ids.len(), "reclaimed stale task claims");
        }
        Ok(ids)
    }

    #[instrument(skip(self, signal))]
    async fn send_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&signal).map_err(ser_err)?;
        sqlx::query("INSERT INTO durable_workflow_signals (workflow_id, signal) VALUES ($1, $2)")
            .bind(workflow_id)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_pending_signals(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowSignal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT signal FROM durable_workflow_signals
            WHERE workflow_id = $1 AND NOT processed
            ORDER BY id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut signals = Vec::with_capacity(rows.len());
        for row in rows {
            let signal: WorkflowSignal =
                serde_json::from_value(row.get("signal")).map_err(ser_err)?;
            signals.push(signal);
        }
        Ok(signals)
    }

    #[instrument(skip(self))]
    async fn mark_signals_processed(
        &self,
        workflow_id: Uuid,
        count: usize,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE durable_workflow_signals
            SET processed = TRUE
            WHERE id IN (
                SELECT id FROM durable_workflow_signals
                WHERE workflow_id = $1 AND NOT processed
                ORDER BY id
                LIMIT $2
            )
            "#,
        )
        .bind(workflow_id)
        .bind(count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
