// Artifex worker
//
// Claims activity tasks from the durable queue and executes them: provider
// calls, ledger writes, preview publication. Many workers may run against
// the same database; task claiming keeps them from colliding.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use artifex_activities::{
    register_all, ActivityDeps, HeuristicAstValidator, HeuristicScanner, ShellOutSandbox,
};
use artifex_durable::{
    ExecutorConfig, PostgresWorkflowEventStore, WorkerPool, WorkerPoolConfig, WorkflowExecutor,
};
use artifex_ledger::PostgresDropStore;
use artifex_preview::{PostgresSessionStore, SessionManager};
use artifex_router::{RouterConfig, RouterOptions};
use artifex_workflows::{GenerationWorkflow, InfrastructureWorkflow};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Accepts plain seconds or `30m`/`2h`/`90s` forms.
fn env_duration(key: &str) -> Option<Duration> {
    let value = std::env::var(key).ok()?;
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

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("artifex={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("artifex-worker starting");

    let dsn = std::env::var("LEDGER_DSN").context("LEDGER_DSN environment variable required")?;
    let pool = PgPool::connect(&dsn)
        .await
        .context("failed to connect to database")?;

    PostgresWorkflowEventStore::migrate(&pool)
        .await
        .context("engine migrations failed")?;
    PostgresDropStore::migrate(&pool)
        .await
        .context("ledger migrations failed")?;
    PostgresSessionStore::migrate(&pool)
        .await
        .context("session migrations failed")?;
    tracing::info!("database ready");

    let workflow_timeout =
        env_duration("WORKFLOW_TIMEOUT").unwrap_or(Duration::from_secs(30 * 60));

    let store = Arc::new(PostgresWorkflowEventStore::new(pool.clone()));
    let mut executor = WorkflowExecutor::with_config(
        store,
        ExecutorConfig {
            default_workflow_timeout: Some(workflow_timeout),
            ..Default::default()
        },
    );
    executor.register::<GenerationWorkflow>();
    executor.register::<InfrastructureWorkflow>();
    let executor = Arc::new(executor);

    let router = Arc::new(RouterConfig::from_env().build(RouterOptions::default()));
    tracing::info!(providers = ?router.provider_names(), "provider router ready");

    let sessions = Arc::new(SessionManager::from_env(Arc::new(
        PostgresSessionStore::new(pool.clone()),
    )));

    let deps = ActivityDeps {
        router,
        ledger: Arc::new(PostgresDropStore::new(pool)),
        sessions: sessions.clone(),
        ast: Arc::new(HeuristicAstValidator),
        scanner: Arc::new(HeuristicScanner),
        sandbox: Arc::new(ShellOutSandbox),
    };

    let concurrency = std::env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let pool_config = WorkerPoolConfig::default().with_max_concurrency(concurrency);
    let worker = WorkerPool::new(executor, pool_config);
    register_all(&worker, &deps);

    worker.start().await.context("worker pool failed to start")?;
    tracing::info!(
        worker_id = worker.worker_id(),
        concurrency,
        "worker pool running"
    );

    // Preview sessions are swept on a schedule for as long as the worker
    // lives; the handle aborts the loop on drop.
    let _sweeper = sessions.spawn_sweeper(Duration::from_secs(60));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining");

    worker.shutdown().await.ok();
    tracing::info!("worker stopped");
    Ok(())
}
