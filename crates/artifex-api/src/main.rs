// Artifex API server
//
// Serves the submission/inspection/preview surface. Activity execution
// happens in artifex-worker processes; this binary only starts workflows
// and reads state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use artifex_api::{build_router, ApiConfig, AppState};
use artifex_durable::{ExecutorConfig, PostgresWorkflowEventStore, WorkflowExecutor};
use artifex_ledger::PostgresDropStore;
use artifex_preview::{PostgresSessionStore, SessionManager};
use artifex_router::{RouterConfig, RouterOptions};
use artifex_workflows::{GenerationWorkflow, InfrastructureWorkflow};
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("artifex={log_level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("artifex-api starting");

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

    let workflow_timeout = artifex_api::env_workflow_timeout()
        .unwrap_or(Duration::from_secs(30 * 60));

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

    let sessions = Arc::new(SessionManager::from_env(Arc::new(
        PostgresSessionStore::new(pool.clone()),
    )));

    // The API only reads provider health; generation happens in workers.
    let router = Arc::new(RouterConfig::from_env().build(RouterOptions::default()));

    let state = AppState {
        orchestrator: executor,
        ledger: Arc::new(PostgresDropStore::new(pool)),
        sessions,
        router,
        config: ApiConfig::from_env(),
    };

    let app = build_router(state);

    let addr = std::env::var("API_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
