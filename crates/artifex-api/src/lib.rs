//! # HTTP surface
//!
//! Submission, inspection, cancellation, and preview resolution over the
//! orchestrator, ledger, and session manager. OpenAPI docs are served at
//! `/docs`.

pub mod dto;
pub mod error;
mod preview;
mod state;
mod workflows;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::{env_workflow_timeout, ApiConfig, AppState, Orchestrator};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::generate_extended,
        workflows::generate_infrastructure,
        workflows::get_workflow,
        workflows::get_result,
        workflows::list_drops,
        workflows::cancel_workflow,
        preview::resolve_session,
        preview::resolve_workflow_preview,
        preview::healthz,
    ),
    components(schemas(
        dto::GenerateExtendedRequest,
        dto::GenerateInfrastructureRequest,
        dto::WorkflowStartedResponse,
        dto::WorkflowStatusResponse,
        dto::StageWarningDto,
        dto::DropDto,
        dto::PreviewResponse,
        dto::HealthResponse,
    )),
    tags(
        (name = "workflows", description = "Generation pipeline submission and inspection"),
        (name = "preview", description = "Preview handle resolution"),
        (name = "health", description = "Liveness and provider health"),
    ),
    info(
        title = "Artifex API",
        description = "Durable software-generation pipeline",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/workflows/generate-extended", post(workflows::generate_extended))
        .route(
            "/workflows/generate-infrastructure",
            post(workflows::generate_infrastructure),
        )
        .route("/workflows/:id", get(workflows::get_workflow))
        .route("/workflows/:id/result", get(workflows::get_result))
        .route("/workflows/:id/drops", get(workflows::list_drops))
        .route("/workflows/:id/cancel", post(workflows::cancel_workflow))
        .route("/p/:session_id", get(preview::resolve_session))
        .route("/preview/:workflow_id", get(preview::resolve_workflow_preview))
        .route("/healthz", get(preview::healthz))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifex_activities::{
        register_all, ActivityDeps, HeuristicAstValidator, HeuristicScanner, ShellOutSandbox,
    };
    use artifex_durable::{InMemoryWorkflowEventStore, WorkerPool, WorkerPoolConfig, WorkflowExecutor};
    use artifex_ledger::InMemoryDropStore;
    use artifex_preview::{InMemorySessionStore, SessionManager};
    use artifex_router::{Router as ProviderRouter, SimAdapter};
    use artifex_workflows::{GenerationWorkflow, InfrastructureWorkflow};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        pool: WorkerPool<InMemoryWorkflowEventStore>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(InMemoryWorkflowEventStore::new());
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<GenerationWorkflow>();
        executor.register::<InfrastructureWorkflow>();
        let executor = Arc::new(executor);

        let mut provider_router = ProviderRouter::new();
        provider_router.add_provider(Arc::new(SimAdapter::canned("sim")), Some(1000.0));
        let provider_router = Arc::new(provider_router);

        let ledger = Arc::new(InMemoryDropStore::new());
        let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));

        let deps = ActivityDeps {
            router: provider_router.clone(),
            ledger: ledger.clone(),
            sessions: sessions.clone(),
            ast: Arc::new(HeuristicAstValidator),
            scanner: Arc::new(HeuristicScanner),
            sandbox: Arc::new(ShellOutSandbox),
        };
        let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::default());
        register_all(&pool, &deps);

        let state = AppState {
            orchestrator: executor,
            ledger,
            sessions,
            router: provider_router,
            config: ApiConfig::default(),
        };

        TestApp {
            router: build_router(state),
            pool,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_then_inspect_then_result() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/workflows/generate-extended")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "prompt": "Create a Python FastAPI service for a todo list.",
                            "language": "python",
                            "framework": "fastapi",
                            "type": "api",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let started = body_json(response).await;
        assert_eq!(started["status"], "started");
        let workflow_id = started["workflow_id"].as_str().unwrap().to_string();

        // Result is 409 while the pipeline is still running.
        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/workflows/{workflow_id}/result"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Drive the pipeline to completion.
        while app.pool.drain().await.unwrap() > 0 {}

        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/workflows/{workflow_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["status"], "completed");
        assert!(status["drop_count"].as_u64().unwrap() >= 7);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/workflows/{workflow_id}/result"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["result"]["primary_artifact"]["stage"], "code_generation");

        // Drops listing is ordered and non-empty.
        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/workflows/{workflow_id}/drops"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let drops = body_json(response).await;
        assert!(drops.as_array().unwrap().len() >= 7);

        // The preview handle resolves.
        let session_id = result["result"]["preview_session_id"].as_str().unwrap();
        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/p/{session_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let preview = body_json(response).await;
        assert_eq!(preview["workflow_id"].as_str().unwrap(), workflow_id);
    }

    #[tokio::test]
    async fn empty_prompt_is_unprocessable() {
        let app = test_app();
        let response = app
            .router
            .oneshot(
                Request::post("/workflows/generate-extended")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let app = test_app();
        let response = app
            .router
            .oneshot(
                Request::get(format!("/workflows/{}", uuid::Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn infrastructure_requires_completed_source() {
        let app = test_app();

        // Start a generation workflow but do not run it.
        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/workflows/generate-extended")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt": "build a service"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let workflow_id = body_json(response).await["workflow_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/workflows/generate-infrastructure")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "workflow_id": workflow_id,
                            "provider": "aws",
                            "dry_run": true,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_preview_is_not_found() {
        let app = test_app();
        let response = app
            .router
            .oneshot(
                Request::get("/p/doesnotexist12345")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_reports_providers() {
        let app = test_app();
        let response = app
            .router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["providers"]["sim"]["status"], "healthy");
    }
}
