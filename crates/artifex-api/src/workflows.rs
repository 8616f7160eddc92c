//! Workflow submission and inspection routes.

use artifex_durable::WorkflowStatus;
use artifex_ledger::DropFilter;
use artifex_workflows::{GenerationRequest, InfrastructureRequest, StageWarning};
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use crate::dto::{
    DropDto, GenerateExtendedRequest, GenerateInfrastructureRequest, StageWarningDto,
    WorkflowStartedResponse, WorkflowStatusResponse,
};
use crate::error::ApiError;
use crate::state::AppState;

/// Start an extended generation workflow.
#[utoipa::path(
    post,
    path = "/workflows/generate-extended",
    request_body = GenerateExtendedRequest,
    responses(
        (status = 200, description = "Workflow started", body = WorkflowStartedResponse),
        (status = 422, description = "Malformed submission"),
    ),
    tag = "workflows"
)]
pub async fn generate_extended(
    State(state): State<AppState>,
    Json(body): Json<GenerateExtendedRequest>,
) -> Result<Json<WorkflowStartedResponse>, ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::InvalidInput("prompt must not be empty".into()));
    }

    let workflow_id = Uuid::now_v7();

    let mut prompt = body.prompt;
    if let Some(requirements) = &body.requirements {
        if !requirements.is_empty() {
            prompt.push_str("\n\nAdditional requirements:\n");
            for requirement in requirements {
                prompt.push_str(&format!("- {requirement}\n"));
            }
        }
    }

    let request = GenerationRequest {
        workflow_id,
        prompt,
        language: body.language,
        framework: body.framework,
        kind: body.kind,
        name: body.name,
        generate_tests: body.generate_tests,
        generate_docs: body.generate_docs,
        preview_ttl_secs: state.config.preview_ttl_secs,
        activity_max_attempts: state.config.activity_max_attempts,
        stage_timeout_secs: state.config.stage_timeout_secs,
        min_code_bytes: None,
    };

    let (workflow_id, run_id) = state
        .orchestrator
        .start_generation(workflow_id, request)
        .await?;

    tracing::info!(%workflow_id, %run_id, "generation workflow started");

    Ok(Json(WorkflowStartedResponse {
        workflow_id,
        run_id,
        status: "started",
    }))
}

/// Start an infrastructure sub-workflow for a completed generation workflow.
#[utoipa::path(
    post,
    path = "/workflows/generate-infrastructure",
    request_body = GenerateInfrastructureRequest,
    responses(
        (status = 200, description = "Sub-workflow started", body = WorkflowStartedResponse),
        (status = 404, description = "Source workflow not found"),
        (status = 409, description = "Source workflow not completed"),
    ),
    tag = "workflows"
)]
pub async fn generate_infrastructure(
    State(state): State<AppState>,
    Json(body): Json<GenerateInfrastructureRequest>,
) -> Result<Json<WorkflowStartedResponse>, ApiError> {
    let source = state.orchestrator.workflow_info(body.workflow_id).await?;
    if source.status != WorkflowStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "source workflow is {}, not completed",
            source.status
        )));
    }

    let sub_id = Uuid::now_v7();
    let request = InfrastructureRequest {
        workflow_id: sub_id,
        source_workflow_id: body.workflow_id,
        provider: body.provider,
        environment: body.environment.unwrap_or_else(|| "development".into()),
        compliance: body.compliance,
        enable_golden_images: body.enable_golden_images,
        enable_sop: body.enable_sop,
        auto_deploy: body.auto_deploy,
        dry_run: body.dry_run,
        activity_max_attempts: state.config.activity_max_attempts,
    };

    let (workflow_id, run_id) = state
        .orchestrator
        .start_infrastructure(sub_id, request)
        .await?;

    Ok(Json(WorkflowStartedResponse {
        workflow_id,
        run_id,
        status: "started",
    }))
}

/// Workflow status and progress snapshot.
#[utoipa::path(
    get,
    path = "/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow status", body = WorkflowStatusResponse),
        (status = 404, description = "Unknown workflow"),
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowStatusResponse>, ApiError> {
    let info = state.orchestrator.workflow_info(id).await?;
    let drop_count = state.ledger.count_drops(id).await?;

    let progress = info.progress.unwrap_or(Value::Null);
    let current_stage = progress
        .get("current_stage")
        .and_then(|v| v.as_str())
        .map(String::from);
    let warnings: Vec<StageWarningDto> = progress
        .get("warnings")
        .cloned()
        .and_then(|w| serde_json::from_value::<Vec<StageWarning>>(w).ok())
        .unwrap_or_default()
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(WorkflowStatusResponse {
        id,
        status: info.status.to_string(),
        current_stage,
        drop_count,
        warnings,
        started_at: info.started_at,
        finished_at: info.finished_at,
    }))
}

/// Result of a completed workflow; 409 until then.
#[utoipa::path(
    get,
    path = "/workflows/{id}/result",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Workflow result"),
        (status = 404, description = "Unknown workflow"),
        (status = 409, description = "Workflow not completed"),
    ),
    tag = "workflows"
)]
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let info = state.orchestrator.workflow_info(id).await?;

    match info.status {
        WorkflowStatus::Completed => Ok(Json(serde_json::json!({
            "result": info.result,
        }))),
        // Failed and timed-out workflows still return their partial state:
        // everything accumulated lives in the drops; the error names the
        // failing stage.
        WorkflowStatus::Failed | WorkflowStatus::TimedOut | WorkflowStatus::Cancelled => {
            Err(ApiError::Conflict(format!(
                "workflow is {}: {}",
                info.status,
                info.error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no error recorded".into())
            )))
        }
        _ => Err(ApiError::Conflict(format!("workflow is {}", info.status))),
    }
}

/// Ordered drops for a workflow.
#[utoipa::path(
    get,
    path = "/workflows/{id}/drops",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 200, description = "Ordered drops", body = [DropDto]),
        (status = 404, description = "Unknown workflow"),
    ),
    tag = "workflows"
)]
pub async fn list_drops(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DropDto>>, ApiError> {
    // Verify the workflow exists so an empty list is meaningful.
    state.orchestrator.workflow_info(id).await?;

    let drops = state.ledger.list_drops(id, DropFilter::default()).await?;
    Ok(Json(drops.into_iter().map(Into::into).collect()))
}

/// Request cooperative cancellation.
#[utoipa::path(
    post,
    path = "/workflows/{id}/cancel",
    params(("id" = Uuid, Path, description = "Workflow id")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Unknown workflow"),
        (status = 409, description = "Workflow already terminal"),
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state
        .orchestrator
        .cancel(id, "cancelled via API".to_string())
        .await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}
