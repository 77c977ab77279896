//! Workflow definition, execution, and approval handlers for the REST API.
//!
//! Thin HTTP wrapper over the core contracts: definitions are parsed/
//! validated and persisted via `WorkflowRepository`, events are routed
//! through `event_router::route_event`, and approvals are decided through
//! `executor::decide_approval`. The handlers own no business logic beyond
//! request/response shaping and org scoping -- `org_id` always comes from
//! the `Authenticated` extractor, never from the request body.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_core::workflow::approval::NullApproverDirectory;
use loomwork_core::workflow::definition::parse_workflow_yaml;
use loomwork_core::workflow::event_router;
use loomwork_core::workflow::executor::decide_approval;
use loomwork_core::workflow::pause_resume::resume;
use loomwork_core::workflow::scheduler::compute_next_trigger;
use loomwork_types::workflow::{Trigger, Workflow, WorkflowSchedule};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / query bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// The workflow DSL, as YAML.
    pub definition_yaml: String,
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_execution_limit")]
    pub limit: u32,
}

fn default_execution_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct TriggerEventRequest {
    pub event_type: String,
    #[serde(default = "default_event_source")]
    pub source: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_event_source() -> String {
    "http".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DecideApprovalRequest {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResumeExecutionRequest {
    #[serde(default)]
    pub merge_data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Workflow definitions
// ---------------------------------------------------------------------------

/// POST /workflows - Register a new version of a workflow definition. If the
/// definition's trigger is `Trigger::Schedule`, also registers the
/// corresponding `WorkflowSchedule` row so the scheduler poll loop picks it
/// up without a separate registration call.
pub async fn create_workflow(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let definition = parse_workflow_yaml(&body.definition_yaml)?;

    let existing = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &body.workflow_id)
        .await?;
    let version = existing.map(|w| w.version + 1).unwrap_or(1);

    let now = chrono::Utc::now();
    let workflow = Workflow {
        id: Uuid::now_v7(),
        org_id: auth.org_id,
        workflow_id: body.workflow_id.clone(),
        version,
        name: body.name,
        description: body.description,
        definition: definition.clone(),
        enabled: true,
        tags: body.tags,
        created_at: now,
        updated_at: now,
    };

    state.workflow_repo.save_workflow(&workflow).await?;

    if let Trigger::Schedule { cron } = &definition.trigger {
        let next_trigger_at = compute_next_trigger(cron, "UTC", now)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            org_id: auth.org_id,
            workflow_id: workflow.id,
            cron_expression: cron.clone(),
            timezone: "UTC".to_string(),
            enabled: true,
            last_triggered_at: None,
            next_trigger_at,
        };
        state.workflow_repo.save_schedule(&schedule).await?;
    }

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(workflow, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", body.workflow_id));

    Ok(Json(resp))
}

/// GET /workflows - List every workflow (latest and prior versions) in the org.
pub async fn list_workflows(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflows = state.workflow_repo.list_workflows(&auth.org_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(workflows, request_id, elapsed)))
}

/// GET /workflows/{workflow_id} - Latest enabled version of a workflow.
pub async fn get_workflow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(workflow_id): Path<String>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{workflow_id}' not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(workflow, request_id, elapsed)))
}

/// POST /workflows/{workflow_id}/enabled - Enable or disable the latest version.
pub async fn set_workflow_enabled(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(workflow_id): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{workflow_id}' not found")))?;

    state
        .workflow_repo
        .set_workflow_enabled(&auth.org_id, &workflow.id, body.enabled)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success((), request_id, elapsed)))
}

/// DELETE /workflows/{workflow_id} - Delete the latest version of a workflow.
pub async fn delete_workflow(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(workflow_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{workflow_id}' not found")))?;

    let deleted = state
        .workflow_repo
        .delete_workflow(&auth.org_id, &workflow.id)
        .await?;
    if !deleted {
        return Err(AppError::NotFound(format!("workflow '{workflow_id}' not found")));
    }

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success((), request_id, elapsed)))
}

// ---------------------------------------------------------------------------
// Events and executions
// ---------------------------------------------------------------------------

/// POST /events - Route an inbound event to every matching enabled workflow
/// and resume any paused `wait` steps correlated to it.
pub async fn trigger_event(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<TriggerEventRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let (record, handles) = event_router::route_event(
        &state.workflow_engine,
        auth.org_id,
        &body.event_type,
        &body.source,
        body.payload,
    )
    .await
    .map_err(|e| AppError::Validation(e.to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::json!({ "event": record, "triggered": handles });
    Ok(Json(ApiResponse::success(body, request_id, elapsed)))
}

/// GET /workflows/{workflow_id}/executions - Recent executions of one workflow.
pub async fn list_executions(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(workflow_id): Path<String>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{workflow_id}' not found")))?;

    let executions = state
        .workflow_repo
        .list_executions(&auth.org_id, &workflow.id, query.limit)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::to_value(&executions).unwrap_or(serde_json::Value::Null);
    Ok(Json(ApiResponse::success(body, request_id, elapsed)))
}

/// GET /executions/{execution_id} - One execution, with its step history.
pub async fn get_execution(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .workflow_repo
        .get_execution(&auth.org_id, &execution_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}' not found")))?;

    let steps = state
        .workflow_repo
        .list_step_executions(&execution_id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::json!({ "execution": execution, "steps": steps });
    Ok(Json(ApiResponse::success(body, request_id, elapsed)))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

/// POST /approvals/{approval_id}/decide - Approve or reject a pending
/// approval and drive the bound execution forward to its next suspension
/// or terminal state.
pub async fn decide_approval_handler(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(approval_id): Path<Uuid>,
    Json(body): Json<DecideApprovalRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let request = decide_approval(
        &state.workflow_checkpoints,
        &NullApproverDirectory,
        auth.org_id,
        approval_id,
        auth.org_id,
        body.approved,
        body.reason.as_deref(),
    )
    .await?;

    let execution = state
        .workflow_repo
        .get_execution(&auth.org_id, &request.execution_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("execution '{}' not found", request.execution_id)))?;

    let workflow = state
        .workflow_repo
        .get_workflow(&auth.org_id, &execution.workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{}' not found", execution.workflow_id)))?;

    let execution = state
        .workflow_engine
        .drive_running(auth.org_id, &workflow, execution.id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::json!({ "approval": request, "execution": execution });
    Ok(Json(ApiResponse::success(body, request_id, elapsed)))
}

/// POST /executions/{execution_id}/resume - Resume a paused execution,
/// merging `merge_data` into the execution's accumulated resume data, and
/// drive it forward to its next suspension or terminal state.
pub async fn resume_execution(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(execution_id): Path<Uuid>,
    Json(body): Json<ResumeExecutionRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    resume(
        &state.workflow_checkpoints,
        auth.org_id,
        execution_id,
        body.merge_data,
    )
    .await?;

    let execution = state
        .workflow_repo
        .get_execution(&auth.org_id, &execution_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}' not found")))?;

    let workflow = state
        .workflow_repo
        .get_workflow(&auth.org_id, &execution.workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{}' not found", execution.workflow_id)))?;

    let execution = state
        .workflow_engine
        .drive_running(auth.org_id, &workflow, execution.id)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let body = serde_json::json!({ "execution": execution });
    Ok(Json(ApiResponse::success(body, request_id, elapsed)))
}
