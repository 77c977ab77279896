//! Webhook receiver handler for the REST API.
//!
//! Receives incoming webhook requests, verifies authentication
//! (HMAC-SHA256 or bearer token) via the `WebhookRegistry`, and routes the
//! payload into the matched workflow as an `Event` trigger.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_infra::workflow::webhook_handler::{WebhookAuthMethod, WebhookConfig, WebhookError};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegisterAuth {
    HmacSha256 { secret: String },
    BearerToken { token: String },
    None,
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub path: String,
    pub workflow_id: String,
    #[serde(default)]
    pub auth: Option<RegisterAuth>,
}

/// POST /webhooks/register - Bind a path to a workflow, with the auth
/// method webhook senders must satisfy on every delivery.
pub async fn register_webhook(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<RegisterWebhookRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state
        .workflow_repo
        .get_latest_workflow(&auth.org_id, &body.workflow_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workflow '{}' not found", body.workflow_id)))?;

    let auth_method = match body.auth.unwrap_or(RegisterAuth::None) {
        RegisterAuth::HmacSha256 { secret } => WebhookAuthMethod::HmacSha256 {
            secret: secret.into_bytes(),
        },
        RegisterAuth::BearerToken { token } => WebhookAuthMethod::BearerToken { token },
        RegisterAuth::None => WebhookAuthMethod::None,
    };

    state.webhook_registry.register(
        &body.path,
        WebhookConfig {
            org_id: auth.org_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            auth: auth_method,
            when_clause: None,
        },
    );

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({ "path": body.path, "workflow_id": workflow.workflow_id }),
        request_id,
        elapsed,
    );
    Ok(Json(resp))
}

/// POST /webhooks/{path} - Receive an incoming webhook.
///
/// Looks up the webhook path in the `WebhookRegistry`, verifies the
/// request authentication, then routes the payload to the bound workflow
/// as an `Event` trigger named `webhook.<path>`.
///
/// Authentication is determined by the webhook registration:
/// - **HMAC-SHA256**: reads `X-Hub-Signature-256`
/// - **Bearer token**: reads `Authorization`
/// - **None**: no authentication required
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let webhook_path = format!("/{}", path);

    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let config = state
        .webhook_registry
        .verify_request(&webhook_path, &body, signature_header, auth_header)
        .map_err(|e| match e {
            WebhookError::PathNotFound(_) => {
                AppError::NotFound(format!("no webhook registered at {webhook_path}"))
            }
            WebhookError::HmacVerificationFailed | WebhookError::BearerVerificationFailed => {
                AppError::Unauthorized("webhook authentication failed".to_string())
            }
            WebhookError::MissingAuth(msg) => AppError::Unauthorized(msg),
            WebhookError::InvalidKey(msg) => AppError::Internal(msg),
        })?;

    let payload: serde_json::Value =
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    let workflow = state
        .workflow_repo
        .get_workflow(&config.org_id, &config.workflow_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "workflow {} no longer exists",
                config.workflow_id
            ))
        })?;

    let execution = state
        .workflow_engine
        .start(
            config.org_id,
            &workflow,
            &format!("webhook.{path}"),
            Some(payload),
        )
        .await?;

    tracing::info!(
        webhook_path = %webhook_path,
        workflow_id = %config.workflow_id,
        execution_id = %execution.id,
        "webhook triggered workflow execution"
    );

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({
            "execution_id": execution.id,
            "workflow_id": config.workflow_id,
            "workflow_name": config.workflow_name,
            "status": execution.status,
        }),
        request_id,
        elapsed,
    )
    .with_link(
        "execution",
        &format!("/api/v1/executions/{}", execution.id),
    );

    Ok(Json(resp))
}
