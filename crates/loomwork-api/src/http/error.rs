//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use loomwork_core::workflow::approval::ApprovalError;
use loomwork_core::workflow::definition::WorkflowError as DefinitionError;
use loomwork_core::workflow::executor::ExecutorError;
use loomwork_core::workflow::pause_resume::PauseResumeError;
use loomwork_types::error::{EngineErrorKind, RepositoryError, WorkflowError as EngineError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Authentication failure.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// Entity not found.
    NotFound(String),
    /// Conflicting state (CAS failure, already-decided approval, ...).
    Conflict(String),
    /// Resume window expired; the execution is no longer resumable.
    Gone(String),
    /// Generic internal error.
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e.kind() {
            EngineErrorKind::Validation => AppError::Validation(e.message),
            EngineErrorKind::NotFound => AppError::NotFound(e.message),
            EngineErrorKind::Conflict | EngineErrorKind::Cancelled => {
                AppError::Conflict(e.message)
            }
            EngineErrorKind::Stale => AppError::Gone(e.message),
            EngineErrorKind::Evaluation
            | EngineErrorKind::ActionDispatch
            | EngineErrorKind::Timeout
            | EngineErrorKind::Internal => AppError::Internal(e.message),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::from(EngineError::from(e))
    }
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Engine(inner) => inner.into(),
            ExecutorError::EmptyWorkflow | ExecutorError::UnknownStep(_) => {
                AppError::Validation(e.to_string())
            }
            ExecutorError::Checkpoint(_) | ExecutorError::PauseResume(_) | ExecutorError::Approval(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotFound(_) => AppError::NotFound(e.to_string()),
            ApprovalError::NotPending(_) => AppError::Conflict(e.to_string()),
            ApprovalError::Checkpoint(_) | ApprovalError::PauseResume(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<PauseResumeError> for AppError {
    fn from(e: PauseResumeError) -> Self {
        match e {
            PauseResumeError::NotFound(_) => AppError::NotFound(e.to_string()),
            PauseResumeError::NotRunning(_) | PauseResumeError::NotPaused(_) => {
                AppError::Conflict(e.to_string())
            }
            PauseResumeError::Stale { .. } => AppError::Gone(e.to_string()),
            PauseResumeError::Checkpoint(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<DefinitionError> for AppError {
    fn from(e: DefinitionError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, "GONE", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
