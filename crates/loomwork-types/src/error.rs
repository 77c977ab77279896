use thiserror::Error;

/// Errors from repository operations (used by trait definitions in loomwork-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// The cross-component error taxonomy for the workflow engine. Every
/// component-specific error enum (`ValidationError`, `EvalError`,
/// `ExecutorError`, `SchedulerError`, `ApprovalError`, ...) maps into one of
/// these via a `kind()` method, so the transport layer can pick a status
/// class without matching on component-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    Validation,
    NotFound,
    Conflict,
    Evaluation,
    ActionDispatch,
    Timeout,
    Stale,
    Cancelled,
    Internal,
}

impl EngineErrorKind {
    /// Whether an error of this kind is ever eligible for step retry.
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Validation | Self::Cancelled | Self::NotFound)
    }
}

/// Top-level engine error. Wraps a typed, matchable source plus the error
/// kind it maps to, and carries a bounded human description for persistence
/// into `error_message` fields.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl WorkflowError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Internal, message)
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => WorkflowError::not_found(err.to_string()),
            RepositoryError::Conflict(_) => WorkflowError::conflict(err.to_string()),
            RepositoryError::Connection | RepositoryError::Query(_) => {
                WorkflowError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn engine_error_kind_retriable() {
        assert!(!EngineErrorKind::Validation.is_retriable());
        assert!(!EngineErrorKind::Cancelled.is_retriable());
        assert!(EngineErrorKind::Timeout.is_retriable());
        assert!(EngineErrorKind::ActionDispatch.is_retriable());
    }

    #[test]
    fn workflow_error_from_repository_error() {
        let err: WorkflowError = RepositoryError::NotFound.into();
        assert_eq!(err.kind(), EngineErrorKind::NotFound);

        let err: WorkflowError = RepositoryError::Conflict("stale version".to_string()).into();
        assert_eq!(err.kind(), EngineErrorKind::Conflict);
    }
}
