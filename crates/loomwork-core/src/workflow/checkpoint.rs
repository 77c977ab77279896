//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps `WorkflowRepository` to provide a higher-level API for recording
//! execution- and step-level transitions, plus the schedule and approval
//! side-state the pause/resume and approval coordinators touch. Every state
//! transition is persisted before the executor moves forward, so a crashed
//! engine can resume from the last completed step instead of replaying a run
//! from the start.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use loomwork_types::workflow::{
    ApprovalStatus, StepExecution, StepExecutionStatus, WorkflowExecution,
    WorkflowExecutionStatus,
};

use crate::repository::workflow::WorkflowRepository;

/// Manages durable execution checkpoints for workflow runs.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory mock, etc.).
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: R,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Execution-level checkpoints
    // -----------------------------------------------------------------------

    pub async fn checkpoint_execution_start(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), CheckpointError> {
        self.repo
            .create_execution(execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(execution_id = %execution.id, "checkpointed execution start");
        Ok(())
    }

    /// CAS-guarded status transition. Fails with
    /// `CheckpointError::StaleTransition` if the row's current status no
    /// longer matches `expected`.
    pub async fn checkpoint_execution_status(
        &self,
        id: Uuid,
        expected: WorkflowExecutionStatus,
        next: WorkflowExecutionStatus,
    ) -> Result<(), CheckpointError> {
        self.repo
            .cas_execution_status(&id, expected, next)
            .await
            .map_err(|e| match e {
                loomwork_types::error::RepositoryError::Conflict(msg) => {
                    CheckpointError::StaleTransition(msg)
                }
                other => CheckpointError::Repository(other.to_string()),
            })?;

        tracing::debug!(execution_id = %id, ?expected, ?next, "checkpointed execution status");
        Ok(())
    }

    /// Persist the full execution row, e.g. after the context or pause/resume
    /// fields change in memory.
    pub async fn checkpoint_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_execution(execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn get_execution(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> Result<WorkflowExecution, CheckpointError> {
        self.repo
            .get_execution(&org_id, &id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(id))
    }

    // -----------------------------------------------------------------------
    // Step-level checkpoints
    // -----------------------------------------------------------------------

    pub async fn checkpoint_step_start(
        &self,
        execution_id: Uuid,
        step_id: &str,
        step_type: &str,
        input: Option<&Value>,
    ) -> Result<Uuid, CheckpointError> {
        let id = Uuid::now_v7();
        let step = StepExecution {
            id,
            execution_id,
            step_id: step_id.to_string(),
            step_type: step_type.to_string(),
            status: StepExecutionStatus::Running,
            input: input.cloned(),
            output: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
            error_message: None,
        };

        self.repo
            .create_step_execution(&step)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(execution_id = %execution_id, step_id, %id, "checkpointed step start");
        Ok(id)
    }

    pub async fn checkpoint_step_complete(
        &self,
        step_execution_id: Uuid,
        output: Option<&Value>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_step_execution(&step_execution_id, StepExecutionStatus::Completed, output, None)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(%step_execution_id, "checkpointed step complete");
        Ok(())
    }

    pub async fn checkpoint_step_failed(
        &self,
        step_execution_id: Uuid,
        error: &str,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_step_execution(&step_execution_id, StepExecutionStatus::Failed, None, Some(error))
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(%step_execution_id, error, "checkpointed step failed");
        Ok(())
    }

    pub async fn checkpoint_step_skipped(
        &self,
        execution_id: Uuid,
        step_id: &str,
        step_type: &str,
    ) -> Result<(), CheckpointError> {
        let step = StepExecution {
            id: Uuid::now_v7(),
            execution_id,
            step_id: step_id.to_string(),
            step_type: step_type.to_string(),
            status: StepExecutionStatus::Skipped,
            input: None,
            output: None,
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            duration_ms: Some(0),
            error_message: None,
        };

        self.repo
            .create_step_execution(&step)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(execution_id = %execution_id, step_id, "checkpointed step skipped");
        Ok(())
    }

    pub async fn get_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, CheckpointError> {
        self.repo
            .list_step_executions(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Schedule checkpoints
    // -----------------------------------------------------------------------

    /// CAS-advance a schedule's `next_trigger_at` after firing it. Returns
    /// `false` if another poller already advanced the row past
    /// `expected_current`.
    pub async fn touch_schedule(
        &self,
        schedule_id: Uuid,
        expected_current: DateTime<Utc>,
        last_triggered_at: DateTime<Utc>,
        next_trigger_at: DateTime<Utc>,
    ) -> Result<bool, CheckpointError> {
        self.repo
            .update_execution_next_trigger(&schedule_id, expected_current, last_triggered_at, next_trigger_at)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Approval checkpoints
    // -----------------------------------------------------------------------

    /// CAS-guarded decision on a pending approval request. Returns `false` if
    /// the request was already decided by another caller.
    pub async fn record_approval_decision(
        &self,
        request_id: Uuid,
        status: ApprovalStatus,
        approver_id: Option<Uuid>,
        decision_reason: Option<&str>,
    ) -> Result<bool, CheckpointError> {
        self.repo
            .decide_approval_request(&request_id, status, approver_id, decision_reason)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("stale transition: {0}")]
    StaleTransition(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
