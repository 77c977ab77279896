//! Event types for the loomwork workflow event bus.
//!
//! `WorkflowEvent` is broadcast at every execution and approval lifecycle
//! transition. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels; the audit sink is modeled as one more best-effort
//! subscriber of the same bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted during workflow execution, pause/resume, approval, and
/// scheduling. Used by the event bus to communicate lifecycle transitions to
/// subscribers (audit sink, CLI, HTTP streaming handlers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow execution has started.
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        trigger_event: String,
    },

    /// A workflow step has started executing.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: String,
    },

    /// A workflow step completed successfully.
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    /// A workflow step failed.
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
        will_retry: bool,
    },

    /// An execution has been paused (approval gate or `wait` step).
    ExecutionPaused {
        execution_id: Uuid,
        step_id: Option<String>,
        reason: String,
    },

    /// An execution has resumed out of pause.
    ExecutionResumed {
        execution_id: Uuid,
        resume_count: u32,
    },

    /// A workflow execution completed successfully.
    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: Uuid,
        duration_ms: u64,
        steps_completed: u32,
    },

    /// A workflow execution failed.
    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        error: String,
    },

    /// A workflow execution was cancelled.
    ExecutionCancelled { execution_id: Uuid, reason: String },

    /// An approval request was created.
    ApprovalCreated {
        approval_id: Uuid,
        execution_id: Uuid,
        approver_role: String,
    },

    /// An approval request was decided (approved or rejected).
    ApprovalDecided {
        approval_id: Uuid,
        execution_id: Uuid,
        approved: bool,
    },

    /// An approval request expired without a decision.
    ApprovalExpired {
        approval_id: Uuid,
        execution_id: Uuid,
    },

    /// A cron schedule fired, producing a synthetic trigger event.
    ScheduleFired {
        schedule_id: Uuid,
        workflow_id: Uuid,
        next_trigger_at: chrono::DateTime<chrono::Utc>,
    },
}

impl WorkflowEvent {
    /// Returns the execution_id from variants that carry one, or None for
    /// schedule-scoped events that precede execution creation.
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::ExecutionPaused { execution_id, .. }
            | WorkflowEvent::ExecutionResumed { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id, .. }
            | WorkflowEvent::ApprovalCreated { execution_id, .. }
            | WorkflowEvent::ApprovalDecided { execution_id, .. }
            | WorkflowEvent::ApprovalExpired { execution_id, .. } => Some(*execution_id),

            WorkflowEvent::ScheduleFired { .. } => None,
        }
    }
}
