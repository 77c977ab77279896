//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions, executions, step
//! executions, cron schedules, and approval requests. The infrastructure
//! layer (`loomwork-infra`) implements this trait with SQLite persistence.
//! Every operation is scoped by `org_id` -- the repository never trusts an
//! unscoped entity id alone to authorize a read or write.

use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{
    ApprovalRequest, ApprovalStatus, StepExecution, StepExecutionStatus, Workflow,
    WorkflowExecution, WorkflowExecutionStatus, WorkflowSchedule,
};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows (versioned definitions)
    // -----------------------------------------------------------------------

    /// Insert a new version of a workflow (does not overwrite prior versions).
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        org_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Get the latest enabled version of a workflow by its stable external id.
    fn get_latest_workflow(
        &self,
        org_id: &Uuid,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    fn list_workflows(
        &self,
        org_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Enabled workflows in `org_id` whose trigger is `Trigger::Event { name: event_type }`.
    fn get_enabled_workflows_by_event_type(
        &self,
        org_id: &Uuid,
        event_type: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    fn set_workflow_enabled(
        &self,
        org_id: &Uuid,
        id: &Uuid,
        enabled: bool,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn delete_workflow(
        &self,
        org_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        org_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Replace the entire execution row; used by the engine and the
    /// pause/resume coordinator after they've applied a CAS-guarded mutation
    /// in memory.
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Compare-and-swap the status column. Fails with
    /// `RepositoryError::Conflict` if the row's current status does not
    /// equal `expected`.
    fn cas_execution_status(
        &self,
        id: &Uuid,
        expected: WorkflowExecutionStatus,
        next: WorkflowExecutionStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_executions(
        &self,
        org_id: &Uuid,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Executions currently `Paused`, across all orgs, up to `limit`. Used
    /// by the wait-timeout sweep.
    fn get_paused_executions(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    fn create_step_execution(
        &self,
        step: &StepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_step_execution(
        &self,
        step_execution_id: &Uuid,
        status: StepExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    fn save_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Schedules with `next_trigger_at <= now`, across all orgs.
    fn get_due_schedules(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// CAS on `next_trigger_at`: only updates the row if its current
    /// `next_trigger_at` still equals `expected_current`, so two scheduler
    /// polls racing on the same tick fire the workflow at most once.
    fn update_execution_next_trigger(
        &self,
        schedule_id: &Uuid,
        expected_current: chrono::DateTime<chrono::Utc>,
        last_triggered_at: chrono::DateTime<chrono::Utc>,
        next_trigger_at: chrono::DateTime<chrono::Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    fn create_approval_request(
        &self,
        request: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval_request(
        &self,
        org_id: &Uuid,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// CAS on status: only applies the decision if the row's current status
    /// is still `Pending`.
    fn decide_approval_request(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver_id: Option<Uuid>,
        decision_reason: Option<&str>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn list_pending_approvals(
        &self,
        org_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
