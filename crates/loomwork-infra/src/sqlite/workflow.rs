//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `loomwork-core` using sqlx with
//! split read/write pools. Workflow definitions are stored as JSON blobs;
//! executions, step executions, schedules, and approval requests each get
//! their own table. Every query is scoped by `org_id` where the trait
//! requires it.

use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_types::error::RepositoryError;
use loomwork_types::workflow::{
    ApprovalRequest, ApprovalStatus, StepExecution, StepExecutionStatus, Workflow,
    WorkflowExecution, WorkflowExecutionResult, WorkflowExecutionStatus, WorkflowSchedule,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn status_str<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_value(value)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("status did not serialize to a string".to_string()))
}

fn parse_status<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid {what}: {raw}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    org_id: String,
    workflow_id: String,
    version: i64,
    name: String,
    description: Option<String>,
    definition: String,
    enabled: i64,
    tags: String,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            workflow_id: row.try_get("workflow_id")?,
            version: row.try_get("version")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            definition: row.try_get("definition")?,
            enabled: row.try_get("enabled")?,
            tags: row.try_get("tags")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            org_id: parse_uuid(&self.org_id)?,
            workflow_id: self.workflow_id,
            version: self.version as u32,
            name: self.name,
            description: self.description,
            definition: serde_json::from_str(&self.definition)
                .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))?,
            enabled: self.enabled != 0,
            tags: serde_json::from_str(&self.tags)
                .map_err(|e| RepositoryError::Query(format!("invalid tags JSON: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ExecutionRow {
    id: String,
    org_id: String,
    execution_id: String,
    workflow_id: String,
    trigger_event: String,
    trigger_payload: Option<String>,
    context: String,
    status: String,
    result: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    paused_at: Option<String>,
    paused_reason: Option<String>,
    paused_step_id: Option<String>,
    next_step_id: Option<String>,
    resume_data: String,
    resume_count: i64,
    last_resumed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            trigger_event: row.try_get("trigger_event")?,
            trigger_payload: row.try_get("trigger_payload")?,
            context: row.try_get("context")?,
            status: row.try_get("status")?,
            result: row.try_get("result")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            error_message: row.try_get("error_message")?,
            paused_at: row.try_get("paused_at")?,
            paused_reason: row.try_get("paused_reason")?,
            paused_step_id: row.try_get("paused_step_id")?,
            next_step_id: row.try_get("next_step_id")?,
            resume_data: row.try_get("resume_data")?,
            resume_count: row.try_get("resume_count")?,
            last_resumed_at: row.try_get("last_resumed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        let trigger_payload = self
            .trigger_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid trigger_payload: {e}")))?;

        let result = self
            .result
            .as_deref()
            .map(|s| parse_status::<WorkflowExecutionResult>(s, "execution result"))
            .transpose()?;

        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            org_id: parse_uuid(&self.org_id)?,
            execution_id: self.execution_id,
            workflow_id: parse_uuid(&self.workflow_id)?,
            trigger_event: self.trigger_event,
            trigger_payload,
            context: serde_json::from_str(&self.context)
                .map_err(|e| RepositoryError::Query(format!("invalid context JSON: {e}")))?,
            status: parse_status(&self.status, "execution status")?,
            result,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            duration_ms: self.duration_ms.map(|d| d as u64),
            error_message: self.error_message,
            paused_at: self.paused_at.as_deref().map(parse_datetime).transpose()?,
            paused_reason: self.paused_reason,
            paused_step_id: self.paused_step_id,
            next_step_id: self.next_step_id,
            resume_data: serde_json::from_str(&self.resume_data)
                .map_err(|e| RepositoryError::Query(format!("invalid resume_data JSON: {e}")))?,
            resume_count: self.resume_count as u32,
            last_resumed_at: self.last_resumed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct StepExecutionRow {
    id: String,
    execution_id: String,
    step_id: String,
    step_type: String,
    status: String,
    input: Option<String>,
    output: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
}

impl StepExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_id: row.try_get("step_id")?,
            step_type: row.try_get("step_type")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            error_message: row.try_get("error_message")?,
        })
    }

    fn into_step_execution(self) -> Result<StepExecution, RepositoryError> {
        Ok(StepExecution {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            step_id: self.step_id,
            step_type: self.step_type,
            status: parse_status(&self.status, "step execution status")?,
            input: self
                .input
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("invalid step input: {e}")))?,
            output: self
                .output
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            duration_ms: self.duration_ms.map(|d| d as u64),
            error_message: self.error_message,
        })
    }
}

struct ScheduleRow {
    id: String,
    org_id: String,
    workflow_id: String,
    cron_expression: String,
    timezone: String,
    enabled: i64,
    last_triggered_at: Option<String>,
    next_trigger_at: String,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            org_id: row.try_get("org_id")?,
            workflow_id: row.try_get("workflow_id")?,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            enabled: row.try_get("enabled")?,
            last_triggered_at: row.try_get("last_triggered_at")?,
            next_trigger_at: row.try_get("next_trigger_at")?,
        })
    }

    fn into_schedule(self) -> Result<WorkflowSchedule, RepositoryError> {
        Ok(WorkflowSchedule {
            id: parse_uuid(&self.id)?,
            org_id: parse_uuid(&self.org_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            enabled: self.enabled != 0,
            last_triggered_at: self.last_triggered_at.as_deref().map(parse_datetime).transpose()?,
            next_trigger_at: parse_datetime(&self.next_trigger_at)?,
        })
    }
}

struct ApprovalRow {
    id: String,
    request_id: String,
    org_id: String,
    execution_id: String,
    entity_type: String,
    entity_id: String,
    requester_id: Option<String>,
    approver_role: String,
    approver_id: Option<String>,
    status: String,
    reason: Option<String>,
    decision_reason: Option<String>,
    requested_at: String,
    decided_at: Option<String>,
    expires_at: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            org_id: row.try_get("org_id")?,
            execution_id: row.try_get("execution_id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            requester_id: row.try_get("requester_id")?,
            approver_role: row.try_get("approver_role")?,
            approver_id: row.try_get("approver_id")?,
            status: row.try_get("status")?,
            reason: row.try_get("reason")?,
            decision_reason: row.try_get("decision_reason")?,
            requested_at: row.try_get("requested_at")?,
            decided_at: row.try_get("decided_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn into_approval(self) -> Result<ApprovalRequest, RepositoryError> {
        Ok(ApprovalRequest {
            id: parse_uuid(&self.id)?,
            request_id: self.request_id,
            org_id: parse_uuid(&self.org_id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            requester_id: self.requester_id.as_deref().map(parse_uuid).transpose()?,
            approver_role: self.approver_role,
            approver_id: self.approver_id.as_deref().map(parse_uuid).transpose()?,
            status: parse_status(&self.status, "approval status")?,
            reason: self.reason,
            decision_reason: self.decision_reason,
            requested_at: parse_datetime(&self.requested_at)?,
            decided_at: self.decided_at.as_deref().map(parse_datetime).transpose()?,
            expires_at: self.expires_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let definition_json = to_json(&workflow.definition)?;
        let tags_json = to_json(&workflow.tags)?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, org_id, workflow_id, version, name, description, definition, enabled,
                tags, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.org_id.to_string())
        .bind(&workflow.workflow_id)
        .bind(workflow.version as i64)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&definition_json)
        .bind(workflow.enabled as i64)
        .bind(&tags_json)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_workflow(&self, org_id: &Uuid, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE org_id = ? AND id = ?")
            .bind(org_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_workflow()?,
            )),
            None => Ok(None),
        }
    }

    async fn get_latest_workflow(
        &self,
        org_id: &Uuid,
        workflow_id: &str,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflows WHERE org_id = ? AND workflow_id = ? AND enabled = 1 \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(org_id.to_string())
        .bind(workflow_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                WorkflowRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_workflow()?,
            )),
            None => Ok(None),
        }
    }

    async fn list_workflows(&self, org_id: &Uuid) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE org_id = ? ORDER BY workflow_id ASC, version DESC",
        )
        .bind(org_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                WorkflowRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_workflow()?,
            );
        }
        Ok(out)
    }

    async fn get_enabled_workflows_by_event_type(
        &self,
        org_id: &Uuid,
        event_type: &str,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        // Trigger is stored inside the JSON `definition` blob, so filtering by
        // event type happens after the JSON decode rather than in SQL.
        let workflows = self.list_workflows(org_id).await?;
        Ok(workflows
            .into_iter()
            .filter(|w| w.enabled)
            .filter(|w| match &w.definition.trigger {
                loomwork_types::workflow::Trigger::Event { name } => name == event_type,
                _ => false,
            })
            .collect())
    }

    async fn set_workflow_enabled(&self, org_id: &Uuid, id: &Uuid, enabled: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET enabled = ? WHERE org_id = ? AND id = ?")
            .bind(enabled as i64)
            .bind(org_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_workflow(&self, org_id: &Uuid, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE org_id = ? AND id = ?")
            .bind(org_id.to_string())
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let trigger_payload = execution
            .trigger_payload
            .as_ref()
            .map(to_json)
            .transpose()?;
        let context = to_json(&execution.context)?;
        let status = status_str(&execution.status)?;
        let resume_data = to_json(&execution.resume_data)?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, org_id, execution_id, workflow_id, trigger_event, trigger_payload, context,
                status, started_at, paused_step_id, next_step_id, resume_data, resume_count)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.org_id.to_string())
        .bind(&execution.execution_id)
        .bind(execution.workflow_id.to_string())
        .bind(&execution.trigger_event)
        .bind(&trigger_payload)
        .bind(&context)
        .bind(&status)
        .bind(format_datetime(&execution.started_at))
        .bind(&execution.paused_step_id)
        .bind(&execution.next_step_id)
        .bind(&resume_data)
        .bind(execution.resume_count as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_execution(&self, org_id: &Uuid, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE org_id = ? AND id = ?")
            .bind(org_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_execution()?,
            )),
            None => Ok(None),
        }
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let trigger_payload = execution
            .trigger_payload
            .as_ref()
            .map(to_json)
            .transpose()?;
        let context = to_json(&execution.context)?;
        let status = status_str(&execution.status)?;
        let result = execution.result.as_ref().map(status_str).transpose()?;
        let resume_data = to_json(&execution.resume_data)?;

        let affected = sqlx::query(
            r#"UPDATE workflow_executions SET
                 trigger_payload = ?, context = ?, status = ?, result = ?, completed_at = ?,
                 duration_ms = ?, error_message = ?, paused_at = ?, paused_reason = ?,
                 paused_step_id = ?, next_step_id = ?, resume_data = ?, resume_count = ?,
                 last_resumed_at = ?
               WHERE id = ?"#,
        )
        .bind(&trigger_payload)
        .bind(&context)
        .bind(&status)
        .bind(&result)
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(execution.duration_ms.map(|d| d as i64))
        .bind(&execution.error_message)
        .bind(execution.paused_at.as_ref().map(format_datetime))
        .bind(&execution.paused_reason)
        .bind(&execution.paused_step_id)
        .bind(&execution.next_step_id)
        .bind(&resume_data)
        .bind(execution.resume_count as i64)
        .bind(execution.last_resumed_at.as_ref().map(format_datetime))
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if affected.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn cas_execution_status(
        &self,
        id: &Uuid,
        expected: WorkflowExecutionStatus,
        next: WorkflowExecutionStatus,
    ) -> Result<(), RepositoryError> {
        let expected_str = status_str(&expected)?;
        let next_str = status_str(&next)?;

        let result = sqlx::query("UPDATE workflow_executions SET status = ? WHERE id = ? AND status = ?")
            .bind(&next_str)
            .bind(id.to_string())
            .bind(&expected_str)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT status FROM workflow_executions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

            return match exists {
                Some(row) => {
                    let current: String =
                        row.try_get("status").map_err(|e| RepositoryError::Query(e.to_string()))?;
                    Err(RepositoryError::Conflict(format!(
                        "expected status '{expected_str}', found '{current}'"
                    )))
                }
                None => Err(RepositoryError::NotFound),
            };
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        org_id: &Uuid,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE org_id = ? AND workflow_id = ? \
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(org_id.to_string())
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                ExecutionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_execution()?,
            );
        }
        Ok(out)
    }

    async fn get_paused_executions(&self, limit: u32) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE status = 'paused' ORDER BY paused_at ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                ExecutionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_execution()?,
            );
        }
        Ok(out)
    }

    async fn create_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
        let status = status_str(&step.status)?;
        let input = step.input.as_ref().map(to_json).transpose()?;
        let output = step.output.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, step_type, status, input, output, started_at,
                completed_at, duration_ms, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.execution_id.to_string())
        .bind(&step.step_id)
        .bind(&step.step_type)
        .bind(&status)
        .bind(&input)
        .bind(&output)
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(step.duration_ms.map(|d| d as i64))
        .bind(&step.error_message)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_step_execution(
        &self,
        step_execution_id: &Uuid,
        status: StepExecutionStatus,
        output: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let status_str = status_str(&status)?;
        let output_str = output.map(to_json).transpose()?;
        let is_terminal = matches!(
            status,
            StepExecutionStatus::Completed | StepExecutionStatus::Failed | StepExecutionStatus::Skipped
        );
        let completed_at = is_terminal.then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            "UPDATE step_executions SET status = ?, output = COALESCE(?, output), \
             error_message = COALESCE(?, error_message), completed_at = COALESCE(?, completed_at) \
             WHERE id = ?",
        )
        .bind(&status_str)
        .bind(&output_str)
        .bind(error)
        .bind(&completed_at)
        .bind(step_execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(&self, execution_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE execution_id = ? ORDER BY started_at ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                StepExecutionRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_step_execution()?,
            );
        }
        Ok(out)
    }

    async fn save_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_schedules
               (id, org_id, workflow_id, cron_expression, timezone, enabled, last_triggered_at,
                next_trigger_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 cron_expression = excluded.cron_expression,
                 timezone = excluded.timezone,
                 enabled = excluded.enabled,
                 last_triggered_at = excluded.last_triggered_at,
                 next_trigger_at = excluded.next_trigger_at"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.org_id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.enabled as i64)
        .bind(schedule.last_triggered_at.as_ref().map(format_datetime))
        .bind(format_datetime(&schedule.next_trigger_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_due_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let rows = sqlx::query(
            "SELECT * FROM workflow_schedules WHERE enabled = 1 AND next_trigger_at <= ? \
             ORDER BY next_trigger_at ASC",
        )
        .bind(&now)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                ScheduleRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_schedule()?,
            );
        }
        Ok(out)
    }

    async fn update_execution_next_trigger(
        &self,
        schedule_id: &Uuid,
        expected_current: DateTime<Utc>,
        last_triggered_at: DateTime<Utc>,
        next_trigger_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_schedules SET last_triggered_at = ?, next_trigger_at = ? \
             WHERE id = ? AND next_trigger_at = ?",
        )
        .bind(format_datetime(&last_triggered_at))
        .bind(format_datetime(&next_trigger_at))
        .bind(schedule_id.to_string())
        .bind(format_datetime(&expected_current))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_approval_request(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
        let status = status_str(&request.status)?;

        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, request_id, org_id, execution_id, entity_type, entity_id, requester_id,
                approver_role, approver_id, status, reason, decision_reason, requested_at,
                decided_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(request.id.to_string())
        .bind(&request.request_id)
        .bind(request.org_id.to_string())
        .bind(request.execution_id.to_string())
        .bind(&request.entity_type)
        .bind(&request.entity_id)
        .bind(request.requester_id.map(|id| id.to_string()))
        .bind(&request.approver_role)
        .bind(request.approver_id.map(|id| id.to_string()))
        .bind(&status)
        .bind(&request.reason)
        .bind(&request.decision_reason)
        .bind(format_datetime(&request.requested_at))
        .bind(request.decided_at.as_ref().map(format_datetime))
        .bind(request.expires_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_approval_request(&self, org_id: &Uuid, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE org_id = ? AND id = ?")
            .bind(org_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(
                ApprovalRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_approval()?,
            )),
            None => Ok(None),
        }
    }

    async fn decide_approval_request(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver_id: Option<Uuid>,
        decision_reason: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let status_str = status_str(&status)?;
        let pending_str = status_str_literal(ApprovalStatus::Pending)?;

        let result = sqlx::query(
            "UPDATE approval_requests SET status = ?, approver_id = ?, decision_reason = ?, \
             decided_at = ? WHERE id = ? AND status = ?",
        )
        .bind(&status_str)
        .bind(approver_id.map(|id| id.to_string()))
        .bind(decision_reason)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(&pending_str)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_approvals(&self, org_id: &Uuid) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let pending_str = status_str_literal(ApprovalStatus::Pending)?;
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE org_id = ? AND status = ? ORDER BY requested_at ASC",
        )
        .bind(org_id.to_string())
        .bind(&pending_str)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(
                ApprovalRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_approval()?,
            );
        }
        Ok(out)
    }
}

fn status_str_literal<T: serde::Serialize>(value: T) -> Result<String, RepositoryError> {
    status_str(&value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use loomwork_types::workflow::{
        ActionSpec, StepBody, Trigger, WorkflowDefinition,
    };
    use serde_json::json;
    use std::collections::HashMap;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_workflow(org_id: Uuid) -> Workflow {
        let now = Utc::now();
        Workflow {
            id: Uuid::now_v7(),
            org_id,
            workflow_id: "wf-onboard".to_string(),
            version: 1,
            name: "Onboard new vendor".to_string(),
            description: Some("Approve and provision a new vendor".to_string()),
            definition: WorkflowDefinition {
                trigger: Trigger::Event {
                    name: "vendor.created".to_string(),
                },
                context_load: vec![],
                steps: vec![loomwork_types::workflow::Step {
                    id: "allow".to_string(),
                    name: None,
                    body: StepBody::Action {
                        action: ActionSpec::Allow { reason: None },
                    },
                    next: None,
                    timeout_secs: None,
                    retry: None,
                    metadata: HashMap::new(),
                }],
                global_timeout_secs: None,
            },
            enabled: true,
            tags: vec!["onboarding".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_execution(org_id: Uuid, workflow_id: Uuid) -> WorkflowExecution {
        let id = Uuid::now_v7();
        WorkflowExecution {
            id,
            org_id,
            execution_id: WorkflowExecution::public_id(id),
            workflow_id,
            trigger_event: "vendor.created".to_string(),
            trigger_payload: Some(json!({"vendor": "acme"})),
            context: json!({"steps": {}, "variables": {}}),
            status: WorkflowExecutionStatus::Running,
            result: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            paused_at: None,
            paused_reason: None,
            paused_step_id: None,
            next_step_id: Some("allow".to_string()),
            resume_data: json!({}),
            resume_count: 0,
            last_resumed_at: None,
        }
    }

    #[tokio::test]
    async fn save_and_get_workflow() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);

        repo.save_workflow(&workflow).await.unwrap();

        let loaded = repo.get_workflow(&org_id, &workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Onboard new vendor");
        assert_eq!(loaded.definition.steps.len(), 1);
        assert_eq!(loaded.tags, vec!["onboarding".to_string()]);
    }

    #[tokio::test]
    async fn get_latest_workflow_picks_highest_version() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let mut v1 = sample_workflow(org_id);
        repo.save_workflow(&v1).await.unwrap();

        let mut v2 = sample_workflow(org_id);
        v2.id = Uuid::now_v7();
        v2.version = 2;
        v1.version = 1;
        repo.save_workflow(&v2).await.unwrap();

        let latest = repo
            .get_latest_workflow(&org_id, "wf-onboard")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn get_enabled_workflows_by_event_type_filters_trigger() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();

        let matches = repo
            .get_enabled_workflows_by_event_type(&org_id, "vendor.created")
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);

        let none = repo
            .get_enabled_workflows_by_event_type(&org_id, "vendor.deleted")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_workflow_is_org_scoped() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let other_org = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();

        let deleted_wrong_org = repo.delete_workflow(&other_org, &workflow.id).await.unwrap();
        assert!(!deleted_wrong_org);

        let deleted = repo.delete_workflow(&org_id, &workflow.id).await.unwrap();
        assert!(deleted);
    }

    #[tokio::test]
    async fn create_and_get_execution() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();

        let execution = sample_execution(org_id, workflow.id);
        repo.create_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&org_id, &execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowExecutionStatus::Running);
        assert_eq!(loaded.next_step_id.as_deref(), Some("allow"));
    }

    #[tokio::test]
    async fn cas_execution_status_rejects_mismatched_expected() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();
        let execution = sample_execution(org_id, workflow.id);
        repo.create_execution(&execution).await.unwrap();

        let err = repo
            .cas_execution_status(
                &execution.id,
                WorkflowExecutionStatus::Paused,
                WorkflowExecutionStatus::Completed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        repo.cas_execution_status(
            &execution.id,
            WorkflowExecutionStatus::Running,
            WorkflowExecutionStatus::Completed,
        )
        .await
        .unwrap();

        let loaded = repo.get_execution(&org_id, &execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn update_execution_persists_pause_fields() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();
        let mut execution = sample_execution(org_id, workflow.id);
        repo.create_execution(&execution).await.unwrap();

        execution.status = WorkflowExecutionStatus::Paused;
        execution.paused_at = Some(Utc::now());
        execution.paused_reason = Some("wait:payment.confirmed".to_string());
        execution.paused_step_id = Some("allow".to_string());
        repo.update_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&org_id, &execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowExecutionStatus::Paused);
        assert_eq!(loaded.paused_reason.as_deref(), Some("wait:payment.confirmed"));
    }

    #[tokio::test]
    async fn get_paused_executions_filters_by_status() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();

        let mut paused = sample_execution(org_id, workflow.id);
        paused.status = WorkflowExecutionStatus::Paused;
        paused.paused_at = Some(Utc::now());
        repo.create_execution(&paused).await.unwrap();

        let running = sample_execution(org_id, workflow.id);
        repo.create_execution(&running).await.unwrap();

        let found = repo.get_paused_executions(10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, paused.id);
    }

    #[tokio::test]
    async fn step_execution_lifecycle() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();
        let execution = sample_execution(org_id, workflow.id);
        repo.create_execution(&execution).await.unwrap();

        let step = StepExecution {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            step_id: "allow".to_string(),
            step_type: "action".to_string(),
            status: StepExecutionStatus::Running,
            input: Some(json!({"foo": "bar"})),
            output: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_ms: None,
            error_message: None,
        };
        repo.create_step_execution(&step).await.unwrap();

        let output = json!({"result": "allowed"});
        repo.update_step_execution(&step.id, StepExecutionStatus::Completed, Some(&output), None)
            .await
            .unwrap();

        let steps = repo.list_step_executions(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepExecutionStatus::Completed);
        assert!(steps[0].output.is_some());
        assert!(steps[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn schedule_round_trip_and_cas_trigger() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();

        let now = Utc::now();
        let schedule = WorkflowSchedule {
            id: Uuid::now_v7(),
            org_id,
            workflow_id: workflow.id,
            cron_expression: "0 0 * * *".to_string(),
            timezone: "UTC".to_string(),
            enabled: true,
            last_triggered_at: None,
            next_trigger_at: now,
        };
        repo.save_schedule(&schedule).await.unwrap();

        let due = repo.get_due_schedules().await.unwrap();
        assert_eq!(due.len(), 1);

        let next = now + chrono::Duration::days(1);
        let applied = repo
            .update_execution_next_trigger(&schedule.id, now, now, next)
            .await
            .unwrap();
        assert!(applied);

        // A second CAS against the now-stale `now` must fail.
        let stale = repo
            .update_execution_next_trigger(&schedule.id, now, now, next)
            .await
            .unwrap();
        assert!(!stale);
    }

    #[tokio::test]
    async fn approval_request_lifecycle() {
        let pool = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let org_id = Uuid::now_v7();
        let workflow = sample_workflow(org_id);
        repo.save_workflow(&workflow).await.unwrap();
        let execution = sample_execution(org_id, workflow.id);
        repo.create_execution(&execution).await.unwrap();

        let request_id = Uuid::now_v7();
        let request = ApprovalRequest {
            id: request_id,
            request_id: ApprovalRequest::public_id(request_id),
            org_id,
            execution_id: execution.id,
            entity_type: "workflow_step".to_string(),
            entity_id: "allow".to_string(),
            requester_id: None,
            approver_role: "finance_manager".to_string(),
            approver_id: None,
            status: ApprovalStatus::Pending,
            reason: Some("vendor payout over threshold".to_string()),
            decision_reason: None,
            requested_at: Utc::now(),
            decided_at: None,
            expires_at: None,
        };
        repo.create_approval_request(&request).await.unwrap();

        let pending = repo.list_pending_approvals(&org_id).await.unwrap();
        assert_eq!(pending.len(), 1);

        let approver_id = Uuid::now_v7();
        let decided = repo
            .decide_approval_request(&request_id, ApprovalStatus::Approved, Some(approver_id), Some("looks good"))
            .await
            .unwrap();
        assert!(decided);

        // Deciding an already-decided request is a no-op CAS failure.
        let decided_again = repo
            .decide_approval_request(&request_id, ApprovalStatus::Rejected, Some(approver_id), None)
            .await
            .unwrap();
        assert!(!decided_again);

        let loaded = repo.get_approval_request(&org_id, &request_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ApprovalStatus::Approved);
        assert_eq!(loaded.decision_reason.as_deref(), Some("looks good"));
    }
}
