//! Workflow domain types for the loomwork orchestration engine.
//!
//! Defines the canonical intermediate representation for a workflow
//! definition (condition/action/execute/parallel/foreach/wait steps), the
//! execution and step-execution audit records, schedules, and approval
//! requests. YAML is the on-disk exchange format; `WorkflowDefinition` is
//! the single source of truth for a workflow's shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow (persisted record)
// ---------------------------------------------------------------------------

/// A persisted, versioned workflow belonging to one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 primary key.
    pub id: Uuid,
    /// Tenant this workflow belongs to.
    pub org_id: Uuid,
    /// Stable external identifier (unique per org, across versions).
    pub workflow_id: String,
    /// Monotonic version number for this `workflow_id`.
    pub version: u32,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The parsed, validated DSL tree.
    pub definition: WorkflowDefinition,
    /// Whether this version is eligible for routing/scheduling.
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Workflow Definition (canonical IR)
// ---------------------------------------------------------------------------

/// The canonical workflow definition: trigger, context preload hints, and
/// the step DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub trigger: Trigger,
    /// Keys the engine should preload into context before step 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_load: Vec<String>,
    pub steps: Vec<Step>,
    /// Overall wall-clock budget for one execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout_secs: Option<u64>,
}

/// How a workflow execution begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when a matching event is routed to this org.
    Event { name: String },
    /// Fires on a cron cadence (see `WorkflowSchedule`).
    Schedule { cron: String },
    /// Fires only via an explicit manual start call.
    Manual,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the enclosing step list.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub body: StepBody,
    /// Next step to run when this step does not itself dictate routing
    /// (conditions use `on_true`/`on_false`; terminal actions ignore it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Step-type-specific payload, internally tagged by `type`:
/// ```yaml
/// type: condition
/// expression: { field: order.total, operator: gt, value: 1000 }
/// on_true: block
/// on_false: allow
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepBody {
    Condition {
        expression: Condition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_true: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_false: Option<String>,
    },
    Action {
        action: ActionSpec,
    },
    Execute {
        actions: Vec<ExecuteAction>,
    },
    Parallel {
        steps: Vec<Step>,
        #[serde(default)]
        strategy: ParallelStrategy,
    },
    Foreach {
        items_field: String,
        item_var: String,
        steps: Vec<Step>,
        #[serde(default)]
        strategy: ParallelStrategy,
    },
    Wait {
        event: String,
        timeout_secs: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_timeout: Option<String>,
    },
}

/// Terminal or pass-through marker used by `StepBody::Action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSpec {
    Allow {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Block {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RequireApproval {
        approver_role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    Wait {
        event: String,
        timeout_secs: u64,
    },
    Execute,
}

/// How a `parallel`/`foreach` step's children are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParallelStrategy {
    #[default]
    AllMustPass,
    AnyCanPass,
    BestEffort,
}

/// A recursive boolean condition tree evaluated against the execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Leaf {
        field: String,
        operator: ConditionOperator,
        value: serde_json::Value,
    },
    And {
        and: Vec<Condition>,
    },
    Or {
        or: Vec<Condition>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    Regex,
}

/// A single side-effecting action dispatched by an `execute` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecuteAction {
    Notify {
        recipients: Vec<String>,
        message: String,
    },
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    HttpRequest {
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    CreateRecord {
        entity: String,
        data: serde_json::Value,
    },
    UpdateRecord {
        entity: String,
        entity_id: String,
        data: serde_json::Value,
    },
    CreateApprovalRequest {
        approver_role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl_secs: Option<u64>,
    },
    Log {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry/backoff policy for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// If set, only error kinds in this list are retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<Vec<String>>,
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Linear,
    Exponential,
}

// ---------------------------------------------------------------------------
// Workflow Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionResult {
    Allowed,
    Blocked,
    Executed,
    Failed,
}

/// One live or historical run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 primary key.
    pub id: Uuid,
    pub org_id: Uuid,
    /// Public, human-shareable form: `"wfexec_" + first 8 hex of id`.
    pub execution_id: String,
    pub workflow_id: Uuid,
    pub trigger_event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_payload: Option<serde_json::Value>,
    /// Accumulated step outputs and variables.
    pub context: serde_json::Value,
    pub status: WorkflowExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowExecutionResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    /// Data merged in by the most recent resume (deep-merged, cumulative).
    pub resume_data: serde_json::Value,
    pub resume_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resumed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// Derives the public `"wfexec_" + first-8-hex` form from a UUID.
    pub fn public_id(id: Uuid) -> String {
        format!("wfexec_{}", &id.simple().to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One attempt of one step within one execution. Retries append new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: String,
    pub step_type: String,
    pub status: StepExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub workflow_id: Uuid,
    pub cron_expression: String,
    /// IANA timezone name (e.g. "America/New_York").
    pub timezone: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub next_trigger_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Approval
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// Public, human-shareable form: `"appr_" + first 8 hex of id`.
    pub request_id: String,
    pub org_id: Uuid,
    pub execution_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_id: Option<Uuid>,
    pub approver_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<Uuid>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn public_id(id: Uuid) -> String {
        format!("appr_{}", &id.simple().to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Event record
// ---------------------------------------------------------------------------

/// A persisted, org-scoped record of one inbound or synthetic event routed
/// through the engine, and which executions it triggered or resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    /// The matched trigger event name, e.g. `"order.created"` or
    /// `"schedule.fired"`.
    pub event_type: String,
    /// Where the event came from, e.g. `"webhook"`, `"api"`, `"scheduler"`.
    pub source: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    /// Ids of `WorkflowExecution`s this event spawned or resumed, with a
    /// per-workflow error message when a spawn attempt failed. A partial
    /// failure here never invalidates the event record itself.
    pub triggered_workflows: Vec<TriggeredWorkflow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredWorkflow {
    pub workflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A handle to one execution spawned or resumed by a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionHandle {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Condition,
    Validation,
    Enrichment,
}

/// A reusable condition/action bundle, referenceable by id from steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub conditions: Vec<Condition>,
    pub actions: Vec<ExecuteAction>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
