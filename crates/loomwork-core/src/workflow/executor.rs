//! Workflow executor: single-step-at-a-time routing engine.
//!
//! A workflow's steps are not dispatched wave-by-wave; the engine starts at
//! `definition.steps[0]` and follows each step's own routing decision
//! (`next`, `on_true`/`on_false`, `wait.on_timeout`) until a step terminates
//! the run or asks the engine to suspend (pause or approval). Every step
//! boundary is checkpointed before the engine moves on, so a crash can
//! resume from `execution.next_step_id` instead of replaying the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use loomwork_types::error::{EngineErrorKind, WorkflowError as EngineError};
use loomwork_types::event::WorkflowEvent;
use loomwork_types::workflow::{
    RetryConfig, Step, StepBody, Workflow, WorkflowExecution, WorkflowExecutionResult,
    WorkflowExecutionStatus,
};

use crate::event::bus::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::approval::{self, ApprovalError, LookupApprover};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::WorkflowContext;
use super::pause_resume::{self, PauseResumeError};
use super::retry::RetryHandler;
use super::step_runner::{ActionDispatcher, StepOutcome, StepRunner};

/// Default workflow-level timeout applied when a definition doesn't set one.
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 1800;
/// Default step-level timeout applied when a step doesn't set one.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// A step with no `retry:` block gets exactly one attempt; retries are opt-in
/// per step, unlike the `max_attempts: 3` default that applies to fields
/// left blank *within* an explicit retry block.
fn no_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        backoff: loomwork_types::workflow::BackoffStrategy::Linear,
        retry_on: None,
    }
}

fn step_type_name(body: &StepBody) -> &'static str {
    match body {
        StepBody::Condition { .. } => "condition",
        StepBody::Action { .. } => "action",
        StepBody::Execute { .. } => "execute",
        StepBody::Parallel { .. } => "parallel",
        StepBody::Foreach { .. } => "foreach",
        StepBody::Wait { .. } => "wait",
    }
}

fn find_step<'a>(steps: &'a [Step], id: &str) -> Option<&'a Step> {
    steps.iter().find(|s| s.id == id)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    PauseResume(#[from] PauseResumeError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("workflow has no steps to execute")]
    EmptyWorkflow,

    #[error("unknown step reference '{0}'")]
    UnknownStep(String),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives workflow executions to completion, pause, or failure.
///
/// Generic over the repository backend and the outbound action dispatcher so
/// tests can swap in in-memory/no-op implementations.
pub struct WorkflowEngine<R: WorkflowRepository, D: ActionDispatcher> {
    checkpoints: Arc<CheckpointManager<R>>,
    runner: StepRunner<D>,
    event_bus: EventBus,
}

impl<R: WorkflowRepository, D: ActionDispatcher> WorkflowEngine<R, D> {
    pub fn new(checkpoints: Arc<CheckpointManager<R>>, dispatcher: D, event_bus: EventBus) -> Self {
        Self {
            checkpoints,
            runner: StepRunner::new(dispatcher),
            event_bus,
        }
    }

    /// The checkpoint manager backing this engine, for callers (the event
    /// router, the scheduler poll loop) that need direct repository access
    /// alongside `start`/`drive_running`.
    pub fn checkpoints(&self) -> &Arc<CheckpointManager<R>> {
        &self.checkpoints
    }

    /// Start a brand new execution of `workflow` and drive it to its first
    /// suspension or terminal state.
    pub async fn start(
        &self,
        org_id: Uuid,
        workflow: &Workflow,
        trigger_event: &str,
        trigger_payload: Option<Value>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let first = workflow
            .definition
            .steps
            .first()
            .ok_or(ExecutorError::EmptyWorkflow)?;

        let execution_id = Uuid::now_v7();
        let ctx = WorkflowContext::new(workflow.name.clone(), execution_id, trigger_payload.clone());

        let execution = WorkflowExecution {
            id: execution_id,
            org_id,
            execution_id: WorkflowExecution::public_id(execution_id),
            workflow_id: workflow.id,
            trigger_event: trigger_event.to_string(),
            trigger_payload,
            context: ctx.to_json(),
            status: WorkflowExecutionStatus::Running,
            result: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            paused_at: None,
            paused_reason: None,
            paused_step_id: None,
            next_step_id: Some(first.id.clone()),
            resume_data: json!({}),
            resume_count: 0,
            last_resumed_at: None,
        };

        self.checkpoints.checkpoint_execution_start(&execution).await?;
        self.event_bus.publish(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: workflow.id,
            trigger_event: execution.trigger_event.clone(),
        });

        self.drive(workflow, execution, ctx).await
    }

    /// Continue an execution that is currently `Running` (typically just
    /// moved out of `Paused` by `pause_resume::resume`) from its
    /// `next_step_id`.
    pub async fn drive_running(
        &self,
        org_id: Uuid,
        workflow: &Workflow,
        execution_id: Uuid,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let execution = self.checkpoints.get_execution(org_id, execution_id).await?;
        let ctx = WorkflowContext::from_json(execution.context.clone())
            .map_err(|e| ExecutorError::Engine(EngineError::internal(e.to_string())))?;
        self.drive(workflow, execution, ctx).await
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        mut ctx: WorkflowContext,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let global_timeout = Duration::from_secs(
            workflow
                .definition
                .global_timeout_secs
                .unwrap_or(DEFAULT_WORKFLOW_TIMEOUT_SECS),
        );
        let run_deadline = tokio::time::Instant::now() + global_timeout;

        let mut current = execution
            .next_step_id
            .clone()
            .or_else(|| workflow.definition.steps.first().map(|s| s.id.clone()))
            .ok_or(ExecutorError::EmptyWorkflow)?;

        loop {
            if tokio::time::Instant::now() >= run_deadline {
                return self
                    .finish_failed(
                        &mut execution,
                        EngineError::new(EngineErrorKind::Timeout, "global timeout exceeded"),
                    )
                    .await;
            }

            let step = find_step(&workflow.definition.steps, &current)
                .ok_or_else(|| ExecutorError::UnknownStep(current.clone()))?;

            match self.dispatch_with_retry(&execution, step, &mut ctx).await {
                Ok(outcome) => {
                    execution.context = ctx.to_json();
                    self.checkpoints.checkpoint_execution(&execution).await?;

                    match outcome {
                        StepOutcome::Advance { next, output: _ } => {
                            match next.or_else(|| step.next.clone()) {
                                Some(next_id) => {
                                    execution.next_step_id = Some(next_id.clone());
                                    current = next_id;
                                }
                                None => {
                                    return self
                                        .finish(
                                            &mut execution,
                                            WorkflowExecutionResult::Allowed,
                                            None,
                                        )
                                        .await;
                                }
                            }
                        }
                        StepOutcome::Terminal { result, output: _ } => {
                            return self.finish(&mut execution, result, None).await;
                        }
                        StepOutcome::Pause {
                            reason,
                            deadline,
                            output: _,
                        } => {
                            if let Some(dl) = deadline {
                                let _ = ctx.set_variable("__wait_deadline", json!(dl.to_rfc3339()));
                                execution.context = ctx.to_json();
                                self.checkpoints.checkpoint_execution(&execution).await?;
                            }
                            let paused = pause_resume::pause(
                                &self.checkpoints,
                                execution.org_id,
                                execution.id,
                                &reason,
                                Some(&step.id),
                            )
                            .await?;
                            self.event_bus.publish(WorkflowEvent::ExecutionPaused {
                                execution_id: execution.id,
                                step_id: Some(step.id.clone()),
                                reason,
                            });
                            return Ok(paused);
                        }
                        StepOutcome::RequireApproval {
                            approver_role,
                            reason,
                            ttl_secs,
                            output: _,
                        } => {
                            let paused = pause_resume::pause(
                                &self.checkpoints,
                                execution.org_id,
                                execution.id,
                                &format!("approval:{approver_role}"),
                                Some(&step.id),
                            )
                            .await?;
                            let request = approval::create(
                                &self.checkpoints,
                                execution.org_id,
                                execution.id,
                                "workflow_step",
                                &step.id,
                                &approver_role,
                                reason.as_deref(),
                                ttl_secs.map(|s| chrono::Duration::seconds(s as i64)),
                            )
                            .await?;
                            self.event_bus.publish(WorkflowEvent::ApprovalCreated {
                                approval_id: request.id,
                                execution_id: execution.id,
                                approver_role,
                            });
                            self.event_bus.publish(WorkflowEvent::ExecutionPaused {
                                execution_id: execution.id,
                                step_id: Some(step.id.clone()),
                                reason: "awaiting approval".to_string(),
                            });
                            return Ok(paused);
                        }
                    }
                }
                Err(e) => return self.finish_failed(&mut execution, e).await,
            }
        }
    }

    /// Run one step, retrying per its `retry:` policy. Every attempt gets
    /// its own `StepExecution` row; a retried step is never updated in
    /// place.
    async fn dispatch_with_retry(
        &self,
        execution: &WorkflowExecution,
        step: &Step,
        ctx: &mut WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        let retry_cfg = step.retry.clone().unwrap_or_else(no_retry);
        let step_timeout = Duration::from_secs(step.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS));
        let step_type = step_type_name(&step.body);

        let mut attempt = 1u32;
        loop {
            let input = ctx.to_expression_context();
            let step_exec_id = self
                .checkpoints
                .checkpoint_step_start(execution.id, &step.id, step_type, Some(&input))
                .await
                .map_err(|e| EngineError::new(EngineErrorKind::Internal, e.to_string()))?;

            self.event_bus.publish(WorkflowEvent::StepStarted {
                execution_id: execution.id,
                step_id: step.id.clone(),
                step_type: step_type.to_string(),
            });

            let started = std::time::Instant::now();
            let attempt_result = match tokio::time::timeout(step_timeout, self.runner.dispatch(step, ctx)).await
            {
                Ok(result) => result,
                Err(_) => Err(EngineError::new(
                    EngineErrorKind::Timeout,
                    format!("step '{}' exceeded its {}s timeout", step.id, step_timeout.as_secs()),
                )),
            };

            match attempt_result {
                Ok(outcome) => {
                    self.checkpoints
                        .checkpoint_step_complete(step_exec_id, Some(outcome.output()))
                        .await
                        .map_err(|e| EngineError::new(EngineErrorKind::Internal, e.to_string()))?;
                    self.event_bus.publish(WorkflowEvent::StepCompleted {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    return Ok(outcome);
                }
                Err(err) => {
                    let err_msg = err.to_string();
                    self.checkpoints
                        .checkpoint_step_failed(step_exec_id, &err_msg)
                        .await
                        .map_err(|e| EngineError::new(EngineErrorKind::Internal, e.to_string()))?;

                    let kind_str = format!("{:?}", err.kind()).to_lowercase();
                    let will_retry =
                        err.kind().is_retriable() && RetryHandler::should_retry(&retry_cfg, attempt, &kind_str);

                    self.event_bus.publish(WorkflowEvent::StepFailed {
                        execution_id: execution.id,
                        step_id: step.id.clone(),
                        error: err_msg,
                        will_retry,
                    });

                    if !will_retry {
                        return Err(err);
                    }

                    let delay = RetryHandler::backoff_delay(&retry_cfg, attempt, &step.id);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn finish(
        &self,
        execution: &mut WorkflowExecution,
        result: WorkflowExecutionResult,
        error_message: Option<String>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let status = match result {
            WorkflowExecutionResult::Blocked => WorkflowExecutionStatus::Blocked,
            WorkflowExecutionResult::Failed => WorkflowExecutionStatus::Failed,
            _ => WorkflowExecutionStatus::Completed,
        };

        let now = Utc::now();
        self.checkpoints
            .checkpoint_execution_status(execution.id, execution.status, status)
            .await?;

        execution.status = status;
        execution.result = Some(result);
        execution.completed_at = Some(now);
        execution.duration_ms = Some((now - execution.started_at).num_milliseconds().max(0) as u64);
        execution.error_message = error_message.clone();
        self.checkpoints.checkpoint_execution(execution).await?;

        match error_message {
            Some(error) => {
                self.event_bus.publish(WorkflowEvent::ExecutionFailed {
                    execution_id: execution.id,
                    workflow_id: execution.workflow_id,
                    error,
                });
            }
            None => {
                self.event_bus.publish(WorkflowEvent::ExecutionCompleted {
                    execution_id: execution.id,
                    workflow_id: execution.workflow_id,
                    duration_ms: execution.duration_ms.unwrap_or(0),
                    steps_completed: self
                        .checkpoints
                        .get_step_executions(execution.id)
                        .await
                        .map(|steps| steps.len() as u32)
                        .unwrap_or(0),
                });
            }
        }

        Ok(execution.clone())
    }

    async fn finish_failed(
        &self,
        execution: &mut WorkflowExecution,
        error: EngineError,
    ) -> Result<WorkflowExecution, ExecutorError> {
        self.finish(execution, WorkflowExecutionResult::Failed, Some(error.to_string()))
            .await
    }
}

/// Best-effort background sweep; wraps `pause_resume::sweep_wait_timeouts`
/// with a `deadline_for` closure reading `context.variables.__wait_deadline`.
pub async fn sweep_wait_timeouts<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    limit: u32,
) -> Result<Vec<Uuid>, PauseResumeError> {
    pause_resume::sweep_wait_timeouts(checkpoints, limit, |execution| {
        execution
            .context
            .get("variables")
            .and_then(|v| v.get("__wait_deadline"))
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
    .await
}

/// Best-effort background sweep for expired approval requests across one org.
pub async fn sweep_expired_approvals<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
) -> Result<Vec<Uuid>, ApprovalError> {
    approval::expire_sweep(checkpoints, org_id, Utc::now()).await
}

/// Convenience re-export so callers that only need to decide an approval
/// don't have to reach into `approval` directly.
pub async fn decide_approval<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    approvers: &dyn LookupApprover,
    org_id: Uuid,
    approval_id: Uuid,
    approver_id: Uuid,
    approved: bool,
    decision_reason: Option<&str>,
) -> Result<loomwork_types::workflow::ApprovalRequest, ApprovalError> {
    approval::decide(
        checkpoints,
        approvers,
        org_id,
        approval_id,
        approver_id,
        approved,
        decision_reason,
    )
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::workflow::WorkflowRepository;
    use crate::workflow::step_runner::NullActionDispatcher;
    use loomwork_types::error::RepositoryError;
    use loomwork_types::workflow::{
        ActionSpec, ApprovalRequest, ApprovalStatus, Condition, ConditionOperator, StepExecution,
        StepExecutionStatus, Trigger, Workflow, WorkflowDefinition, WorkflowExecution,
        WorkflowExecutionStatus, WorkflowSchedule,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRepo {
        executions: Mutex<HashMap<Uuid, WorkflowExecution>>,
        step_executions: Mutex<Vec<StepExecution>>,
        approvals: Mutex<HashMap<Uuid, ApprovalRequest>>,
    }

    impl WorkflowRepository for MemRepo {
        async fn save_workflow(&self, _workflow: &Workflow) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn get_workflow(&self, _org_id: &Uuid, _id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
            Ok(None)
        }

        async fn get_latest_workflow(
            &self,
            _org_id: &Uuid,
            _workflow_id: &str,
        ) -> Result<Option<Workflow>, RepositoryError> {
            Ok(None)
        }

        async fn list_workflows(&self, _org_id: &Uuid) -> Result<Vec<Workflow>, RepositoryError> {
            Ok(vec![])
        }

        async fn get_enabled_workflows_by_event_type(
            &self,
            _org_id: &Uuid,
            _event_type: &str,
        ) -> Result<Vec<Workflow>, RepositoryError> {
            Ok(vec![])
        }

        async fn set_workflow_enabled(&self, _org_id: &Uuid, _id: &Uuid, _enabled: bool) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn delete_workflow(&self, _org_id: &Uuid, _id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(false)
        }

        async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            self.executions.lock().unwrap().insert(execution.id, execution.clone());
            Ok(())
        }

        async fn get_execution(&self, _org_id: &Uuid, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
            Ok(self.executions.lock().unwrap().get(id).cloned())
        }

        async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
            self.executions.lock().unwrap().insert(execution.id, execution.clone());
            Ok(())
        }

        async fn cas_execution_status(
            &self,
            id: &Uuid,
            expected: WorkflowExecutionStatus,
            next: WorkflowExecutionStatus,
        ) -> Result<(), RepositoryError> {
            let mut executions = self.executions.lock().unwrap();
            let execution = executions.get_mut(id).ok_or(RepositoryError::NotFound)?;
            if execution.status != expected {
                return Err(RepositoryError::Conflict(format!(
                    "expected {expected:?}, found {:?}",
                    execution.status
                )));
            }
            execution.status = next;
            Ok(())
        }

        async fn list_executions(
            &self,
            _org_id: &Uuid,
            _workflow_id: &Uuid,
            _limit: u32,
        ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            Ok(vec![])
        }

        async fn get_paused_executions(&self, limit: u32) -> Result<Vec<WorkflowExecution>, RepositoryError> {
            Ok(self
                .executions
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.status == WorkflowExecutionStatus::Paused)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn create_step_execution(&self, step: &StepExecution) -> Result<(), RepositoryError> {
            self.step_executions.lock().unwrap().push(step.clone());
            Ok(())
        }

        async fn update_step_execution(
            &self,
            step_execution_id: &Uuid,
            status: StepExecutionStatus,
            output: Option<&Value>,
            error: Option<&str>,
        ) -> Result<(), RepositoryError> {
            let mut steps = self.step_executions.lock().unwrap();
            if let Some(step) = steps.iter_mut().find(|s| s.id == *step_execution_id) {
                step.status = status;
                step.output = output.cloned();
                step.error_message = error.map(String::from);
                step.completed_at = Some(Utc::now());
            }
            Ok(())
        }

        async fn list_step_executions(&self, execution_id: &Uuid) -> Result<Vec<StepExecution>, RepositoryError> {
            Ok(self
                .step_executions
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.execution_id == *execution_id)
                .cloned()
                .collect())
        }

        async fn save_schedule(&self, _schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn get_due_schedules(&self) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
            Ok(vec![])
        }

        async fn update_execution_next_trigger(
            &self,
            _schedule_id: &Uuid,
            _expected_current: chrono::DateTime<Utc>,
            _last_triggered_at: chrono::DateTime<Utc>,
            _next_trigger_at: chrono::DateTime<Utc>,
        ) -> Result<bool, RepositoryError> {
            Ok(true)
        }

        async fn create_approval_request(&self, request: &ApprovalRequest) -> Result<(), RepositoryError> {
            self.approvals.lock().unwrap().insert(request.id, request.clone());
            Ok(())
        }

        async fn get_approval_request(&self, _org_id: &Uuid, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
            Ok(self.approvals.lock().unwrap().get(id).cloned())
        }

        async fn decide_approval_request(
            &self,
            id: &Uuid,
            status: ApprovalStatus,
            approver_id: Option<Uuid>,
            decision_reason: Option<&str>,
        ) -> Result<bool, RepositoryError> {
            let mut approvals = self.approvals.lock().unwrap();
            let Some(request) = approvals.get_mut(id) else {
                return Ok(false);
            };
            if request.status != ApprovalStatus::Pending {
                return Ok(false);
            }
            request.status = status;
            request.approver_id = approver_id;
            request.decision_reason = decision_reason.map(String::from);
            request.decided_at = Some(Utc::now());
            Ok(true)
        }

        async fn list_pending_approvals(&self, _org_id: &Uuid) -> Result<Vec<ApprovalRequest>, RepositoryError> {
            Ok(self
                .approvals
                .lock()
                .unwrap()
                .values()
                .filter(|a| a.status == ApprovalStatus::Pending)
                .cloned()
                .collect())
        }
    }

    fn make_workflow(steps: Vec<Step>) -> Workflow {
        let id = Uuid::now_v7();
        Workflow {
            id,
            org_id: Uuid::now_v7(),
            workflow_id: "wf-test".to_string(),
            version: 1,
            name: "test-workflow".to_string(),
            description: None,
            definition: WorkflowDefinition {
                trigger: Trigger::Event {
                    name: "order.created".to_string(),
                },
                context_load: vec![],
                steps,
                global_timeout_secs: None,
            },
            enabled: true,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn step(id: &str, body: StepBody, next: Option<&str>) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            body,
            next: next.map(String::from),
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }
    }

    fn engine() -> WorkflowEngine<MemRepo, NullActionDispatcher> {
        let checkpoints = Arc::new(CheckpointManager::new(MemRepo::default()));
        WorkflowEngine::new(checkpoints, NullActionDispatcher, EventBus::new(16))
    }

    #[tokio::test]
    async fn single_allow_action_completes_workflow() {
        let engine = engine();
        let workflow = make_workflow(vec![step(
            "allow",
            StepBody::Action {
                action: ActionSpec::Allow { reason: None },
            },
            None,
        )]);

        let result = engine
            .start(workflow.org_id, &workflow, "order.created", None)
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowExecutionStatus::Completed);
        assert_eq!(result.result, Some(WorkflowExecutionResult::Allowed));
    }

    #[tokio::test]
    async fn condition_routes_to_block_step() {
        let engine = engine();
        let workflow = make_workflow(vec![
            step(
                "check",
                StepBody::Condition {
                    expression: Condition::Leaf {
                        field: "trigger.amount".to_string(),
                        operator: ConditionOperator::Gt,
                        value: json!(1000),
                    },
                    on_true: Some("block".to_string()),
                    on_false: Some("allow".to_string()),
                },
                None,
            ),
            step(
                "block",
                StepBody::Action {
                    action: ActionSpec::Block {
                        reason: Some("too large".to_string()),
                    },
                },
                None,
            ),
            step(
                "allow",
                StepBody::Action {
                    action: ActionSpec::Allow { reason: None },
                },
                None,
            ),
        ]);

        let result = engine
            .start(workflow.org_id, &workflow, "order.created", Some(json!({ "amount": 5000 })))
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowExecutionStatus::Blocked);
        assert_eq!(result.result, Some(WorkflowExecutionResult::Blocked));
    }

    #[tokio::test]
    async fn wait_step_pauses_with_deadline_variable() {
        let engine = engine();
        let workflow = make_workflow(vec![step(
            "wait",
            StepBody::Wait {
                event: "payment.confirmed".to_string(),
                timeout_secs: 30,
                on_timeout: None,
            },
            None,
        )]);

        let result = engine
            .start(workflow.org_id, &workflow, "order.created", None)
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowExecutionStatus::Paused);
        assert_eq!(result.paused_reason.as_deref(), Some("wait:payment.confirmed"));
        assert!(result.context["variables"]["__wait_deadline"].is_string());
    }

    #[tokio::test]
    async fn require_approval_pauses_and_creates_request() {
        let engine = engine();
        let workflow = make_workflow(vec![step(
            "review",
            StepBody::Action {
                action: ActionSpec::RequireApproval {
                    approver_role: "manager".to_string(),
                    reason: Some("large order".to_string()),
                    ttl_secs: Some(3600),
                },
            },
            None,
        )]);

        let result = engine
            .start(workflow.org_id, &workflow, "order.created", None)
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowExecutionStatus::Paused);
        assert!(result.paused_reason.as_deref().unwrap().starts_with("approval:"));

        let pending = engine
            .checkpoints
            .repo()
            .list_pending_approvals(&workflow.org_id)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].approver_role, "manager");
    }

    #[tokio::test]
    async fn failing_step_without_retry_fails_the_execution() {
        let engine = engine();
        // `on_true`/`on_false` both point nowhere and the condition field is
        // missing from context -- still evaluates (missing -> null, not
        // equal), so use a step type that can genuinely fail instead: a
        // foreach over a non-array field degrades to zero iterations, not a
        // failure, so exercise the parallel-all-must-pass failure path.
        let bad = step(
            "bad",
            StepBody::Action {
                action: ActionSpec::RequireApproval {
                    approver_role: "x".to_string(),
                    reason: None,
                    ttl_secs: None,
                },
            },
            None,
        );
        let good = step(
            "good",
            StepBody::Action {
                action: ActionSpec::Allow { reason: None },
            },
            None,
        );
        let workflow = make_workflow(vec![step(
            "fanout",
            StepBody::Parallel {
                steps: vec![good, bad],
                strategy: loomwork_types::workflow::ParallelStrategy::AllMustPass,
            },
            None,
        )]);

        let result = engine
            .start(workflow.org_id, &workflow, "order.created", None)
            .await
            .unwrap();

        assert_eq!(result.status, WorkflowExecutionStatus::Failed);
        assert!(result.error_message.is_some());
    }
}
