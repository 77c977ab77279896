//! Step-body dispatch: turns one `StepBody` into a routing decision plus the
//! output merged into context under the step's id.
//!
//! `parallel`/`foreach` children run against independent clones of the
//! current context and are merged back per `ParallelStrategy` once they all
//! complete; a child that itself tries to pause or request approval is not
//! supported and fails that child instead (nested suspension inside a
//! fan-out has no well-defined resume target).

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use loomwork_types::error::{EngineErrorKind, WorkflowError as EngineError};
use loomwork_types::workflow::{
    ActionSpec, ExecuteAction, ParallelStrategy, Step, StepBody, WorkflowExecutionResult,
};

use super::context::WorkflowContext;
use super::expression;

/// What the executor should do after one step has been dispatched.
pub enum StepOutcome {
    /// Proceed to an explicit step id, or fall through to `step.next` if
    /// `None`, or terminate `allowed` if neither is set.
    Advance { next: Option<String>, output: Value },
    Terminal {
        result: WorkflowExecutionResult,
        output: Value,
    },
    Pause {
        reason: String,
        deadline: Option<DateTime<Utc>>,
        output: Value,
    },
    RequireApproval {
        approver_role: String,
        reason: Option<String>,
        ttl_secs: Option<u64>,
        output: Value,
    },
}

impl StepOutcome {
    pub fn output(&self) -> &Value {
        match self {
            StepOutcome::Advance { output, .. }
            | StepOutcome::Terminal { output, .. }
            | StepOutcome::Pause { output, .. }
            | StepOutcome::RequireApproval { output, .. } => output,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound action dispatch
// ---------------------------------------------------------------------------

/// Fire-and-log side effects for `ExecuteAction` variants that reach outside
/// the engine. Failures surface as `ActionDispatchError`; the caller decides
/// whether the step's retry policy applies.
pub trait ActionDispatcher: Send + Sync {
    fn notify(
        &self,
        recipients: &[String],
        message: &str,
    ) -> impl std::future::Future<Output = Result<(), ActionDispatchError>> + Send;

    fn webhook(
        &self,
        url: &str,
        headers: Option<&std::collections::HashMap<String, String>>,
        body: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), ActionDispatchError>> + Send;

    fn http_request(
        &self,
        method: &str,
        url: &str,
        headers: Option<&std::collections::HashMap<String, String>>,
        body: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Value, ActionDispatchError>> + Send;

    fn create_record(
        &self,
        entity: &str,
        data: &Value,
    ) -> impl std::future::Future<Output = Result<Value, ActionDispatchError>> + Send;

    fn update_record(
        &self,
        entity: &str,
        entity_id: &str,
        data: &Value,
    ) -> impl std::future::Future<Output = Result<(), ActionDispatchError>> + Send;
}

#[derive(Debug, thiserror::Error)]
#[error("action dispatch failed: {0}")]
pub struct ActionDispatchError(pub String);

/// No-op dispatcher: logs every call and succeeds. Sufficient for tests and
/// for deployments that haven't wired a notification/webhook collaborator.
pub struct NullActionDispatcher;

impl ActionDispatcher for NullActionDispatcher {
    async fn notify(&self, recipients: &[String], message: &str) -> Result<(), ActionDispatchError> {
        tracing::debug!(?recipients, message, "notify (no-op dispatcher)");
        Ok(())
    }

    async fn webhook(
        &self,
        url: &str,
        _headers: Option<&std::collections::HashMap<String, String>>,
        _body: Option<&str>,
    ) -> Result<(), ActionDispatchError> {
        tracing::debug!(url, "webhook (no-op dispatcher)");
        Ok(())
    }

    async fn http_request(
        &self,
        method: &str,
        url: &str,
        _headers: Option<&std::collections::HashMap<String, String>>,
        _body: Option<&str>,
    ) -> Result<Value, ActionDispatchError> {
        tracing::debug!(method, url, "http_request (no-op dispatcher)");
        Ok(json!({ "status": "not_dispatched" }))
    }

    async fn create_record(&self, entity: &str, _data: &Value) -> Result<Value, ActionDispatchError> {
        tracing::debug!(entity, "create_record (no-op dispatcher)");
        Ok(json!({ "id": null }))
    }

    async fn update_record(
        &self,
        entity: &str,
        entity_id: &str,
        _data: &Value,
    ) -> Result<(), ActionDispatchError> {
        tracing::debug!(entity, entity_id, "update_record (no-op dispatcher)");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

pub struct StepRunner<D: ActionDispatcher> {
    dispatcher: D,
}

impl<D: ActionDispatcher> StepRunner<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    /// Dispatch one step against `ctx`, mutating it with the step's output
    /// before returning the routing decision.
    pub async fn dispatch(&self, step: &Step, ctx: &mut WorkflowContext) -> Result<StepOutcome, EngineError> {
        let outcome = match &step.body {
            StepBody::Condition {
                expression,
                on_true,
                on_false,
            } => self.dispatch_condition(expression, on_true.clone(), on_false.clone(), ctx)?,
            StepBody::Action { action } => self.dispatch_action(action, ctx).await?,
            StepBody::Execute { actions } => self.dispatch_execute(actions, ctx).await?,
            StepBody::Parallel { steps, strategy } => {
                self.dispatch_fanout(steps, *strategy, ctx).await?
            }
            StepBody::Foreach {
                items_field,
                item_var,
                steps,
                strategy,
            } => {
                self.dispatch_foreach(items_field, item_var, steps, *strategy, ctx)
                    .await?
            }
            StepBody::Wait {
                event,
                timeout_secs,
                ..
            } => {
                let deadline = Utc::now() + chrono::Duration::seconds(*timeout_secs as i64);
                StepOutcome::Pause {
                    reason: format!("wait:{event}"),
                    deadline: Some(deadline),
                    output: json!({ "event": event, "timeout_secs": timeout_secs }),
                }
            }
        };

        ctx.set_step_output(&step.id, outcome.output().clone())
            .map_err(|e| EngineError::new(EngineErrorKind::Internal, e.to_string()))?;

        Ok(outcome)
    }

    fn dispatch_condition(
        &self,
        expression: &loomwork_types::workflow::Condition,
        on_true: Option<String>,
        on_false: Option<String>,
        ctx: &WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        let met = expression::evaluate(expression, &ctx.to_expression_context())
            .map_err(|e| EngineError::new(EngineErrorKind::Evaluation, e.to_string()))?;

        let branch = if met { on_true } else { on_false };
        let output = json!({ "condition_met": met });

        Ok(match branch {
            Some(next) => StepOutcome::Advance {
                next: Some(next),
                output,
            },
            None => StepOutcome::Terminal {
                result: WorkflowExecutionResult::Allowed,
                output,
            },
        })
    }

    async fn dispatch_action(
        &self,
        action: &ActionSpec,
        ctx: &WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        Ok(match action {
            ActionSpec::Allow { reason } => StepOutcome::Terminal {
                result: WorkflowExecutionResult::Allowed,
                output: json!({ "action": "allow", "reason": reason }),
            },
            ActionSpec::Block { reason } => StepOutcome::Terminal {
                result: WorkflowExecutionResult::Blocked,
                output: json!({ "action": "block", "reason": reason }),
            },
            ActionSpec::RequireApproval {
                approver_role,
                reason,
                ttl_secs,
            } => StepOutcome::RequireApproval {
                approver_role: approver_role.clone(),
                reason: reason.clone(),
                ttl_secs: *ttl_secs,
                output: json!({ "action": "require_approval", "approver_role": approver_role }),
            },
            ActionSpec::Wait { event, timeout_secs } => {
                let deadline = Utc::now() + chrono::Duration::seconds(*timeout_secs as i64);
                StepOutcome::Pause {
                    reason: format!("wait:{event}"),
                    deadline: Some(deadline),
                    output: json!({ "action": "wait", "event": event }),
                }
            }
            ActionSpec::Execute => {
                let _ = ctx;
                StepOutcome::Advance {
                    next: None,
                    output: json!({ "action": "execute" }),
                }
            }
        })
    }

    async fn dispatch_execute(
        &self,
        actions: &[ExecuteAction],
        ctx: &WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        let mut dispatched = Vec::with_capacity(actions.len());
        let mut approval_request: Option<(String, Option<String>, Option<u64>)> = None;

        for action in actions {
            let entry = self.dispatch_one_action(action, ctx).await?;
            if let ExecuteAction::CreateApprovalRequest {
                approver_role,
                reason,
                ttl_secs,
            } = action
            {
                approval_request = Some((approver_role.clone(), reason.clone(), *ttl_secs));
            }
            dispatched.push(entry);
        }

        let output = json!({ "dispatched": dispatched });

        Ok(match approval_request {
            Some((approver_role, reason, ttl_secs)) => StepOutcome::RequireApproval {
                approver_role,
                reason,
                ttl_secs,
                output,
            },
            None => StepOutcome::Advance { next: None, output },
        })
    }

    async fn dispatch_one_action(
        &self,
        action: &ExecuteAction,
        ctx: &WorkflowContext,
    ) -> Result<Value, EngineError> {
        let resolve = |s: &str| ctx.resolve_template(s).unwrap_or_else(|_| s.to_string());
        let resolve_headers = |h: &Option<std::collections::HashMap<String, String>>| {
            h.as_ref().map(|headers| {
                headers
                    .iter()
                    .map(|(k, v)| (k.clone(), resolve(v)))
                    .collect::<std::collections::HashMap<_, _>>()
            })
        };

        let result = match action {
            ExecuteAction::Notify { recipients, message } => {
                let message = resolve(message);
                self.dispatcher
                    .notify(recipients, &message)
                    .await
                    .map(|_| json!({ "type": "notify", "ok": true }))
            }
            ExecuteAction::Webhook { url, headers, body } => {
                let url = resolve(url);
                let headers = resolve_headers(headers);
                let body = body.as_deref().map(resolve);
                self.dispatcher
                    .webhook(&url, headers.as_ref(), body.as_deref())
                    .await
                    .map(|_| json!({ "type": "webhook", "ok": true }))
            }
            ExecuteAction::HttpRequest {
                method,
                url,
                headers,
                body,
            } => {
                let url = resolve(url);
                let headers = resolve_headers(headers);
                let body = body.as_deref().map(resolve);
                self.dispatcher
                    .http_request(method, &url, headers.as_ref(), body.as_deref())
                    .await
                    .map(|v| json!({ "type": "http_request", "response": v }))
            }
            ExecuteAction::CreateRecord { entity, data } => self
                .dispatcher
                .create_record(entity, data)
                .await
                .map(|v| json!({ "type": "create_record", "record": v })),
            ExecuteAction::UpdateRecord {
                entity,
                entity_id,
                data,
            } => self
                .dispatcher
                .update_record(entity, entity_id, data)
                .await
                .map(|_| json!({ "type": "update_record", "ok": true })),
            ExecuteAction::CreateApprovalRequest { approver_role, .. } => {
                Ok(json!({ "type": "create_approval_request", "approver_role": approver_role }))
            }
            ExecuteAction::Log { message } => {
                let message = resolve(message);
                tracing::info!(message, "workflow execute:log");
                Ok(json!({ "type": "log" }))
            }
        };

        result.map_err(|e: ActionDispatchError| EngineError::new(EngineErrorKind::ActionDispatch, e.0))
    }

    // -----------------------------------------------------------------------
    // Parallel / foreach
    // -----------------------------------------------------------------------

    async fn dispatch_fanout(
        &self,
        children: &[Step],
        strategy: ParallelStrategy,
        ctx: &mut WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        if children.is_empty() {
            return Ok(StepOutcome::Advance {
                next: None,
                output: json!({ "children": [] }),
            });
        }

        let runs = futures_util::future::join_all(children.iter().map(|child| {
            let mut child_ctx = ctx.clone();
            async move {
                let result = self.run_substeps(std::slice::from_ref(child), &mut child_ctx).await;
                (child.id.clone(), result, child_ctx)
            }
        }))
        .await;

        self.merge_fanout_results(runs, strategy, ctx)
    }

    async fn dispatch_foreach(
        &self,
        items_field: &str,
        item_var: &str,
        children: &[Step],
        strategy: ParallelStrategy,
        ctx: &mut WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        let expr_ctx = ctx.to_expression_context();
        let items = expression::resolve_path(&expr_ctx, items_field)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if items.is_empty() || children.is_empty() {
            return Ok(StepOutcome::Advance {
                next: None,
                output: json!({ "iterations": 0 }),
            });
        }

        let runs = futures_util::future::join_all(items.iter().enumerate().map(|(i, item)| {
            let mut child_ctx = ctx.clone();
            let label = format!("item-{i}");
            async move {
                if let Err(e) = child_ctx.set_variable(item_var, item.clone()) {
                    return (label, Err(e.to_string()), child_ctx);
                }
                let result = self.run_substeps(children, &mut child_ctx).await;
                (label, result, child_ctx)
            }
        }))
        .await;

        self.merge_fanout_results(runs, strategy, ctx)
    }

    fn merge_fanout_results(
        &self,
        runs: Vec<(String, Result<Value, String>, WorkflowContext)>,
        strategy: ParallelStrategy,
        ctx: &mut WorkflowContext,
    ) -> Result<StepOutcome, EngineError> {
        let total = runs.len();
        let mut ok_count = 0usize;
        let mut summary = serde_json::Map::new();

        for (label, result, child_ctx) in &runs {
            match result {
                Ok(output) => {
                    ok_count += 1;
                    ctx.merge_from(child_ctx);
                    summary.insert(label.clone(), json!({ "ok": true, "output": output }));
                }
                Err(error) => {
                    summary.insert(label.clone(), json!({ "ok": false, "error": error }));
                }
            }
        }

        let output = json!({ "children": summary, "total": total, "succeeded": ok_count });

        match strategy {
            ParallelStrategy::AllMustPass => {
                if ok_count < total {
                    Err(EngineError::new(
                        EngineErrorKind::ActionDispatch,
                        format!("{}/{} parallel children failed", total - ok_count, total),
                    ))
                } else {
                    Ok(StepOutcome::Advance { next: None, output })
                }
            }
            ParallelStrategy::AnyCanPass => {
                if ok_count > 0 {
                    Ok(StepOutcome::Advance { next: None, output })
                } else {
                    Err(EngineError::new(
                        EngineErrorKind::ActionDispatch,
                        "all parallel children failed".to_string(),
                    ))
                }
            }
            ParallelStrategy::BestEffort => Ok(StepOutcome::Advance { next: None, output }),
        }
    }

    /// Run a tiny sub-program of `steps` starting at `steps[0]`, following
    /// `next` pointers until a terminal result. Suspension (pause/approval)
    /// from a child is treated as a failure of that child.
    async fn run_substeps(
        &self,
        steps: &[Step],
        ctx: &mut WorkflowContext,
    ) -> Result<Value, String> {
        let Some(mut current) = steps.first().map(|s| s.id.clone()) else {
            return Ok(Value::Null);
        };

        loop {
            let step = steps
                .iter()
                .find(|s| s.id == current)
                .ok_or_else(|| format!("unknown child step '{current}'"))?;

            let outcome = Box::pin(self.dispatch(step, ctx))
                .await
                .map_err(|e| e.to_string())?;

            match outcome {
                StepOutcome::Advance { next, output } => match next.or_else(|| step.next.clone()) {
                    Some(next_id) => current = next_id,
                    None => return Ok(output),
                },
                StepOutcome::Terminal { output, .. } => return Ok(output),
                StepOutcome::Pause { .. } | StepOutcome::RequireApproval { .. } => {
                    return Err(format!(
                        "step '{current}' attempted to suspend inside a parallel/foreach child"
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::{Condition, ConditionOperator};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ctx() -> WorkflowContext {
        WorkflowContext::new("test".to_string(), Uuid::now_v7(), Some(json!({"order": {"total": 1500}})))
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

    #[tokio::test]
    async fn condition_branches_to_on_true() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "check",
            StepBody::Condition {
                expression: Condition::Leaf {
                    field: "order.total".to_string(),
                    operator: ConditionOperator::Gt,
                    value: json!(1000),
                },
                on_true: Some("block".to_string()),
                on_false: Some("allow".to_string()),
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        match outcome {
            StepOutcome::Advance { next, .. } => assert_eq!(next, Some("block".to_string())),
            _ => panic!("expected Advance"),
        }
    }

    #[tokio::test]
    async fn condition_with_no_branch_terminates_allowed() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "check",
            StepBody::Condition {
                expression: Condition::Leaf {
                    field: "order.total".to_string(),
                    operator: ConditionOperator::Lt,
                    value: json!(1000),
                },
                on_true: None,
                on_false: None,
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Terminal {
                result: WorkflowExecutionResult::Allowed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn allow_action_terminates() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "a",
            StepBody::Action {
                action: ActionSpec::Allow { reason: None },
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Terminal {
                result: WorkflowExecutionResult::Allowed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn require_approval_action_pauses_for_approval() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "a",
            StepBody::Action {
                action: ActionSpec::RequireApproval {
                    approver_role: "manager".to_string(),
                    reason: Some("big order".to_string()),
                    ttl_secs: Some(3600),
                },
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        match outcome {
            StepOutcome::RequireApproval { approver_role, ttl_secs, .. } => {
                assert_eq!(approver_role, "manager");
                assert_eq!(ttl_secs, Some(3600));
            }
            _ => panic!("expected RequireApproval"),
        }
    }

    #[tokio::test]
    async fn wait_step_pauses_with_wait_reason() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "w",
            StepBody::Wait {
                event: "approval.granted".to_string(),
                timeout_secs: 60,
                on_timeout: None,
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        match outcome {
            StepOutcome::Pause { reason, deadline, .. } => {
                assert_eq!(reason, "wait:approval.granted");
                assert!(deadline.unwrap() > Utc::now());
            }
            _ => panic!("expected Pause"),
        }
    }

    #[tokio::test]
    async fn execute_with_approval_request_pauses_after_dispatch() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "e",
            StepBody::Execute {
                actions: vec![
                    ExecuteAction::Log {
                        message: "starting".to_string(),
                    },
                    ExecuteAction::CreateApprovalRequest {
                        approver_role: "finance".to_string(),
                        reason: None,
                        ttl_secs: None,
                    },
                ],
            },
            Some("next-step"),
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        match outcome {
            StepOutcome::RequireApproval { approver_role, .. } => assert_eq!(approver_role, "finance"),
            _ => panic!("expected RequireApproval"),
        }
    }

    #[tokio::test]
    async fn execute_without_approval_advances() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let s = step(
            "e",
            StepBody::Execute {
                actions: vec![ExecuteAction::Log {
                    message: "hello {{order.total}}".to_string(),
                }],
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advance { .. }));
    }

    #[tokio::test]
    async fn parallel_all_must_pass_fails_if_any_child_blocks_evaluation() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let good = step(
            "good",
            StepBody::Action {
                action: ActionSpec::Allow { reason: None },
            },
            None,
        );
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
        let s = step(
            "fanout",
            StepBody::Parallel {
                steps: vec![good, bad],
                strategy: ParallelStrategy::AllMustPass,
            },
            None,
        );
        let result = runner.dispatch(&s, &mut c).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn parallel_best_effort_always_succeeds() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = ctx();
        let good = step(
            "good",
            StepBody::Action {
                action: ActionSpec::Allow { reason: None },
            },
            None,
        );
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
        let s = step(
            "fanout",
            StepBody::Parallel {
                steps: vec![good, bad],
                strategy: ParallelStrategy::BestEffort,
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advance { .. }));
    }

    #[tokio::test]
    async fn foreach_iterates_items_field() {
        let runner = StepRunner::new(NullActionDispatcher);
        let mut c = WorkflowContext::new(
            "test".to_string(),
            Uuid::now_v7(),
            Some(json!({ "orders": [{"id": 1}, {"id": 2}] })),
        );
        let body = step(
            "body",
            StepBody::Action {
                action: ActionSpec::Execute,
            },
            None,
        );
        let s = step(
            "each",
            StepBody::Foreach {
                items_field: "trigger.orders".to_string(),
                item_var: "order".to_string(),
                steps: vec![body],
                strategy: ParallelStrategy::AllMustPass,
            },
            None,
        );
        let outcome = runner.dispatch(&s, &mut c).await.unwrap();
        match outcome {
            StepOutcome::Advance { output, .. } => assert_eq!(output["succeeded"], json!(2)),
            _ => panic!("expected Advance"),
        }
    }
}
