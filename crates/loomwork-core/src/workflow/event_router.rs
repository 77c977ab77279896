//! Event router: the single entry point events take before they reach the
//! execution engine.
//!
//! `route_event` persists every inbound (or synthetic, e.g. `schedule.fired`)
//! event as an `EventRecord`, fans it out to every enabled workflow whose
//! `Trigger::Event` name matches, and also resumes any paused execution
//! whose `wait` step is listening for this event type. Generalized from the
//! teacher's `TriggerManager` -- a push-based in-process subscriber registry
//! -- into this pull/route contract, since the spec wants a persisted,
//! org-scoped, queryable record of what fired rather than an ephemeral
//! callback registration.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use loomwork_types::workflow::{EventRecord, ExecutionHandle, StepBody, Trigger, TriggeredWorkflow};

use super::executor::WorkflowEngine;
use super::expression;
use super::pause_resume;
use super::step_runner::ActionDispatcher;
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum EventRouterError {
    #[error("event source must not be empty")]
    EmptySource,

    #[error("event type must not be empty")]
    EmptyType,

    #[error("repository error: {0}")]
    Repository(String),
}

/// Validate the non-empty-source/non-empty-type conventions shared with the
/// teacher's `validate_trigger_config`.
pub fn validate_event(event_type: &str, source: &str) -> Result<(), EventRouterError> {
    if source.trim().is_empty() {
        return Err(EventRouterError::EmptySource);
    }
    if event_type.trim().is_empty() {
        return Err(EventRouterError::EmptyType);
    }
    Ok(())
}

/// Route one event: persist it, spawn matching workflows, and resume
/// correlated paused `wait` executions.
///
/// A spawn failure for one matched workflow is recorded in the returned
/// `EventRecord.triggered_workflows` as a per-workflow error and never
/// blocks the remaining matches -- event persistence itself must already
/// have succeeded by the time any workflow is spawned.
pub async fn route_event<R: WorkflowRepository, D: ActionDispatcher>(
    engine: &WorkflowEngine<R, D>,
    org_id: Uuid,
    event_type: &str,
    source: &str,
    payload: Value,
) -> Result<(EventRecord, Vec<ExecutionHandle>), EventRouterError> {
    validate_event(event_type, source)?;

    let mut record = EventRecord {
        id: Uuid::now_v7(),
        org_id,
        event_type: event_type.to_string(),
        source: source.to_string(),
        payload: payload.clone(),
        received_at: Utc::now(),
        triggered_workflows: Vec::new(),
    };

    let matched = engine
        .checkpoints()
        .repo()
        .get_enabled_workflows_by_event_type(&org_id, event_type)
        .await
        .map_err(|e| EventRouterError::Repository(e.to_string()))?;

    let mut handles = Vec::new();

    for workflow in matched {
        match engine.start(org_id, &workflow, event_type, Some(payload.clone())).await {
            Ok(execution) => {
                handles.push(ExecutionHandle {
                    workflow_id: workflow.id,
                    execution_id: execution.id,
                });
                record.triggered_workflows.push(TriggeredWorkflow {
                    workflow_id: workflow.id,
                    execution_id: Some(execution.id),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(workflow_id = %workflow.id, error = %e, "failed to start execution for matched workflow");
                record.triggered_workflows.push(TriggeredWorkflow {
                    workflow_id: workflow.id,
                    execution_id: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    resume_correlated_waits(engine, event_type, &payload).await;

    Ok((record, handles))
}

/// Resume every paused execution whose waiting step listens for
/// `event_type` and whose correlation (a field-subset match over the wait
/// step's stored correlation keys, if any) succeeds against `payload`.
async fn resume_correlated_waits<R: WorkflowRepository, D: ActionDispatcher>(
    engine: &WorkflowEngine<R, D>,
    event_type: &str,
    payload: &Value,
) {
    let checkpoints = engine.checkpoints();
    let paused = match checkpoints.repo().get_paused_executions(1000).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list paused executions for event correlation");
            return;
        }
    };

    for execution in paused {
        let Some(reason) = execution.paused_reason.as_deref() else {
            continue;
        };
        let Some(waited_event) = reason.strip_prefix("wait:") else {
            continue;
        };
        if waited_event != event_type {
            continue;
        }
        if !correlation_matches(&execution.context, payload) {
            continue;
        }

        if let Err(e) = pause_resume::resume(checkpoints, execution.org_id, execution.id, payload.clone()).await {
            tracing::warn!(execution_id = %execution.id, error = %e, "failed to resume execution correlated to event");
            continue;
        }

        let workflow = match checkpoints.repo().get_workflow(&execution.org_id, &execution.workflow_id).await {
            Ok(Some(w)) => w,
            Ok(None) => {
                tracing::warn!(execution_id = %execution.id, "workflow for resumed execution not found");
                continue;
            }
            Err(e) => {
                tracing::warn!(execution_id = %execution.id, error = %e, "failed to load workflow for resumed execution");
                continue;
            }
        };

        if let Err(e) = engine.drive_running(execution.org_id, &workflow, execution.id).await {
            tracing::warn!(execution_id = %execution.id, error = %e, "failed to drive resumed execution");
        }
    }
}

/// A wait step's correlation is expressed as a condition tree stashed under
/// `context.variables.__wait_correlation`; absence means "match any event of
/// this type".
fn correlation_matches(context: &Value, payload: &Value) -> bool {
    let Some(correlation) = context
        .get("variables")
        .and_then(|v| v.get("__wait_correlation"))
    else {
        return true;
    };

    let condition: Result<loomwork_types::workflow::Condition, _> =
        serde_json::from_value(correlation.clone());
    match condition {
        Ok(condition) => expression::evaluate(&condition, payload).unwrap_or(false),
        Err(_) => true,
    }
}

/// Whether a step's `wait.event` field names `event_type` (used by
/// `dag`/`definition` validation and by the engine to derive the
/// `wait:<event>` pause reason it sets before suspending).
pub fn step_waits_on(body: &StepBody, event_type: &str) -> bool {
    matches!(body, StepBody::Wait { event, .. } if event == event_type)
}

/// Whether `trigger` fires for `event_type` (event triggers only).
pub fn trigger_matches_event(trigger: &Trigger, event_type: &str) -> bool {
    matches!(trigger, Trigger::Event { name } if name == event_type)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::ConditionOperator;
    use serde_json::json;

    #[test]
    fn validate_event_rejects_empty_source_or_type() {
        assert!(validate_event("order.created", "").is_err());
        assert!(validate_event("", "webhook").is_err());
        assert!(validate_event("order.created", "webhook").is_ok());
    }

    #[test]
    fn trigger_matches_event_only_for_event_triggers() {
        let trigger = Trigger::Event {
            name: "order.created".to_string(),
        };
        assert!(trigger_matches_event(&trigger, "order.created"));
        assert!(!trigger_matches_event(&trigger, "order.shipped"));
        assert!(!trigger_matches_event(
            &Trigger::Schedule { cron: "@daily".to_string() },
            "order.created"
        ));
    }

    #[test]
    fn step_waits_on_matches_wait_event_name() {
        let body = StepBody::Wait {
            event: "approval.granted".to_string(),
            timeout_secs: 60,
            on_timeout: None,
        };
        assert!(step_waits_on(&body, "approval.granted"));
        assert!(!step_waits_on(&body, "approval.denied"));
    }

    #[test]
    fn correlation_matches_any_event_when_unset() {
        let ctx = json!({ "variables": {} });
        assert!(correlation_matches(&ctx, &json!({ "id": 1 })));
    }

    #[test]
    fn correlation_matches_evaluates_stored_condition() {
        let condition = loomwork_types::workflow::Condition::Leaf {
            field: "order_id".to_string(),
            operator: ConditionOperator::Eq,
            value: json!(42),
        };
        let ctx = json!({ "variables": { "__wait_correlation": condition } });
        assert!(correlation_matches(&ctx, &json!({ "order_id": 42 })));
        assert!(!correlation_matches(&ctx, &json!({ "order_id": 7 })));
    }
}
