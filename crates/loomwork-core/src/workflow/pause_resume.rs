//! Pause/resume coordinator: the single choke point for `running -> paused`
//! and `paused -> running` transitions.
//!
//! Both directions are guarded by a compare-and-set on `status`, so two
//! concurrent resumers (e.g. a webhook resume racing the wait-timeout sweep)
//! cannot both win.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use loomwork_types::workflow::{WorkflowExecution, WorkflowExecutionStatus};

use super::checkpoint::{CheckpointError, CheckpointManager};
use crate::repository::workflow::WorkflowRepository;

/// An execution that has been paused longer than this is no longer eligible
/// for resume; it is garbage-collectible via a separate policy.
pub const MAX_PAUSE: Duration = Duration::days(7);

#[derive(Debug, thiserror::Error)]
pub enum PauseResumeError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("execution {0} is not running")]
    NotRunning(Uuid),

    #[error("execution {0} is not paused")]
    NotPaused(Uuid),

    #[error("execution {0} has been paused longer than the {days}-day resume window")]
    Stale { execution_id: Uuid, days: i64 },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Pause a running execution.
///
/// Fails with `NotRunning` unless the execution is currently `Running`.
pub async fn pause<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
    execution_id: Uuid,
    reason: &str,
    step_id: Option<&str>,
) -> Result<WorkflowExecution, PauseResumeError> {
    let mut execution = checkpoints
        .get_execution(org_id, execution_id)
        .await
        .map_err(|e| match e {
            CheckpointError::ExecutionNotFound(id) => PauseResumeError::NotFound(id),
            other => PauseResumeError::Checkpoint(other),
        })?;

    if execution.status != WorkflowExecutionStatus::Running {
        return Err(PauseResumeError::NotRunning(execution_id));
    }

    checkpoints
        .checkpoint_execution_status(
            execution_id,
            WorkflowExecutionStatus::Running,
            WorkflowExecutionStatus::Paused,
        )
        .await?;

    let now = Utc::now();
    execution.status = WorkflowExecutionStatus::Paused;
    execution.paused_at = Some(now);
    execution.paused_reason = Some(reason.to_string());
    execution.paused_step_id = step_id.map(String::from);

    checkpoints.checkpoint_execution(&execution).await?;

    tracing::info!(%execution_id, reason, "execution paused");
    Ok(execution)
}

/// Resume a paused execution, deep-merging `merge_data` into `resume_data`.
///
/// Fails with `Stale` if the execution has been paused longer than
/// `MAX_PAUSE`. On success, `paused_step_id` becomes `next_step_id` for the
/// engine to pick up on its next cooperative tick.
pub async fn resume<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
    execution_id: Uuid,
    merge_data: Value,
) -> Result<WorkflowExecution, PauseResumeError> {
    let mut execution = checkpoints
        .get_execution(org_id, execution_id)
        .await
        .map_err(|e| match e {
            CheckpointError::ExecutionNotFound(id) => PauseResumeError::NotFound(id),
            other => PauseResumeError::Checkpoint(other),
        })?;

    if execution.status != WorkflowExecutionStatus::Paused {
        return Err(PauseResumeError::NotPaused(execution_id));
    }

    let paused_at = execution.paused_at.unwrap_or_else(Utc::now);
    let now = Utc::now();
    if now - paused_at > MAX_PAUSE {
        return Err(PauseResumeError::Stale {
            execution_id,
            days: MAX_PAUSE.num_days(),
        });
    }

    checkpoints
        .checkpoint_execution_status(
            execution_id,
            WorkflowExecutionStatus::Paused,
            WorkflowExecutionStatus::Running,
        )
        .await?;

    deep_merge(&mut execution.resume_data, merge_data);
    execution.status = WorkflowExecutionStatus::Running;
    execution.next_step_id = execution.paused_step_id.take();
    execution.paused_at = None;
    execution.paused_reason = None;
    execution.resume_count += 1;
    execution.last_resumed_at = Some(now);

    checkpoints.checkpoint_execution(&execution).await?;

    tracing::info!(%execution_id, resume_count = execution.resume_count, "execution resumed");
    Ok(execution)
}

/// Backward-compatible shorthand equivalent to
/// `resume(exec_id, {"approved": approved, "resumed_at": now})`.
pub async fn resume_with_approval<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
    execution_id: Uuid,
    approved: bool,
) -> Result<WorkflowExecution, PauseResumeError> {
    let merge = serde_json::json!({
        "approved": approved,
        "resumed_at": Utc::now().to_rfc3339(),
    });
    resume(checkpoints, org_id, execution_id, merge).await
}

/// Scan paused executions for `wait:`-prefixed pauses whose deadline has
/// elapsed and resume each with `{"timeout": true}`, landing the engine on
/// the wait step's `on_timeout` branch.
pub async fn sweep_wait_timeouts<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    limit: u32,
    deadline_for: impl Fn(&WorkflowExecution) -> Option<DateTime<Utc>>,
) -> Result<Vec<Uuid>, PauseResumeError> {
    let paused = checkpoints
        .repo()
        .get_paused_executions(limit)
        .await
        .map_err(|e| PauseResumeError::Checkpoint(CheckpointError::Repository(e.to_string())))?;

    let mut timed_out = Vec::new();
    let now = Utc::now();

    for execution in paused {
        let is_wait = execution
            .paused_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("wait:"));
        if !is_wait {
            continue;
        }
        let Some(deadline) = deadline_for(&execution) else {
            continue;
        };
        if now < deadline {
            continue;
        }

        resume(
            checkpoints,
            execution.org_id,
            execution.id,
            serde_json::json!({ "timeout": true }),
        )
        .await?;
        timed_out.push(execution.id);
    }

    Ok(timed_out)
}

/// Deep-merge `incoming` into `base`: objects merge key-by-key (recursively),
/// any other value (including arrays and scalars) is overwritten wholesale.
fn deep_merge(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                deep_merge(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (base_slot, incoming_value) => {
            *base_slot = incoming_value;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overwrites_scalars() {
        let mut base = json!({ "a": 1, "b": 2 });
        deep_merge(&mut base, json!({ "b": 3 }));
        assert_eq!(base, json!({ "a": 1, "b": 3 }));
    }

    #[test]
    fn deep_merge_recurses_into_nested_objects() {
        let mut base = json!({ "outer": { "a": 1, "b": 2 } });
        deep_merge(&mut base, json!({ "outer": { "b": 99, "c": 3 } }));
        assert_eq!(base, json!({ "outer": { "a": 1, "b": 99, "c": 3 } }));
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let mut base = json!({ "items": [1, 2, 3] });
        deep_merge(&mut base, json!({ "items": [9] }));
        assert_eq!(base, json!({ "items": [9] }));
    }

    #[test]
    fn max_pause_is_seven_days() {
        assert_eq!(MAX_PAUSE, Duration::days(7));
    }
}
