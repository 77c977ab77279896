//! Background loops that give the engine its "process owns the clock" half:
//! the cron scheduler poll, the wait-timeout sweep, and the approval-expiry
//! sweep. None of these live in `loomwork-core` -- the core exposes a single
//! `tick`/`sweep_*` call per loop and leaves task spawning to whichever
//! binary embeds it, the same division of labor as `event_router` leaving
//! HTTP/CLI transport to its callers.

use std::time::Duration;

use loomwork_core::workflow::executor::{sweep_expired_approvals, sweep_wait_timeouts};
use loomwork_core::workflow::scheduler::{self, ScheduleFireResult};
use sqlx::Row;

use crate::state::AppState;

const SWEEP_BATCH_LIMIT: u32 = 100;

/// Spawn the scheduler tick, wait-timeout sweep, and approval-expiry sweep
/// loops on the current Tokio runtime. Returns immediately; the loops run
/// for the lifetime of the process.
pub fn spawn_background_tasks(state: AppState) {
    tokio::spawn(scheduler_loop(state.clone()));
    tokio::spawn(wait_timeout_sweep_loop(state.clone()));
    tokio::spawn(approval_expiry_sweep_loop(state));
}

/// Poll for due schedules and start the bound workflow directly for each one
/// that wins its CAS race, bypassing event-type matching per the scheduler's
/// contract.
async fn scheduler_loop(state: AppState) {
    let interval = Duration::from_secs(state.engine_config.poll_interval_secs.max(1));
    loop {
        tokio::time::sleep(interval).await;

        let fired = match scheduler::tick(state.workflow_repo.as_ref(), chrono::Utc::now()).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "scheduler tick failed");
                continue;
            }
        };

        for result in fired {
            let ScheduleFireResult::Fired { schedule_id, org_id, workflow_id } = result else {
                continue;
            };

            let workflow = match state.workflow_repo.get_workflow(&org_id, &workflow_id).await {
                Ok(Some(w)) => w,
                Ok(None) => {
                    tracing::warn!(%workflow_id, "schedule fired for a workflow that no longer exists");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%workflow_id, error = %e, "failed to load workflow for fired schedule");
                    continue;
                }
            };

            let payload = serde_json::json!({ "schedule_id": schedule_id, "workflow_id": workflow_id });
            match state.workflow_engine.start(org_id, &workflow, "schedule.fired", Some(payload)).await {
                Ok(execution) => {
                    tracing::info!(%schedule_id, %workflow_id, execution_id = %execution.id, "schedule started execution");
                }
                Err(e) => {
                    tracing::warn!(%schedule_id, %workflow_id, error = %e, "failed to start execution for fired schedule");
                }
            }
        }
    }
}

/// Resume any `wait:`-paused execution whose deadline has elapsed, then
/// drive it forward to its `on_timeout` branch (or terminal failure).
async fn wait_timeout_sweep_loop(state: AppState) {
    let interval = Duration::from_secs(state.engine_config.poll_interval_secs.max(1));
    loop {
        tokio::time::sleep(interval).await;

        let timed_out = match sweep_wait_timeouts(&state.workflow_checkpoints, SWEEP_BATCH_LIMIT).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "wait-timeout sweep failed");
                continue;
            }
        };

        for execution_id in timed_out {
            if let Err(e) = drive_by_execution_id(&state, execution_id).await {
                tracing::warn!(%execution_id, error = %e, "failed to drive execution past wait timeout");
            }
        }
    }
}

/// Expire pending approvals past `expires_at`, resuming their bound
/// executions with `{approved: false, expired: true}`. Iterates every org
/// with at least one API key -- the demonstration binary has no broader
/// org directory than that.
async fn approval_expiry_sweep_loop(state: AppState) {
    let interval = Duration::from_secs(state.engine_config.poll_interval_secs.max(1));
    loop {
        tokio::time::sleep(interval).await;

        let org_ids: Vec<String> = match sqlx::query("SELECT DISTINCT org_id FROM api_keys")
            .fetch_all(&state.db_pool.reader)
            .await
        {
            Ok(rows) => rows.iter().map(|r| r.get::<String, _>("org_id")).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list orgs for approval-expiry sweep");
                continue;
            }
        };

        for org_id_str in org_ids {
            let Ok(org_id) = org_id_str.parse() else { continue };
            let expired = match sweep_expired_approvals(&state.workflow_checkpoints, org_id).await {
                Ok(expired) => expired,
                Err(e) => {
                    tracing::warn!(%org_id, error = %e, "approval-expiry sweep failed");
                    continue;
                }
            };

            for approval_id in expired {
                tracing::info!(%approval_id, %org_id, "approval expired");
                // `expire_sweep` already resumed the execution; recover its id
                // from the approval request so we can drive it forward too.
                let request = match state.workflow_repo.get_approval_request(&org_id, &approval_id).await {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(%approval_id, error = %e, "failed to reload expired approval request");
                        continue;
                    }
                };

                let workflow_id = match state.workflow_repo.get_execution(&org_id, &request.execution_id).await {
                    Ok(Some(execution)) => execution.workflow_id,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(execution_id = %request.execution_id, error = %e, "failed to load execution for expired approval");
                        continue;
                    }
                };

                let workflow = match state.workflow_repo.get_workflow(&org_id, &workflow_id).await {
                    Ok(Some(w)) => w,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(%workflow_id, error = %e, "failed to load workflow for expired approval");
                        continue;
                    }
                };

                if let Err(e) = state
                    .workflow_engine
                    .drive_running(org_id, &workflow, request.execution_id)
                    .await
                {
                    tracing::warn!(execution_id = %request.execution_id, error = %e, "failed to drive execution past expired approval");
                }
            }
        }
    }
}

async fn drive_by_execution_id(state: &AppState, execution_id: uuid::Uuid) -> anyhow::Result<()> {
    // `get_execution` is org-scoped and the sweep only returns execution
    // ids, so recover the owning org with a direct column lookup first --
    // the same raw-query style `AppState::default_org_id` already uses.
    let row: (String,) = sqlx::query_as("SELECT org_id FROM workflow_executions WHERE id = ?")
        .bind(execution_id.to_string())
        .fetch_one(&state.db_pool.reader)
        .await?;
    let org_id: uuid::Uuid = row.0.parse()?;

    let execution = state
        .workflow_repo
        .get_execution(&org_id, &execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("execution {execution_id} not found after sweep"))?;

    let workflow = state
        .workflow_repo
        .get_workflow(&org_id, &execution.workflow_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("workflow {} not found", execution.workflow_id))?;

    state
        .workflow_engine
        .drive_running(org_id, &workflow, execution.id)
        .await?;
    Ok(())
}
