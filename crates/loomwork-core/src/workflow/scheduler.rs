//! Poll-based, timezone-aware cron scheduler.
//!
//! A single cooperative ticker repeatedly asks the repository for due
//! schedules and advances each one with a CAS write on `next_trigger_at`, so
//! two overlapping ticks (or two scheduler instances) fire a given schedule
//! at most once. There is no long-lived per-schedule task the way the
//! teacher's `tokio-cron-scheduler` wrapper registered one; durability comes
//! from the repository, not from in-process job state.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use croner::Cron;
use uuid::Uuid;

use loomwork_types::workflow::WorkflowSchedule;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),

    #[error("unknown IANA timezone '{0}'")]
    UnknownTimezone(String),

    #[error("cron has no future occurrence after the given instant")]
    NoFutureOccurrence,

    #[error("repository error: {0}")]
    Repository(String),
}

/// Parse and validate a cron expression (used by `definition::validate_trigger`
/// for embedded schedule triggers as well as schedule create/update).
///
/// Accepts six-field (with seconds) or five-field cron, and `@hourly`,
/// `@daily`, `@weekly`, `@monthly`, `@yearly`/`@annually` descriptor forms --
/// anything `croner::Cron` itself accepts.
pub fn parse_cron(expression: &str) -> Result<Cron, SchedulerError> {
    Cron::from_str(expression)
        .map_err(|e| SchedulerError::InvalidCron(expression.to_string(), e.to_string()))
}

/// Compute the strictly-next firing instant of `expression` in `timezone`
/// after `after`.
pub fn compute_next_trigger(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let cron = parse_cron(expression)?;
    let tz: chrono_tz::Tz = timezone
        .parse()
        .map_err(|_| SchedulerError::UnknownTimezone(timezone.to_string()))?;

    let local_after = after.with_timezone(&tz);
    let next = cron
        .find_next_occurrence(&local_after, false)
        .map_err(|_| SchedulerError::NoFutureOccurrence)?;

    Ok(next.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// ScheduleFireResult
// ---------------------------------------------------------------------------

/// Outcome of trying to fire one due schedule during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleFireResult {
    /// This tick won the CAS race and should emit a `schedule.fired` event
    /// for `workflow_id`.
    Fired {
        schedule_id: Uuid,
        org_id: Uuid,
        workflow_id: Uuid,
    },
    /// Another ticker already advanced this schedule past the observed
    /// `next_trigger_at`; skip it this tick.
    LostRace { schedule_id: Uuid },
}

/// Poll once for due schedules and attempt to advance each past `now`.
///
/// A schedule whose `next_trigger_at` is multiple periods in the past
/// collapses to a single fire: `next_trigger_at` is recomputed from `now`,
/// not from the stale value, so catching up never produces a backfill
/// storm of missed ticks.
pub async fn tick<R: WorkflowRepository>(
    repo: &R,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduleFireResult>, SchedulerError> {
    let due = repo
        .get_due_schedules()
        .await
        .map_err(|e| SchedulerError::Repository(e.to_string()))?;

    let mut results = Vec::with_capacity(due.len());
    for schedule in due {
        results.push(fire_one(repo, &schedule, now).await?);
    }
    Ok(results)
}

async fn fire_one<R: WorkflowRepository>(
    repo: &R,
    schedule: &WorkflowSchedule,
    now: DateTime<Utc>,
) -> Result<ScheduleFireResult, SchedulerError> {
    let next = compute_next_trigger(&schedule.cron_expression, &schedule.timezone, now)?;

    let won = repo
        .update_execution_next_trigger(&schedule.id, schedule.next_trigger_at, now, next)
        .await
        .map_err(|e| SchedulerError::Repository(e.to_string()))?;

    if won {
        tracing::info!(
            schedule_id = %schedule.id,
            workflow_id = %schedule.workflow_id,
            next_trigger_at = %next,
            "schedule fired"
        );
        Ok(ScheduleFireResult::Fired {
            schedule_id: schedule.id,
            org_id: schedule.org_id,
            workflow_id: schedule.workflow_id,
        })
    } else {
        tracing::debug!(schedule_id = %schedule.id, "lost CAS race for this tick, skipping");
        Ok(ScheduleFireResult::LostRace {
            schedule_id: schedule.id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
