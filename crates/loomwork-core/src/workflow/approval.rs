//! Approval coordinator: `pending -> {approved, rejected, expired}`.
//!
//! Transitions only ever happen through `create`/`decide`/`expire_sweep`;
//! `decide` is guarded by the repository's CAS on approval status so a
//! double-clicked decision UI can't approve and reject the same request.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use loomwork_types::workflow::{ApprovalRequest, ApprovalStatus};

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::pause_resume::{self, PauseResumeError};
use crate::repository::workflow::WorkflowRepository;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request {0} not found")]
    NotFound(Uuid),

    #[error("approval request {0} is not pending")]
    NotPending(Uuid),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    PauseResume(#[from] PauseResumeError),
}

/// Looks up where to send a decision notification for a given org/role.
///
/// A collaborator trait with no concrete implementation required by the
/// core; `NullApproverDirectory` is sufficient for tests and for
/// deployments that don't wire up notification dispatch.
pub trait LookupApprover: Send + Sync {
    fn lookup(&self, org_id: Uuid, role: &str) -> Option<String>;
}

pub struct NullApproverDirectory;

impl LookupApprover for NullApproverDirectory {
    fn lookup(&self, _org_id: Uuid, _role: &str) -> Option<String> {
        None
    }
}

/// Create a pending approval request.
pub async fn create<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
    execution_id: Uuid,
    entity_type: &str,
    entity_id: &str,
    approver_role: &str,
    reason: Option<&str>,
    ttl: Option<chrono::Duration>,
) -> Result<ApprovalRequest, ApprovalError> {
    let id = Uuid::now_v7();
    let now = Utc::now();
    let request = ApprovalRequest {
        id,
        request_id: ApprovalRequest::public_id(id),
        org_id,
        execution_id,
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        requester_id: None,
        approver_role: approver_role.to_string(),
        approver_id: None,
        status: ApprovalStatus::Pending,
        reason: reason.map(String::from),
        decision_reason: None,
        requested_at: now,
        decided_at: None,
        expires_at: ttl.map(|d| now + d),
    };

    checkpoints
        .repo()
        .create_approval_request(&request)
        .await
        .map_err(|e| ApprovalError::Checkpoint(CheckpointError::Repository(e.to_string())))?;

    tracing::info!(request_id = %request.request_id, %execution_id, approver_role, "approval requested");
    Ok(request)
}

/// Decide a pending approval request and resume its bound execution.
///
/// Notification dispatch via `approvers` is best-effort: a lookup miss or
/// dispatch failure never rolls back the decision that was already
/// persisted.
pub async fn decide<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    approvers: &dyn LookupApprover,
    org_id: Uuid,
    approval_id: Uuid,
    approver_id: Uuid,
    approved: bool,
    decision_reason: Option<&str>,
) -> Result<ApprovalRequest, ApprovalError> {
    let request = checkpoints
        .repo()
        .get_approval_request(&org_id, &approval_id)
        .await
        .map_err(|e| ApprovalError::Checkpoint(CheckpointError::Repository(e.to_string())))?
        .ok_or(ApprovalError::NotFound(approval_id))?;

    if request.status != ApprovalStatus::Pending
        || request.expires_at.is_some_and(|exp| exp <= Utc::now())
    {
        return Err(ApprovalError::NotPending(approval_id));
    }

    let next_status = if approved {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Rejected
    };

    let won = checkpoints
        .record_approval_decision(approval_id, next_status, Some(approver_id), decision_reason)
        .await?;
    if !won {
        return Err(ApprovalError::NotPending(approval_id));
    }

    pause_resume::resume_with_approval(checkpoints, org_id, request.execution_id, approved).await?;

    if approvers.lookup(org_id, &request.approver_role).is_none() {
        tracing::debug!(
            request_id = %request.request_id,
            role = request.approver_role,
            "no notification address resolved for approver role; skipping dispatch"
        );
    }

    Ok(ApprovalRequest {
        status: next_status,
        approver_id: Some(approver_id),
        decision_reason: decision_reason.map(String::from),
        decided_at: Some(Utc::now()),
        ..request
    })
}

/// Expire every `pending` approval whose `expires_at` has elapsed, resuming
/// each bound execution with `{approved: false, expired: true}`.
pub async fn expire_sweep<R: WorkflowRepository>(
    checkpoints: &CheckpointManager<R>,
    org_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, ApprovalError> {
    let pending = checkpoints
        .repo()
        .list_pending_approvals(&org_id)
        .await
        .map_err(|e| ApprovalError::Checkpoint(CheckpointError::Repository(e.to_string())))?;

    let mut expired = Vec::new();
    for request in pending {
        let Some(expires_at) = request.expires_at else {
            continue;
        };
        if expires_at > now {
            continue;
        }

        let won = checkpoints
            .record_approval_decision(request.id, ApprovalStatus::Expired, None, None)
            .await?;
        if !won {
            continue;
        }

        let _ = pause_resume::resume(
            checkpoints,
            org_id,
            request.execution_id,
            serde_json::json!({ "approved": false, "expired": true }),
        )
        .await;

        expired.push(request.id);
    }

    Ok(expired)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_directory_always_misses() {
        let dir = NullApproverDirectory;
        assert_eq!(dir.lookup(Uuid::now_v7(), "admin"), None);
    }
}
