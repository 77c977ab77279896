//! CLI workflow management subcommands.
//!
//! Provides create, trigger, list, status, logs, delete, enable/disable,
//! approve, and event-routing operations against the local org (see
//! `AppState::default_org_id`).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use loomwork_core::repository::workflow::WorkflowRepository;
use loomwork_core::workflow::approval::NullApproverDirectory;
use loomwork_core::workflow::definition::load_workflow_file;
use loomwork_core::workflow::event_router;
use loomwork_core::workflow::executor::decide_approval;
use loomwork_core::workflow::pause_resume::resume;
use loomwork_types::workflow::{Workflow, WorkflowExecutionStatus};

use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Register a new version of a workflow from a YAML file.
    Create {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Stable external workflow id (defaults to the file stem).
        #[arg(long)]
        id: Option<String>,

        /// Human-readable name (defaults to the workflow id).
        #[arg(long)]
        name: Option<String>,
    },

    /// Trigger a workflow's enabled event-matched listeners, or start one
    /// directly by workflow id if `--direct` is set.
    Trigger {
        /// Event type (e.g. `order.created`) or, with `--direct`, a workflow id.
        target: String,

        /// Bypass event matching and start this workflow id directly.
        #[arg(long)]
        direct: bool,

        /// Optional JSON payload.
        #[arg(long)]
        payload: Option<String>,
    },

    /// List registered workflows.
    List,

    /// Enable or disable the latest version of a workflow.
    SetEnabled {
        /// Workflow id.
        workflow_id: String,

        /// Desired enabled state.
        #[arg(long)]
        enabled: bool,
    },

    /// Show recent executions for a workflow.
    Status {
        /// Workflow id.
        workflow_id: String,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Show step execution logs for a specific execution.
    Logs {
        /// Execution UUID.
        execution_id: String,
    },

    /// Delete the latest registered version of a workflow.
    Delete {
        /// Workflow id.
        workflow_id: String,
    },

    /// Approve or reject a pending approval request.
    Approve {
        /// Approval request UUID.
        approval_id: String,

        /// Reject instead of approve.
        #[arg(long)]
        reject: bool,

        /// Optional decision reason.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Resume a paused execution, optionally merging in JSON data.
    Resume {
        /// Execution UUID.
        execution_id: String,

        /// Optional JSON object merged into the execution's resume data.
        #[arg(long)]
        merge_data: Option<String>,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    let repo = loomwork_infra::sqlite::workflow::SqliteWorkflowRepository::new(state.db_pool.clone());
    let org_id = state.default_org_id().await?;

    match cmd {
        WorkflowCommand::Create { file, id, name } => {
            handle_create(&file, id, name, org_id, &repo, json).await
        }
        WorkflowCommand::Trigger { target, direct, payload } => {
            handle_trigger(&target, direct, payload.as_deref(), org_id, state, json).await
        }
        WorkflowCommand::List => handle_list(org_id, &repo, json).await,
        WorkflowCommand::SetEnabled { workflow_id, enabled } => {
            handle_set_enabled(&workflow_id, enabled, org_id, &repo, json).await
        }
        WorkflowCommand::Status { workflow_id, limit } => {
            handle_status(&workflow_id, limit, org_id, &repo, json).await
        }
        WorkflowCommand::Logs { execution_id } => handle_logs(&execution_id, &repo, json).await,
        WorkflowCommand::Delete { workflow_id } => handle_delete(&workflow_id, org_id, &repo, json).await,
        WorkflowCommand::Approve { approval_id, reject, reason } => {
            handle_approve(&approval_id, !reject, reason.as_deref(), org_id, state, json).await
        }
        WorkflowCommand::Resume { execution_id, merge_data } => {
            handle_resume(&execution_id, merge_data.as_deref(), org_id, state, json).await
        }
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

async fn handle_create(
    file: &PathBuf,
    id: Option<String>,
    name: Option<String>,
    org_id: Uuid,
    repo: &impl WorkflowRepository,
    json: bool,
) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow file {}", file.display()))?;

    let workflow_id = id.unwrap_or_else(|| {
        file.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string()
    });
    let name = name.unwrap_or_else(|| workflow_id.clone());

    let existing = repo
        .get_latest_workflow(&org_id, &workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to look up existing workflow: {e}"))?;
    let version = existing.map(|w| w.version + 1).unwrap_or(1);

    let now = chrono::Utc::now();
    let workflow = Workflow {
        id: Uuid::now_v7(),
        org_id,
        workflow_id: workflow_id.clone(),
        version,
        name,
        description: None,
        definition,
        enabled: true,
        tags: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    repo.save_workflow(&workflow)
        .await
        .map_err(|e| anyhow::anyhow!("failed to save workflow: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!();
        println!(
            "  {} Registered workflow '{}' (version {})",
            style("*").green().bold(),
            style(&workflow.workflow_id).cyan(),
            workflow.version
        );
        println!("  Steps: {}", workflow.definition.steps.len());
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

async fn handle_trigger(
    target: &str,
    direct: bool,
    payload_str: Option<&str>,
    org_id: Uuid,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let payload = match payload_str {
        Some(raw) => serde_json::from_str(raw).with_context(|| "invalid JSON payload")?,
        None => serde_json::json!({}),
    };

    if direct {
        let workflow = state
            .workflow_repo
            .get_latest_workflow(&org_id, target)
            .await
            .map_err(|e| anyhow::anyhow!("failed to look up workflow: {e}"))?
            .ok_or_else(|| anyhow::anyhow!("workflow '{target}' not found"))?;

        let execution = state
            .workflow_engine
            .start(org_id, &workflow, "manual", Some(payload))
            .await
            .map_err(|e| anyhow::anyhow!("failed to start workflow: {e}"))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&execution)?);
        } else {
            println!();
            println!(
                "  {} Started execution {} for '{}'",
                style("*").green().bold(),
                style(execution.execution_id.clone()).cyan(),
                target
            );
            println!();
        }
        return Ok(());
    }

    let (record, handles) = event_router::route_event(&state.workflow_engine, org_id, target, "cli", payload)
        .await
        .map_err(|e| anyhow::anyhow!("failed to route event: {e}"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "event": record, "triggered": handles }))?
        );
    } else {
        println!();
        println!(
            "  {} Routed event '{}' to {} workflow(s)",
            style("*").green().bold(),
            target,
            handles.len()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(org_id: Uuid, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let workflows = repo
        .list_workflows(&org_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list workflows: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!("  Create one with: {}", style("loomworkctl workflow create <file.yaml>").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Enabled"),
        ]);

    for w in &workflows {
        table.add_row(vec![
            Cell::new(&w.workflow_id),
            Cell::new(&w.name),
            Cell::new(w.version),
            Cell::new(w.definition.steps.len()),
            Cell::new(if w.enabled { "yes" } else { "no" }),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Set enabled
// ---------------------------------------------------------------------------

async fn handle_set_enabled(
    workflow_id: &str,
    enabled: bool,
    org_id: Uuid,
    repo: &impl WorkflowRepository,
    json: bool,
) -> Result<()> {
    let workflow = repo
        .get_latest_workflow(&org_id, workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to look up workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("workflow '{workflow_id}' not found"))?;

    repo.set_workflow_enabled(&org_id, &workflow.id, enabled)
        .await
        .map_err(|e| anyhow::anyhow!("failed to update workflow: {e}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({"workflow_id": workflow_id, "enabled": enabled})
        );
    } else {
        println!();
        println!(
            "  {} Workflow '{}' is now {}",
            style("*").green().bold(),
            style(workflow_id).cyan(),
            if enabled { "enabled" } else { "disabled" }
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

async fn handle_status(
    workflow_id: &str,
    limit: u32,
    org_id: Uuid,
    repo: &impl WorkflowRepository,
    json: bool,
) -> Result<()> {
    let workflow = repo
        .get_latest_workflow(&org_id, workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to look up workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("workflow '{workflow_id}' not found"))?;

    let executions = repo
        .list_executions(&org_id, &workflow.id, limit)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for workflow '{workflow_id}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Trigger"),
            Cell::new("Started"),
            Cell::new("Completed"),
        ]);

    for e in &executions {
        let completed = e
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&e.execution_id),
            format_status(e.status),
            Cell::new(&e.trigger_event),
            Cell::new(e.started_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(completed),
        ]);
    }

    println!();
    println!("  Executions for workflow '{}'", style(workflow_id).cyan());
    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

async fn handle_logs(execution_id_str: &str, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let execution_id: Uuid = execution_id_str
        .parse()
        .with_context(|| format!("invalid execution id: '{execution_id_str}'"))?;

    let steps = repo
        .list_step_executions(&execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list step executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    if steps.is_empty() {
        println!();
        println!("  No step logs for execution '{execution_id_str}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Error"),
        ]);

    for s in &steps {
        let started = s
            .started_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = s
            .error_message
            .as_ref()
            .map(|e| e.chars().take(40).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&s.step_id),
            Cell::new(&s.step_type),
            Cell::new(format!("{:?}", s.status)),
            Cell::new(started),
            Cell::new(error),
        ]);
    }

    println!();
    println!("  Step logs for execution '{}'", style(execution_id_str).cyan());
    println!();
    println!("{table}");
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(workflow_id: &str, org_id: Uuid, repo: &impl WorkflowRepository, json: bool) -> Result<()> {
    let workflow = repo
        .get_latest_workflow(&org_id, workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to look up workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("workflow '{workflow_id}' not found"))?;

    let deleted = repo
        .delete_workflow(&org_id, &workflow.id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to delete workflow: {e}"))?;

    if !deleted {
        bail!("workflow '{workflow_id}' could not be deleted (not found in repository)");
    }

    if json {
        println!("{}", serde_json::json!({"deleted": workflow_id}));
    } else {
        println!();
        println!(
            "  {} Deleted workflow '{}'",
            style("*").green().bold(),
            style(workflow_id).cyan()
        );
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Approve
// ---------------------------------------------------------------------------

async fn handle_approve(
    approval_id_str: &str,
    approved: bool,
    reason: Option<&str>,
    org_id: Uuid,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let approval_id: Uuid = approval_id_str
        .parse()
        .with_context(|| format!("invalid approval id: '{approval_id_str}'"))?;

    let request = decide_approval(
        &state.workflow_checkpoints,
        &NullApproverDirectory,
        org_id,
        approval_id,
        org_id,
        approved,
        reason,
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to decide approval: {e}"))?;

    let execution = state
        .workflow_repo
        .get_execution(&org_id, &request.execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load execution: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("execution '{}' not found", request.execution_id))?;
    let workflow = state
        .workflow_repo
        .get_workflow(&org_id, &execution.workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("workflow '{}' not found", execution.workflow_id))?;

    let execution = state
        .workflow_engine
        .drive_running(org_id, &workflow, execution.id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to drive execution: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        println!();
        println!(
            "  {} {} approval '{}'",
            style("*").green().bold(),
            if approved { "Approved" } else { "Rejected" },
            style(approval_id_str).cyan()
        );
        println!("  Execution status: {:?}", execution.status);
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

async fn handle_resume(
    execution_id_str: &str,
    merge_data_str: Option<&str>,
    org_id: Uuid,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let execution_id: Uuid = execution_id_str
        .parse()
        .with_context(|| format!("invalid execution id: '{execution_id_str}'"))?;

    let merge_data = match merge_data_str {
        Some(raw) => serde_json::from_str(raw).with_context(|| "invalid JSON merge data")?,
        None => serde_json::json!({}),
    };

    resume(&state.workflow_checkpoints, org_id, execution_id, merge_data)
        .await
        .map_err(|e| anyhow::anyhow!("failed to resume execution: {e}"))?;

    let execution = state
        .workflow_repo
        .get_execution(&org_id, &execution_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load execution: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("execution '{execution_id}' not found"))?;
    let workflow = state
        .workflow_repo
        .get_workflow(&org_id, &execution.workflow_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load workflow: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("workflow '{}' not found", execution.workflow_id))?;

    let execution = state
        .workflow_engine
        .drive_running(org_id, &workflow, execution.id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to drive execution: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        println!();
        println!(
            "  {} Resumed execution '{}'",
            style("*").green().bold(),
            style(execution_id_str).cyan()
        );
        println!("  Execution status: {:?}", execution.status);
        println!();
    }

    Ok(())
}

fn format_status(status: WorkflowExecutionStatus) -> Cell {
    match status {
        WorkflowExecutionStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        WorkflowExecutionStatus::Running => Cell::new("running").fg(Color::Blue),
        WorkflowExecutionStatus::Paused => Cell::new("paused").fg(Color::Magenta),
        WorkflowExecutionStatus::Completed => Cell::new("completed").fg(Color::Green),
        WorkflowExecutionStatus::Failed => Cell::new("failed").fg(Color::Red),
        WorkflowExecutionStatus::Blocked => Cell::new("blocked").fg(Color::Red),
        WorkflowExecutionStatus::Cancelled => Cell::new("cancelled").fg(Color::DarkYellow),
    }
}
