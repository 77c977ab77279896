//! System status dashboard command.

use anyhow::Result;
use console::style;

use loomwork_core::repository::workflow::WorkflowRepository;

use crate::state::AppState;

/// Display system status dashboard.
///
/// Shows workflow/schedule counts, the resolved engine config, and version.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let org_id = state.default_org_id().await?;
    let workflows = state.workflow_repo.list_workflows(&org_id).await?;
    let enabled = workflows.iter().filter(|w| w.enabled).count();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "workflows": {
                "total": workflows.len(),
                "enabled": enabled,
            },
            "engine_config": state.engine_config,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} loomwork v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:   {}", style(workflows.len()).bold());
    println!("  Enabled: {}", style(enabled).green());
    println!();

    println!("  {}", style("── Engine config ──").dim());
    println!(
        "  Poll interval:   {}s",
        state.engine_config.poll_interval_secs
    );
    println!(
        "  Max pause days:  {}",
        state.engine_config.max_pause_days
    );
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
