//! loomwork CLI and REST API entry point.
//!
//! Binary name: `loomworkctl`
//!
//! Parses CLI arguments, initializes database and services, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod background;
mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,loomwork=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "loomworkctl", &mut std::io::stdout());
        return Ok(());
    }

    // Initialize application state (DB, services)
    let state = AppState::init().await?;

    match cli.command {
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, cli.json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            // Ensure an API key exists, print it if new
            let api_key = http::extractors::auth::ensure_api_key(&state).await?;
            if api_key.starts_with("loomwork_") {
                println!();
                println!(
                    "  {} API key generated (save this -- it won't be shown again):",
                    console::style("🔑").bold()
                );
                println!();
                println!("  {}", console::style(&api_key).yellow().bold());
                println!();
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} loomwork API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            background::spawn_background_tasks(state.clone());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
