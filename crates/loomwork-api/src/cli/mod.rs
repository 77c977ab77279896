//! CLI command definitions and dispatch for the `loomworkctl` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod status;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Operate the loomwork workflow engine.
#[derive(Parser)]
#[command(name = "loomworkctl", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage workflows: register definitions, trigger events, inspect runs.
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// System status dashboard.
    Status,

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
