//! Infrastructure layer for the loomwork workflow engine.
//!
//! Contains implementations of the repository traits defined in
//! `loomwork-core`: SQLite-backed persistence for workflows, executions,
//! schedules and approvals, plus the config loader, data-directory
//! resolution, and outbound action/webhook adapters.

pub mod config;
pub mod filesystem;
pub mod sqlite;
pub mod workflow;
