//! Shared domain types for the loomwork workflow engine.
//!
//! This crate contains the core domain types for the workflow orchestration
//! engine: `Workflow`/`WorkflowDefinition`/`Step`, `WorkflowExecution`,
//! `WorkflowSchedule`, `ApprovalRequest`, the event and error taxonomies, and
//! configuration shapes.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
