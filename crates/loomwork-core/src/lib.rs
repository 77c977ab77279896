//! Business logic and repository trait definitions for the loomwork
//! workflow engine.
//!
//! This crate defines the "ports" (repository traits) that the
//! infrastructure layer implements, and the workflow engine components:
//! definition validation, expression evaluation, the event router, the cron
//! scheduler, the execution engine, the pause/resume coordinator, and the
//! approval coordinator. It depends only on `loomwork-types` -- never on
//! `loomwork-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
