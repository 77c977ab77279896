//! Event bus for workflow execution lifecycle broadcast.
//!
//! Provides an `EventBus` that distributes `WorkflowEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
