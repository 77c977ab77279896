//! Observability bootstrap for the loomwork workflow engine.
//!
//! Wraps `tracing`/`tracing-subscriber` with an optional OpenTelemetry
//! bridge (stdout exporter in development, OTLP-capable in production)
//! following the same `init_tracing`/`shutdown_tracing` shape used
//! throughout the rest of this crate family.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
