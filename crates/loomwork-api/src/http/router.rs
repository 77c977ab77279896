//! Axum router configuration with middleware.
//!
//! All REST routes are under `/api/v1/`. Middleware: CORS, tracing.
//!
//! This is a minimal demonstration HTTP layer for operability -- start the
//! engine, submit events, decide approvals -- not a full product surface.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route(
            "/workflows/{workflow_id}",
            get(handlers::workflow::get_workflow).delete(handlers::workflow::delete_workflow),
        )
        .route(
            "/workflows/{workflow_id}/enabled",
            post(handlers::workflow::set_workflow_enabled),
        )
        .route(
            "/workflows/{workflow_id}/executions",
            get(handlers::workflow::list_executions),
        )
        .route("/events", post(handlers::workflow::trigger_event))
        .route(
            "/executions/{execution_id}",
            get(handlers::workflow::get_execution),
        )
        .route(
            "/approvals/{approval_id}/decide",
            post(handlers::workflow::decide_approval_handler),
        )
        .route(
            "/executions/{execution_id}/resume",
            post(handlers::workflow::resume_execution),
        )
        // Webhooks
        .route("/webhooks/register", post(handlers::webhook::register_webhook))
        .route("/webhooks/{*path}", post(handlers::webhook::receive_webhook));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
