//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.

use std::path::PathBuf;
use std::sync::Arc;

use loomwork_core::event::bus::EventBus;
use loomwork_core::workflow::checkpoint::CheckpointManager;
use loomwork_core::workflow::executor::WorkflowEngine;
use loomwork_infra::filesystem::resolve_data_dir;
use loomwork_infra::sqlite::pool::DatabasePool;
use loomwork_infra::sqlite::workflow::SqliteWorkflowRepository;
use loomwork_infra::workflow::action_dispatcher::HttpActionDispatcher;
use loomwork_infra::workflow::webhook_handler::WebhookRegistry;
use loomwork_types::config::EngineConfig;

/// Concrete workflow engine type pinned to the SQLite repository and the
/// HTTP-backed action dispatcher.
pub type ConcreteWorkflowEngine = WorkflowEngine<SqliteWorkflowRepository, HttpActionDispatcher>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub workflow_repo: Arc<SqliteWorkflowRepository>,
    pub workflow_checkpoints: Arc<CheckpointManager<SqliteWorkflowRepository>>,
    pub workflow_engine: Arc<ConcreteWorkflowEngine>,
    pub event_bus: EventBus,
    pub webhook_registry: Arc<WebhookRegistry>,
    pub engine_config: EngineConfig,
}

impl AppState {
    /// Initialize the application state: connect to DB, wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        // Initialize database
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("loomwork.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        // Wire the workflow engine: SQLite persistence, a checkpoint
        // manager on top of it, and an HTTP-backed action dispatcher for
        // outbound `webhook`/`http_request`/`notify` steps. `notify_url`
        // is unset until a notification collaborator is configured.
        let workflow_repo = SqliteWorkflowRepository::new(db_pool.clone());
        let checkpoints = Arc::new(CheckpointManager::new(SqliteWorkflowRepository::new(
            db_pool.clone(),
        )));
        let event_bus = EventBus::new(256);
        let dispatcher = HttpActionDispatcher::new(None);
        let workflow_engine = Arc::new(WorkflowEngine::new(
            checkpoints.clone(),
            dispatcher,
            event_bus.clone(),
        ));
        let engine_config = loomwork_infra::config::load_engine_config(&data_dir).await;

        Ok(Self {
            data_dir,
            db_pool,
            workflow_repo: Arc::new(workflow_repo),
            workflow_checkpoints: checkpoints,
            workflow_engine,
            event_bus,
            webhook_registry: Arc::new(WebhookRegistry::new()),
            engine_config,
        })
    }

    /// Resolve the org_id the CLI operates as.
    ///
    /// The CLI has no login flow -- it acts as whichever org owns the first
    /// (and, in the single-operator case, only) API key on the box. Mints
    /// that bootstrap key if none exists yet.
    pub async fn default_org_id(&self) -> anyhow::Result<uuid::Uuid> {
        crate::http::extractors::auth::ensure_api_key(self).await?;
        let (org_id_str,): (String,) = sqlx::query_as("SELECT org_id FROM api_keys LIMIT 1")
            .fetch_one(&self.db_pool.reader)
            .await?;
        Ok(uuid::Uuid::parse_str(&org_id_str)?)
    }
}
