use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use conduit_core::config::GatewayConfig;
use conduit_engine::Orchestrator;

use crate::routes;
use crate::state::AppState;

/// Build the REST API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/flows", get(routes::list_flows).post(routes::register_flow))
        .route("/api/flows/{id}/run", post(routes::run_flow))
        .route("/api/hooks/{*path}", post(routes::webhook))
        .route("/api/events/{name}", post(routes::publish_event))
        .route("/api/executions", get(routes::list_executions))
        .route("/api/executions/{id}", get(routes::get_execution))
        .route("/api/metrics", get(routes::metrics))
        .route("/api/work-items", get(routes::list_work_items))
        .route("/api/work-items/{id}/resolve", post(routes::resolve_work_item))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway in front of an orchestrator.
pub struct GatewayServer {
    config: GatewayConfig,
    orchestrator: Arc<Orchestrator>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            orchestrator: self.orchestrator.clone(),
        });
        let app = router(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
