use std::sync::Arc;

use conduit_core::config::GatewayConfig;
use conduit_engine::Orchestrator;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub orchestrator: Arc<Orchestrator>,
}
