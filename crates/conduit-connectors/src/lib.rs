pub mod http;
pub mod model;
pub mod notify;
pub mod retry;

use std::sync::Arc;

use conduit_core::config::AppConfig;
use conduit_core::error::Result;
use conduit_core::traits::{HttpClient, ModelClient, Notifier};

pub use http::ReqwestHttpClient;
pub use model::{HttpModelClient, UnconfiguredModel};
pub use notify::HttpNotifier;
pub use retry::RetryingModelClient;

/// The model client described by `[model]`, wrapped in retries when
/// `[model.retry]` is set.
pub fn model_client(config: &AppConfig) -> Arc<dyn ModelClient> {
    let Some(client) = HttpModelClient::from_config(&config.model) else {
        return Arc::new(UnconfiguredModel);
    };
    match config.model.retry {
        Some(ref retry) => Arc::new(RetryingModelClient::new(Box::new(client), retry.clone())),
        None => Arc::new(client),
    }
}

pub fn http_client(config: &AppConfig) -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(ReqwestHttpClient::new(&config.http)?))
}

pub fn notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    Arc::new(HttpNotifier::new(&config.notifications))
}
