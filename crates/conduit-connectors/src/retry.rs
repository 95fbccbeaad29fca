use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use conduit_core::config::RetryConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::ModelClient;
use conduit_core::types::Inference;

/// A model client that retries transient inference failures.
pub struct RetryingModelClient {
    inner: Box<dyn ModelClient>,
    retry_config: RetryConfig,
}

impl RetryingModelClient {
    pub fn new(inner: Box<dyn ModelClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &ConduitError) -> bool {
    match e {
        ConduitError::Model(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelClient for RetryingModelClient {
    fn infer(
        &self,
        model: &str,
        prompt: &str,
        data: &serde_json::Value,
    ) -> BoxFuture<'_, Result<Inference>> {
        let model = model.to_string();
        let prompt = prompt.to_string();
        let data = data.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.infer(&model, &prompt, &data).await {
                    Ok(inference) => return Ok(inference),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
