use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;

use conduit_core::config::ModelConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::ModelClient;
use conduit_core::types::Inference;

#[derive(Serialize)]
struct InferRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    data: &'a serde_json::Value,
}

/// Posts `{model, prompt, data}` to an inference endpoint and expects an
/// `{decision, confidence, reasoning}` reply.
pub struct HttpModelClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &ModelConfig) -> Option<Self> {
        config
            .endpoint
            .as_ref()
            .map(|endpoint| Self::new(endpoint.clone(), config.api_key.clone()))
    }
}

impl ModelClient for HttpModelClient {
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
            let body = InferRequest {
                model: &model,
                prompt: &prompt,
                data: &data,
            };
            let mut req = self.http.post(&self.endpoint).json(&body);
            if let Some(ref api_key) = self.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| ConduitError::Model(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(ConduitError::Model(format!("HTTP {}: {}", status, body)));
            }

            let mut inference: Inference = response
                .json()
                .await
                .map_err(|e| ConduitError::Model(format!("malformed inference: {}", e)))?;
            inference.confidence = inference.confidence.clamp(0.0, 1.0);
            Ok(inference)
        })
    }
}

/// Stand-in used when no model endpoint is configured. Every call fails.
pub struct UnconfiguredModel;

impl ModelClient for UnconfiguredModel {
    fn infer(
        &self,
        _model: &str,
        _prompt: &str,
        _data: &serde_json::Value,
    ) -> BoxFuture<'_, Result<Inference>> {
        Box::pin(async {
            Err(ConduitError::Model(
                "no model endpoint configured ([model] endpoint)".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_endpoint() {
        let mut config = ModelConfig::default();
        assert!(HttpModelClient::from_config(&config).is_none());
        config.endpoint = Some("http://localhost:9000/infer".into());
        assert!(HttpModelClient::from_config(&config).is_some());
    }

    #[tokio::test]
    async fn test_unconfigured_model_fails() {
        let err = UnconfiguredModel
            .infer("default", "classify", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Model(_)));
    }
}
