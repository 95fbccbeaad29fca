use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use tracing::debug;

use conduit_core::config::HttpConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::HttpClient;
use conduit_core::types::{HttpRequest, HttpResponse};

/// reqwest-backed client for `api` steps.
pub struct ReqwestHttpClient {
    http: Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConduitError::Http(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

pub(crate) fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ConduitError::Http(format!("invalid HTTP method: {}", method)))
}

/// JSON when the body parses, otherwise the raw text as a JSON string.
pub(crate) fn parse_body(text: String) -> serde_json::Value {
    if text.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let method = parse_method(&request.method)?;
            let mut req = self.http.request(method, &request.url);

            for (k, v) in &request.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Some(ref body) = request.body {
                req = req.json(body);
            }
            if let Some(ms) = request.timeout_ms {
                req = req.timeout(Duration::from_millis(ms));
            }

            let response = req
                .send()
                .await
                .map_err(|e| ConduitError::Http(e.to_string()))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| ConduitError::Http(e.to_string()))?;

            debug!(url = %request.url, status, "HTTP request finished");
            Ok(HttpResponse {
                status,
                body: parse_body(text),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_method_is_case_insensitive() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method(" Get ").unwrap(), Method::GET);
    }

    #[test]
    fn test_parse_method_rejects_garbage() {
        assert!(matches!(parse_method("NOT A METHOD"), Err(ConduitError::Http(_))));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(r#"{"ok":true}"#.into()), json!({"ok": true}));
        assert_eq!(parse_body("plain text".into()), json!("plain text"));
        assert_eq!(parse_body(String::new()), serde_json::Value::Null);
    }
}
