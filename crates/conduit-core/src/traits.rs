use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{DeliveryReceipt, HttpRequest, HttpResponse, Inference};

/// Model inference backend used by `ai` steps.
pub trait ModelClient: Send + Sync + 'static {
    /// Run `prompt` against `model` with the execution data as context.
    fn infer(
        &self,
        model: &str,
        prompt: &str,
        data: &serde_json::Value,
    ) -> BoxFuture<'_, Result<Inference>>;
}

/// Outbound HTTP used by `api` steps.
pub trait HttpClient: Send + Sync + 'static {
    /// Non-2xx statuses are returned as responses, not errors.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// Notification channels used by `notification` steps and failure alerts.
pub trait Notifier: Send + Sync + 'static {
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<DeliveryReceipt>>;

    fn send_slack(&self, channels: &[String], text: &str) -> BoxFuture<'_, Result<DeliveryReceipt>>;

    fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> BoxFuture<'_, Result<DeliveryReceipt>>;
}

/// A named external integration invoked by `automation` steps.
pub trait Integration: Send + Sync + 'static {
    /// Registry key.
    fn name(&self) -> &str;

    /// Execute with rendered parameters and the current execution data.
    fn execute(
        &self,
        parameters: serde_json::Value,
        data: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}
