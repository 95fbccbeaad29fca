use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use conduit_core::config::NotificationsConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::traits::Notifier;
use conduit_core::types::DeliveryReceipt;

/// Delivers notifications over HTTP: an email relay, a Slack incoming
/// webhook, and arbitrary webhooks.
pub struct HttpNotifier {
    http: Client,
    email_relay_url: Option<String>,
    slack_webhook_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(config: &NotificationsConfig) -> Self {
        Self {
            http: Client::new(),
            email_relay_url: config.email_relay_url.clone(),
            slack_webhook_url: config.slack_webhook_url.clone(),
        }
    }

    async fn post(&self, channel: &str, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| notification_error(channel, e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(notification_error(channel, format!("HTTP {}: {}", status, text)));
        }
        Ok(())
    }
}

fn notification_error(channel: &str, message: impl Into<String>) -> ConduitError {
    ConduitError::Notification {
        channel: channel.to_string(),
        message: message.into(),
    }
}

impl Notifier for HttpNotifier {
    fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let recipients = recipients.to_vec();
        let payload = json!({ "to": recipients, "subject": subject, "body": body });

        Box::pin(async move {
            let Some(ref url) = self.email_relay_url else {
                return Err(notification_error("email", "no email relay configured"));
            };
            if recipients.is_empty() {
                return Err(notification_error("email", "no recipients"));
            }
            self.post("email", url, &payload).await?;
            info!(recipients = recipients.len(), "Email sent");
            Ok(DeliveryReceipt::new("email", recipients))
        })
    }

    fn send_slack(&self, channels: &[String], text: &str) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let channels = channels.to_vec();
        let text = text.to_string();

        Box::pin(async move {
            let Some(ref url) = self.slack_webhook_url else {
                return Err(notification_error("slack", "no Slack webhook configured"));
            };
            if channels.is_empty() {
                self.post("slack", url, &json!({ "text": text })).await?;
            }
            for channel in &channels {
                self.post("slack", url, &json!({ "channel": channel, "text": text }))
                    .await?;
            }
            info!(channels = channels.len(), "Slack message sent");
            Ok(DeliveryReceipt::new("slack", channels))
        })
    }

    fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> BoxFuture<'_, Result<DeliveryReceipt>> {
        let url = url.to_string();
        let payload = payload.clone();

        Box::pin(async move {
            self.post("webhook", &url, &payload).await?;
            info!(url = %url, "Webhook delivered");
            Ok(DeliveryReceipt::new("webhook", vec![url]))
        })
    }
}
