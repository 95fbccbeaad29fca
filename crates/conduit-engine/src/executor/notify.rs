use serde_json::Value;

use conduit_core::error::Result;
use conduit_core::flow::{NotificationConfig, Step};
use conduit_core::template::{render_str, render_value};

use super::StepExecutor;
use crate::context::ExecutionContext;

impl StepExecutor {
    /// Render the template and hand it to the notifier. The receipt is the
    /// step's output.
    pub(super) async fn run_notification(
        &self,
        _step: &Step,
        cfg: &NotificationConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let data = ctx.data().await;
        let receipt = match cfg {
            NotificationConfig::Email {
                recipients,
                subject,
                template,
            } => {
                self.notifier
                    .send_email(
                        recipients,
                        &render_str(subject, &data),
                        &render_str(template, &data),
                    )
                    .await?
            }
            NotificationConfig::Slack { channels, template } => {
                self.notifier
                    .send_slack(channels, &render_str(template, &data))
                    .await?
            }
            NotificationConfig::Webhook { url, payload } => {
                let body = match payload {
                    Some(p) => render_value(p, &data),
                    None => data.clone(),
                };
                self.notifier
                    .send_webhook(&render_str(url, &data), &body)
                    .await?
            }
        };
        Ok(serde_json::to_value(receipt)?)
    }
}
