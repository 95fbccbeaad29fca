use serde_json::{json, Value};
use tracing::warn;

use conduit_core::error::{ConduitError, Result};
use conduit_core::flow::{ApiConfig, Step};
use conduit_core::template::{render_str, render_value};
use conduit_core::types::HttpRequest;

use super::StepExecutor;
use crate::context::ExecutionContext;

impl StepExecutor {
    /// Issue the templated request, retrying `step.retries` times with a
    /// fixed delay. The last failure is surfaced.
    pub(super) async fn run_api(
        &self,
        step: &Step,
        cfg: &ApiConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let data = ctx.data().await;
        let request = HttpRequest {
            method: cfg.method.to_uppercase(),
            url: render_str(&cfg.url, &data),
            headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), render_str(v, &data)))
                .collect(),
            body: cfg.body.as_ref().map(|b| render_value(b, &data)),
            timeout_ms: step.timeout_ms,
        };
        let delay = cfg
            .retry_delay_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(self.settings.api_retry_delay);

        let mut last_error = None;
        for attempt in 0..=step.retries {
            if attempt > 0 {
                warn!(
                    step_id = %step.id,
                    attempt,
                    retries = step.retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying API call"
                );
                tokio::time::sleep(delay).await;
            }
            match self.http.send(request.clone()).await {
                Ok(response) if response.is_success() => {
                    return Ok(json!({ "status": response.status, "data": response.body }));
                }
                Ok(response) => {
                    last_error = Some(ConduitError::step_failed(
                        &step.id,
                        format!(
                            "{} {} returned HTTP {}",
                            request.method, request.url, response.status
                        ),
                    ));
                }
                Err(e) => {
                    last_error = Some(ConduitError::step_failed(&step.id, e.to_string()));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ConduitError::step_failed(&step.id, "no attempt made")))
    }
}
