use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use conduit_core::error::{ConduitError, Result};
use conduit_core::flow::{AiConfig, Step};
use conduit_core::template::{display_value, lookup, render_str};
use conduit_core::types::{AiDecision, HumanIntervention};
use conduit_core::work::{WorkItem, WorkKind, WorkPriority};

use super::{deadline_after, StepExecutor};
use crate::context::ExecutionContext;

impl StepExecutor {
    /// Ask the model, then gate the decision on a human when it is flagged
    /// or below the confidence threshold.
    pub(super) async fn run_ai(
        &self,
        step: &Step,
        cfg: &AiConfig,
        ctx: &ExecutionContext,
        inference_timeout: Duration,
    ) -> Result<Value> {
        let model = step
            .ai_model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let data = ctx.data().await;
        let prompt = build_prompt(step, cfg, &data);

        let inference = tokio::time::timeout(inference_timeout, self.model.infer(&model, &prompt, &data))
            .await
            .map_err(|_| ConduitError::Timeout {
                step: step.id.clone(),
                timeout_ms: inference_timeout.as_millis() as u64,
            })??;
        // NaN compares false against the threshold, so it counts as no confidence
        let confidence = if inference.confidence.is_finite() {
            inference.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        ctx.record_ai_decision(AiDecision {
            step_id: step.id.clone(),
            model: model.clone(),
            confidence,
            decision: inference.decision.clone(),
            reasoning: inference.reasoning.clone(),
            timestamp: Utc::now(),
        })
        .await;

        let below_threshold = confidence < self.settings.confidence_threshold;
        if !step.human_approval && !below_threshold {
            return Ok(json!({
                "decision": inference.decision,
                "confidence": confidence,
                "reasoning": inference.reasoning,
                "model": model,
            }));
        }

        info!(
            step_id = %step.id,
            confidence,
            threshold = self.settings.confidence_threshold,
            forced = step.human_approval,
            "AI decision needs approval"
        );

        let timeout = self.settings.approval_timeout;
        let item = WorkItem::new(
            &step.id,
            ctx.execution_id(),
            format!("Approve decision: {}", step.name),
            WorkKind::Approval {
                model: model.clone(),
                confidence,
                decision: inference.decision.clone(),
                reasoning: inference.reasoning.clone(),
            },
            deadline_after(timeout),
        )
        .with_description(if below_threshold {
            format!(
                "Model confidence {:.2} is below {:.2}",
                confidence, self.settings.confidence_threshold
            )
        } else {
            "Step requires human approval".to_string()
        })
        .with_priority(WorkPriority::High)
        .with_data(data);
        let item_id = item.id.clone();

        let resolution = self
            .with_human_wait(ctx, self.queue.request_approval(item, timeout))
            .await;

        if resolution.timed_out {
            return Err(ConduitError::ApprovalTimeout {
                step: step.id.clone(),
            });
        }

        ctx.record_intervention(HumanIntervention {
            step_id: step.id.clone(),
            work_item_id: item_id,
            resolution: resolution.clone(),
        })
        .await;

        if !resolution.approved {
            return Err(ConduitError::ApprovalDenied {
                step: step.id.clone(),
                reason: resolution
                    .comments
                    .unwrap_or_else(|| "rejected".to_string()),
            });
        }

        // An approver may correct the decision
        let decision = resolution.data.unwrap_or(inference.decision);
        Ok(json!({
            "decision": decision,
            "confidence": confidence,
            "reasoning": inference.reasoning,
            "model": model,
            "approvedBy": resolution.approver,
        }))
    }
}

/// Rendered prompt followed by any requested input keys.
fn build_prompt(step: &Step, cfg: &AiConfig, data: &Value) -> String {
    let mut prompt = if cfg.prompt.is_empty() {
        format!("Decide the outcome of step '{}'.", step.name)
    } else {
        render_str(&cfg.prompt, data)
    };
    if !cfg.input_keys.is_empty() {
        prompt.push_str("\n\nContext:");
        for key in &cfg.input_keys {
            let value = lookup(data, key).map(display_value).unwrap_or_default();
            prompt.push_str(&format!("\n- {}: {}", key, value));
        }
    }
    prompt
}
