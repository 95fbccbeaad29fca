use serde_json::{json, Value};

use conduit_core::error::{ConduitError, Result};
use conduit_core::flow::{HumanConfig, Step};
use conduit_core::template::render_str;
use conduit_core::types::HumanIntervention;
use conduit_core::work::{WorkItem, WorkKind};

use super::{deadline_after, StepExecutor};
use crate::context::ExecutionContext;

impl StepExecutor {
    /// Create a work item and wait for a human. Expiry surfaces as an error.
    pub(super) async fn run_human(
        &self,
        step: &Step,
        cfg: &HumanConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let timeout = step
            .timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(self.settings.work_item_timeout);
        let data = ctx.data().await;

        let title = cfg
            .title
            .as_deref()
            .map(|t| render_str(t, &data))
            .unwrap_or_else(|| step.name.clone());
        let mut item = WorkItem::new(&step.id, ctx.execution_id(), title, WorkKind::Task, deadline_after(timeout))
            .with_description(render_str(&cfg.description, &data))
            .with_priority(cfg.priority)
            .with_data(data);
        if let Some(ref assignee) = cfg.assignee {
            item = item.assigned(assignee);
        }
        let item_id = item.id.clone();

        let resolution = self
            .with_human_wait(ctx, self.queue.await_work_item(item, timeout))
            .await?;

        ctx.record_intervention(HumanIntervention {
            step_id: step.id.clone(),
            work_item_id: item_id.clone(),
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

        Ok(json!({
            "workItemId": item_id,
            "approved": true,
            "approver": resolution.approver,
            "comments": resolution.comments,
            "data": resolution.data,
        }))
    }
}
