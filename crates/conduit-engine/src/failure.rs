use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use conduit_core::config::HooksConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::event::EventBus;
use conduit_core::flow::{Flow, Step};
use conduit_core::hooks::{run_hooks, HookEnv};
use conduit_core::types::{FlowEvent, StepState};
use conduit_core::work::{WorkItem, WorkKind, WorkPriority};

use crate::context::ExecutionContext;
use crate::executor::StepExecutor;
use crate::queue::HumanWorkQueue;

/// Routes a failed step: fallback first, then escalation, then failure.
pub struct FailureHandler {
    queue: Arc<HumanWorkQueue>,
    event_bus: Arc<EventBus>,
    escalation_timeout: Duration,
    hooks: Option<HooksConfig>,
}

impl FailureHandler {
    pub fn new(
        queue: Arc<HumanWorkQueue>,
        event_bus: Arc<EventBus>,
        escalation_timeout: Duration,
        hooks: Option<HooksConfig>,
    ) -> Self {
        Self {
            queue,
            event_bus,
            escalation_timeout,
            hooks,
        }
    }

    /// Decide what a step failure means for the execution.
    ///
    /// The error has already been logged on the context. Returns the slot's
    /// outcome when a fallback recovers it; otherwise returns the error to
    /// propagate (the fallback's own error if the fallback failed too). A
    /// fallback skipped by a business rule leaves the original error standing.
    pub async fn handle(
        &self,
        executor: &StepExecutor,
        step: &Step,
        flow: &Flow,
        ctx: &ExecutionContext,
        err: ConduitError,
    ) -> Result<Value> {
        if let Some(ref fallback_id) = step.fallback {
            let Some(fallback) = flow.step(fallback_id) else {
                error!(step_id = %step.id, fallback = %fallback_id, "Fallback step missing");
                return Err(err);
            };
            info!(step_id = %step.id, fallback = %fallback_id, "Running fallback");
            let Some(output) = executor.run_guarded(fallback, flow, ctx).await? else {
                warn!(step_id = %step.id, fallback = %fallback_id, "Fallback skipped by business rule");
                if step.critical {
                    self.escalate(step, ctx, &err).await;
                }
                return Err(err);
            };

            ctx.set_result(&step.id, output.clone()).await;
            ctx.set_step_state(&step.id, StepState::Recovered).await;
            ctx.resolve_errors(&step.id).await;
            self.event_bus.publish(FlowEvent::StepRecovered {
                execution_id: ctx.execution_id().to_string(),
                step_id: step.id.clone(),
                fallback: fallback_id.clone(),
            });
            return Ok(output);
        }

        if step.critical {
            self.escalate(step, ctx, &err).await;
        }
        Err(err)
    }

    async fn escalate(&self, step: &Step, ctx: &ExecutionContext, err: &ConduitError) {
        warn!(
            execution_id = %ctx.execution_id(),
            step_id = %step.id,
            error = %err,
            "Critical step failed, escalating"
        );
        ctx.escalate().await;

        let item = WorkItem::new(
            &step.id,
            ctx.execution_id(),
            format!("Escalation: {} failed", step.name),
            WorkKind::Escalation {
                error: err.to_string(),
            },
            crate::executor::deadline_after(self.escalation_timeout),
        )
        .with_description(format!(
            "Critical step '{}' in flow {} failed: {}",
            step.name,
            ctx.flow_id(),
            err
        ))
        .with_priority(WorkPriority::Critical)
        .with_data(ctx.data().await);
        self.queue.add_work_item(item).await;

        self.event_bus.publish(FlowEvent::ExecutionEscalated {
            execution_id: ctx.execution_id().to_string(),
            step_id: step.id.clone(),
            error: err.to_string(),
        });

        if let Some(commands) = self
            .hooks
            .as_ref()
            .map(|h| h.on_escalation.clone())
            .filter(|c| !c.is_empty())
        {
            let flow_id = ctx.flow_id().to_string();
            let execution_id = ctx.execution_id().to_string();
            let error = err.to_string();
            tokio::spawn(async move {
                run_hooks(
                    &commands,
                    &HookEnv {
                        flow_id: &flow_id,
                        execution_id: &execution_id,
                        status: "escalated",
                        error: Some(&error),
                    },
                )
                .await;
            });
        }
    }
}
