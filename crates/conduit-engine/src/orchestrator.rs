use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use conduit_core::config::AppConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::event::EventBus;
use conduit_core::flow::{Flow, Step};
use conduit_core::hooks::{run_hooks, HookEnv};
use conduit_core::traits::{HttpClient, Integration, ModelClient, Notifier};
use conduit_core::types::{
    ExecutionId, ExecutionMetrics, ExecutionSnapshot, ExecutionStatus, FlowEvent, StepState,
};
use conduit_core::work::Resolution;

use crate::context::ExecutionContext;
use crate::event_log::EventLogger;
use crate::executor::{ExecutorSettings, StepExecutor};
use crate::failure::FailureHandler;
use crate::graph::build_waves;
use crate::history::ExecutionHistory;
use crate::integrations::IntegrationRegistry;
use crate::queue::HumanWorkQueue;
use crate::rules::RulesEngine;
use crate::triggers::TriggerRegistry;
use crate::validator::validate_flow;

/// Collaborators and settings for building an [`Orchestrator`].
pub struct OrchestratorBuilder {
    pub config: AppConfig,
    pub model: Arc<dyn ModelClient>,
    pub http: Arc<dyn HttpClient>,
    pub notifier: Arc<dyn Notifier>,
    pub integrations: IntegrationRegistry,
    pub event_bus: Option<Arc<EventBus>>,
}

impl OrchestratorBuilder {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn ModelClient>,
        http: Arc<dyn HttpClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            model,
            http,
            notifier,
            integrations: IntegrationRegistry::new(),
            event_bus: None,
        }
    }

    pub fn with_integration(mut self, integration: impl Integration) -> Self {
        self.integrations.register(integration);
        self
    }

    /// Share an existing bus instead of creating one.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let config = self.config;
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(config.engine.event_capacity)));
        let queue = Arc::new(HumanWorkQueue::new(
            event_bus.clone(),
            config.human.assignees.clone(),
        ));
        let integrations = Arc::new(RwLock::new(self.integrations));
        let rules = Arc::new(RulesEngine::new());
        let executor = Arc::new(StepExecutor::new(
            self.model,
            self.http,
            self.notifier.clone(),
            integrations.clone(),
            queue.clone(),
            event_bus.clone(),
            rules.clone(),
            ExecutorSettings::from(&config),
        ));
        let failure = Arc::new(FailureHandler::new(
            queue.clone(),
            event_bus.clone(),
            config.human.work_item_timeout(),
            config.hooks.clone(),
        ));

        Arc::new(Orchestrator {
            flows: RwLock::new(HashMap::new()),
            history: ExecutionHistory::new(config.engine.max_retained_executions),
            rules,
            triggers: TriggerRegistry::new(),
            integrations,
            executor,
            failure,
            queue,
            notifier: self.notifier,
            event_bus,
            config,
        })
    }
}

/// Owns the flow registry and the execution registry, and drives runs wave
/// by wave.
pub struct Orchestrator {
    flows: RwLock<HashMap<String, Arc<Flow>>>,
    history: ExecutionHistory,
    rules: Arc<RulesEngine>,
    triggers: TriggerRegistry,
    integrations: Arc<RwLock<IntegrationRegistry>>,
    executor: Arc<StepExecutor>,
    failure: Arc<FailureHandler>,
    queue: Arc<HumanWorkQueue>,
    notifier: Arc<dyn Notifier>,
    event_bus: Arc<EventBus>,
    config: AppConfig,
}

impl Orchestrator {
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn queue(&self) -> &Arc<HumanWorkQueue> {
        &self.queue
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    pub fn integrations(&self) -> &Arc<RwLock<IntegrationRegistry>> {
        &self.integrations
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Validate and store a flow, wiring its rules and triggers.
    pub async fn register_flow(&self, flow: Flow) -> Result<String> {
        validate_flow(&flow)?;

        let mut flows = self.flows.write().await;
        if flows.contains_key(&flow.id) {
            return Err(ConduitError::FlowAlreadyRegistered(flow.id));
        }
        self.rules.register(&flow.id, &flow.business_rules).await?;
        if let Err(e) = self.triggers.register(&flow).await {
            self.rules.deregister(&flow.id).await;
            return Err(e);
        }

        let flow_id = flow.id.clone();
        info!(
            flow_id = %flow_id,
            steps = flow.steps.len(),
            triggers = flow.triggers.len(),
            rules = flow.business_rules.len(),
            "Flow registered"
        );
        flows.insert(flow_id.clone(), Arc::new(flow));
        drop(flows);

        self.event_bus.publish(FlowEvent::FlowRegistered {
            flow_id: flow_id.clone(),
        });
        Ok(flow_id)
    }

    pub async fn deregister_flow(&self, flow_id: &str) -> Result<()> {
        if self.flows.write().await.remove(flow_id).is_none() {
            return Err(ConduitError::FlowNotFound(flow_id.to_string()));
        }
        self.rules.deregister(flow_id).await;
        self.triggers.deregister(flow_id).await;
        info!(flow_id, "Flow deregistered");
        self.event_bus.publish(FlowEvent::FlowDeregistered {
            flow_id: flow_id.to_string(),
        });
        Ok(())
    }

    pub async fn get_flow(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.read().await.get(flow_id).cloned()
    }

    /// Registered flows sorted by id.
    pub async fn flows(&self) -> Vec<Arc<Flow>> {
        let mut flows: Vec<Arc<Flow>> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        flows
    }

    /// Run a flow to the end and return its final snapshot.
    ///
    /// An unrecovered failure is returned as `ExecutionFailed`; the snapshot
    /// stays available through [`get_execution`](Self::get_execution).
    pub async fn execute(self: &Arc<Self>, flow_id: &str, input: Value) -> Result<ExecutionSnapshot> {
        let (flow, ctx) = self.prepare(flow_id, input).await?;
        self.drive(flow, ctx).await
    }

    /// Start a flow in the background and return its execution id.
    pub async fn start(self: &Arc<Self>, flow_id: &str, input: Value) -> Result<String> {
        let (flow, ctx) = self.prepare(flow_id, input).await?;
        let execution_id = ctx.execution_id().to_string();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.drive(flow, ctx).await {
                debug!(error = %e, "Background execution ended with failure");
            }
        });
        Ok(execution_id)
    }

    /// Start every flow listening on a webhook path.
    pub async fn handle_webhook(self: &Arc<Self>, path: &str, payload: Value) -> Result<Vec<String>> {
        let flow_ids = self.triggers.webhook_flows(path).await;
        if flow_ids.is_empty() {
            return Err(ConduitError::FlowNotFound(format!("no flow for webhook {}", path)));
        }
        let mut started = Vec::with_capacity(flow_ids.len());
        for flow_id in flow_ids {
            started.push(self.start(&flow_id, payload.clone()).await?);
        }
        Ok(started)
    }

    /// Start every flow subscribed to a named event.
    pub async fn publish_event(self: &Arc<Self>, event: &str, payload: Value) -> Result<Vec<String>> {
        let mut started = Vec::new();
        for flow_id in self.triggers.event_flows(event).await {
            started.push(self.start(&flow_id, payload.clone()).await?);
        }
        debug!(event, started = started.len(), "Event dispatched");
        Ok(started)
    }

    /// Resolve a pending work item or approval.
    pub async fn resolve_work_item(&self, item_id: &str, resolution: Resolution) -> bool {
        self.queue.resolve(item_id, resolution).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        match self.history.get(execution_id).await {
            Some(ctx) => Ok(ctx.snapshot().await),
            None => Err(ConduitError::ExecutionNotFound(execution_id.to_string())),
        }
    }

    /// Every retained execution, newest first.
    pub async fn executions(&self) -> Vec<ExecutionSnapshot> {
        self.history.snapshots().await
    }

    pub async fn get_execution_metrics(&self) -> ExecutionMetrics {
        self.history.metrics(self.queue.pending_count().await).await
    }

    async fn prepare(
        &self,
        flow_id: &str,
        input: Value,
    ) -> Result<(Arc<Flow>, Arc<ExecutionContext>)> {
        let flow = self
            .get_flow(flow_id)
            .await
            .ok_or_else(|| ConduitError::FlowNotFound(flow_id.to_string()))?;
        let execution_id = ExecutionId::new();
        let ctx = Arc::new(ExecutionContext::new(
            flow.id.clone(),
            execution_id.to_string(),
            input,
            flow.scheduled_steps().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        ));
        self.history.track(ctx.clone()).await;
        Ok((flow, ctx))
    }

    async fn drive(
        self: &Arc<Self>,
        flow: Arc<Flow>,
        ctx: Arc<ExecutionContext>,
    ) -> Result<ExecutionSnapshot> {
        let execution_id = ctx.execution_id().to_string();
        if let Some(ref log) = self.config.log {
            EventLogger::new(&log.event_log_dir).spawn(&self.event_bus, execution_id.clone());
        }

        info!(flow_id = %flow.id, execution_id = %execution_id, "Execution started");
        self.event_bus.publish(FlowEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            flow_id: flow.id.clone(),
        });
        self.fire_hooks(&ctx, "running", None);

        let started = Instant::now();
        let outcome = self.run_waves(&flow, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(()) => {
                ctx.finish(ExecutionStatus::Completed).await;
                info!(flow_id = %flow.id, execution_id = %execution_id, elapsed_ms, "Execution completed");
                self.check_sla(&flow, &execution_id, elapsed_ms);
                self.event_bus.publish(FlowEvent::ExecutionCompleted {
                    execution_id: execution_id.clone(),
                    flow_id: flow.id.clone(),
                    elapsed_ms,
                });
                self.fire_hooks(&ctx, "completed", None);
                Ok(ctx.snapshot().await)
            }
            Err(e) => {
                let status = ctx.finish(ExecutionStatus::Failed).await;
                error!(
                    flow_id = %flow.id,
                    execution_id = %execution_id,
                    status = %status,
                    error = %e,
                    "Execution failed"
                );
                self.report_failure(&flow, &ctx, status, &e).await;
                Err(ConduitError::ExecutionFailed {
                    execution_id: execution_id.clone(),
                    source: Box::new(e),
                })
            }
        };

        self.history.archive(&execution_id).await;
        result
    }

    /// Plan the flow and run each wave to its barrier. Stops after the first
    /// wave containing an unrecovered failure.
    async fn run_waves(self: &Arc<Self>, flow: &Arc<Flow>, ctx: &Arc<ExecutionContext>) -> Result<()> {
        let waves = build_waves(&flow.scheduled_steps())?;
        debug!(execution_id = %ctx.execution_id(), waves = waves.len(), "Execution planned");

        for (index, wave) in waves.into_iter().enumerate() {
            let step_ids: Vec<String> = wave.iter().map(|s| s.id.clone()).collect();
            info!(execution_id = %ctx.execution_id(), wave = index, steps = ?step_ids, "Wave started");
            self.event_bus.publish(FlowEvent::WaveStarted {
                execution_id: ctx.execution_id().to_string(),
                wave: index,
                steps: step_ids.clone(),
            });

            let handles: Vec<_> = wave
                .into_iter()
                .map(|step| {
                    let this = self.clone();
                    let flow = flow.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move { this.run_slot(&flow, &step, &ctx).await })
                })
                .collect();
            let settled = futures::future::join_all(handles).await;

            let mut first_error = None;
            for (step_id, outcome) in step_ids.iter().zip(settled) {
                let err = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e,
                    Err(join_err) => {
                        let e = ConduitError::step_failed(step_id, format!("step task aborted: {}", join_err));
                        ctx.record_error(step_id, e.to_string()).await;
                        ctx.set_step_state(step_id, StepState::Failed).await;
                        e
                    }
                };
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(())
    }

    /// One step's slot in a wave: rules, execution, then recovery.
    async fn run_slot(&self, flow: &Flow, step: &Step, ctx: &ExecutionContext) -> Result<()> {
        match self.executor.run_guarded(step, flow, ctx).await {
            Ok(_) => Ok(()),
            Err(e) => self
                .failure
                .handle(&self.executor, step, flow, ctx, e)
                .await
                .map(|_| ()),
        }
    }

    fn check_sla(&self, flow: &Flow, execution_id: &str, elapsed_ms: u64) {
        let Some(max_ms) = flow.sla.as_ref().and_then(|s| s.max_duration) else {
            return;
        };
        if elapsed_ms > max_ms {
            warn!(flow_id = %flow.id, execution_id, elapsed_ms, max_ms, "SLA breached");
            self.event_bus.publish(FlowEvent::SlaBreached {
                execution_id: execution_id.to_string(),
                flow_id: flow.id.clone(),
                elapsed_ms,
                max_ms,
            });
        }
    }

    /// Failure events, the failure webhook, and hooks. Never retries.
    async fn report_failure(
        &self,
        flow: &Flow,
        ctx: &ExecutionContext,
        status: ExecutionStatus,
        err: &ConduitError,
    ) {
        let execution_id = ctx.execution_id().to_string();
        let snapshot = ctx.snapshot().await;
        let failed_step = snapshot
            .errors
            .iter()
            .rev()
            .find(|e| !e.resolved)
            .map(|e| e.step_id.clone());

        self.event_bus.publish(FlowEvent::ExecutionFailed {
            execution_id: execution_id.clone(),
            flow_id: flow.id.clone(),
            error: err.to_string(),
        });
        self.event_bus.publish(FlowEvent::FailureAnalysis {
            execution_id: execution_id.clone(),
            flow_id: flow.id.clone(),
            failed_step: failed_step.clone(),
            error_count: snapshot.errors.len(),
        });

        if let Some(ref url) = self.config.notifications.failure_webhook_url {
            let payload = json!({
                "flowId": flow.id,
                "executionId": execution_id,
                "status": status,
                "error": err.to_string(),
                "failedStep": failed_step,
                "errors": snapshot.errors,
            });
            if let Err(e) = self.notifier.send_webhook(url, &payload).await {
                warn!(execution_id = %execution_id, error = %e, "Failure notification not delivered");
            }
        }

        self.fire_hooks(ctx, "failed", Some(err.to_string()));
    }

    fn fire_hooks(&self, ctx: &ExecutionContext, status: &'static str, error: Option<String>) {
        let Some(ref hooks) = self.config.hooks else {
            return;
        };
        let commands = match status {
            "running" => &hooks.on_execution_start,
            "completed" => &hooks.on_execution_complete,
            _ => &hooks.on_execution_failed,
        };
        if commands.is_empty() {
            return;
        }
        let commands = commands.clone();
        let flow_id = ctx.flow_id().to_string();
        let execution_id = ctx.execution_id().to_string();
        tokio::spawn(async move {
            run_hooks(
                &commands,
                &HookEnv {
                    flow_id: &flow_id,
                    execution_id: &execution_id,
                    status,
                    error: error.as_deref(),
                },
            )
            .await;
        });
    }
}
