//! Type-dispatching step execution.

mod ai;
mod api;
mod data;
mod human;
mod notify;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use conduit_core::config::AppConfig;
use conduit_core::error::{ConduitError, Result};
use conduit_core::event::EventBus;
use conduit_core::expr::Condition;
use conduit_core::flow::{ConditionalConfig, Flow, ParallelConfig, Step, StepKind};
use conduit_core::template::render_value;
use conduit_core::traits::{HttpClient, ModelClient, Notifier};
use conduit_core::types::{FlowEvent, StepState};

use crate::context::ExecutionContext;
use crate::integrations::IntegrationRegistry;
use crate::queue::HumanWorkQueue;
use crate::rules::RulesEngine;

/// Engine-wide defaults applied by step handlers.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_step_timeout: Duration,
    pub confidence_threshold: f64,
    pub api_retry_delay: Duration,
    pub approval_timeout: Duration,
    pub work_item_timeout: Duration,
    pub default_model: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ExecutorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_step_timeout: config.engine.default_step_timeout(),
            confidence_threshold: config.engine.confidence_threshold,
            api_retry_delay: Duration::from_millis(config.engine.api_retry_delay_ms),
            approval_timeout: config.human.approval_timeout(),
            work_item_timeout: config.human.work_item_timeout(),
            default_model: config.model.default_model.clone(),
        }
    }
}

/// Runs single steps against the collaborators.
pub struct StepExecutor {
    model: Arc<dyn ModelClient>,
    http: Arc<dyn HttpClient>,
    notifier: Arc<dyn Notifier>,
    integrations: Arc<RwLock<IntegrationRegistry>>,
    queue: Arc<HumanWorkQueue>,
    event_bus: Arc<EventBus>,
    rules: Arc<RulesEngine>,
    settings: ExecutorSettings,
}

impl StepExecutor {
    pub fn new(
        model: Arc<dyn ModelClient>,
        http: Arc<dyn HttpClient>,
        notifier: Arc<dyn Notifier>,
        integrations: Arc<RwLock<IntegrationRegistry>>,
        queue: Arc<HumanWorkQueue>,
        event_bus: Arc<EventBus>,
        rules: Arc<RulesEngine>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            model,
            http,
            notifier,
            integrations,
            queue,
            event_bus,
            rules,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Check the flow's business rules, then run the step.
    ///
    /// Returns `None` when a rule skipped the step. Scheduled steps, parallel
    /// members, and fallbacks all pass through here.
    pub async fn run_guarded(
        &self,
        step: &Step,
        flow: &Flow,
        ctx: &ExecutionContext,
    ) -> Result<Option<Value>> {
        let outcome = self
            .rules
            .evaluate(&flow.id, &step.id, &ctx.data().await)
            .await;
        if outcome.skip {
            let reason = outcome.reason.unwrap_or_default();
            info!(step_id = %step.id, reason = %reason, "Step skipped by business rule");
            ctx.set_step_state(&step.id, StepState::Skipped).await;
            self.event_bus.publish(FlowEvent::StepSkipped {
                execution_id: ctx.execution_id().to_string(),
                step_id: step.id.clone(),
                reason,
            });
            return Ok(None);
        }
        self.run_step(step, flow, ctx).await.map(Some)
    }

    /// Run a step and record its outcome in the context.
    ///
    /// On success the output is stored under the step's result key. On
    /// failure the error is appended to the context's error log before it is
    /// returned for recovery.
    pub fn run_step<'a>(
        &'a self,
        step: &'a Step,
        flow: &'a Flow,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let execution_id = ctx.execution_id().to_string();
            ctx.set_current_step(&step.id).await;
            ctx.set_step_state(&step.id, StepState::Running).await;
            self.event_bus.publish(FlowEvent::StepStarted {
                execution_id: execution_id.clone(),
                step_id: step.id.clone(),
            });
            debug!(execution_id = %execution_id, step_id = %step.id, step_type = %step.step_type(), "Step started");

            let started = Instant::now();
            match self.execute_step(step, flow, ctx).await {
                Ok(output) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    ctx.set_result(&step.id, output.clone()).await;
                    ctx.set_step_state(&step.id, StepState::Completed).await;
                    self.event_bus.publish(FlowEvent::StepCompleted {
                        execution_id,
                        step_id: step.id.clone(),
                        elapsed_ms,
                    });
                    info!(step_id = %step.id, elapsed_ms, "Step completed");
                    Ok(output)
                }
                Err(e) => {
                    ctx.record_error(&step.id, e.to_string()).await;
                    ctx.set_step_state(&step.id, StepState::Failed).await;
                    self.event_bus.publish(FlowEvent::StepFailed {
                        execution_id,
                        step_id: step.id.clone(),
                        error: e.to_string(),
                    });
                    warn!(step_id = %step.id, error = %e, "Step failed");
                    Err(e)
                }
            }
        })
    }

    /// Dispatch on the step type, racing the step's deadline.
    ///
    /// Human waits are bounded by their own deadlines instead: `human` steps
    /// by the work-item timeout and `ai` approvals by the approval timeout.
    /// An `ai` step's deadline covers the model call only.
    async fn execute_step(&self, step: &Step, flow: &Flow, ctx: &ExecutionContext) -> Result<Value> {
        let step_timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.default_step_timeout);

        match &step.kind {
            StepKind::Human(cfg) => self.run_human(step, cfg, ctx).await,
            StepKind::Ai(cfg) => self.run_ai(step, cfg, ctx, step_timeout).await,
            StepKind::Parallel(cfg) => match step.timeout_ms {
                Some(_) => self.race(step, step_timeout, self.run_parallel(step, cfg, flow, ctx)).await,
                None => self.run_parallel(step, cfg, flow, ctx).await,
            },
            StepKind::Api(cfg) => self.race(step, step_timeout, self.run_api(step, cfg, ctx)).await,
            StepKind::Conditional(cfg) => {
                self.race(step, step_timeout, self.run_conditional(step, cfg, ctx))
                    .await
            }
            StepKind::Data(cfg) => self.race(step, step_timeout, self.run_data(step, cfg, ctx)).await,
            StepKind::Notification(cfg) => {
                self.race(step, step_timeout, self.run_notification(step, cfg, ctx))
                    .await
            }
            StepKind::Automation(cfg) => {
                let work = async {
                    let data = ctx.data().await;
                    let parameters = render_value(&cfg.parameters, &data);
                    let integration = self
                        .integrations
                        .read()
                        .await
                        .get(&cfg.integration)
                        .ok_or_else(|| ConduitError::UnknownIntegration(cfg.integration.clone()))?;
                    integration.execute(parameters, data).await
                };
                self.race(step, step_timeout, work).await
            }
        }
    }

    async fn race<F>(&self, step: &Step, limit: Duration, work: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>>,
    {
        tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| {
                Err(ConduitError::Timeout {
                    step: step.id.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })
            })
    }

    /// Evaluate the condition and report the branch. Waves are not re-planned.
    async fn run_conditional(
        &self,
        step: &Step,
        cfg: &ConditionalConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let condition = Condition::parse(&cfg.condition)?;
        let result = condition.evaluate(&ctx.data().await);
        let next_step = if result {
            cfg.on_true.clone()
        } else {
            cfg.on_false.clone()
        };
        self.event_bus.publish(FlowEvent::ConditionEvaluated {
            execution_id: ctx.execution_id().to_string(),
            step_id: step.id.clone(),
            result,
            next_step: next_step.clone(),
        });
        Ok(json!({
            "conditionResult": result,
            "executedPath": if result { "true" } else { "false" },
            "nextStep": next_step,
        }))
    }

    /// Run every member concurrently. Member failures are counted, not raised;
    /// members skipped by a business rule are counted separately.
    async fn run_parallel(
        &self,
        step: &Step,
        cfg: &ParallelConfig,
        flow: &Flow,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let runs = cfg.steps.iter().map(|member_id| async move {
            match flow.step(member_id) {
                Some(member) => (member_id, self.run_guarded(member, flow, ctx).await),
                None => {
                    let err = ConduitError::step_failed(
                        &step.id,
                        format!("unknown parallel member {}", member_id),
                    );
                    ctx.record_error(member_id, err.to_string()).await;
                    (member_id, Err(err))
                }
            }
        });
        let outcomes = futures::future::join_all(runs).await;

        let mut success_count = 0usize;
        let mut failure_count = 0usize;
        let mut skipped_count = 0usize;
        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|(member_id, outcome)| match outcome {
                Ok(None) => {
                    skipped_count += 1;
                    json!({ "stepId": member_id, "skipped": true })
                }
                Ok(Some(output)) => {
                    success_count += 1;
                    json!({ "stepId": member_id, "success": true, "result": output })
                }
                Err(e) => {
                    failure_count += 1;
                    json!({ "stepId": member_id, "success": false, "error": e.to_string() })
                }
            })
            .collect();

        debug!(step_id = %step.id, success_count, failure_count, skipped_count, "Parallel fan-out settled");
        Ok(json!({
            "successCount": success_count,
            "failureCount": failure_count,
            "skippedCount": skipped_count,
            "results": results,
        }))
    }

    /// Track a human wait on the context, publishing pause/resume transitions.
    ///
    /// The wait is released even when the future is dropped early, as happens
    /// when an enclosing parallel step hits its deadline.
    async fn with_human_wait<T, F>(&self, ctx: &ExecutionContext, wait: F) -> T
    where
        F: Future<Output = T>,
    {
        if ctx.begin_human_wait() {
            self.event_bus.publish(FlowEvent::ExecutionPaused {
                execution_id: ctx.execution_id().to_string(),
            });
        }
        let _guard = HumanWaitGuard {
            ctx,
            event_bus: &self.event_bus,
        };
        wait.await
    }
}

/// Ends one human wait on drop.
struct HumanWaitGuard<'a> {
    ctx: &'a ExecutionContext,
    event_bus: &'a EventBus,
}

impl Drop for HumanWaitGuard<'_> {
    fn drop(&mut self) {
        if self.ctx.end_human_wait() {
            self.event_bus.publish(FlowEvent::ExecutionResumed {
                execution_id: self.ctx.execution_id().to_string(),
            });
        }
    }
}

pub(crate) fn deadline_after(timeout: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::flow::{AutomationConfig, DataConfig, NotificationConfig};
    use conduit_core::types::ExecutionStatus;
    use conduit_test_utils::{FnIntegration, MockHttp, MockModel, RecordingNotifier};

    fn executor(http: Arc<MockHttp>, integrations: IntegrationRegistry) -> (StepExecutor, Arc<EventBus>) {
        executor_with(http, integrations, Arc::new(RecordingNotifier::new()))
    }

    fn executor_with(
        http: Arc<MockHttp>,
        integrations: IntegrationRegistry,
        notifier: Arc<RecordingNotifier>,
    ) -> (StepExecutor, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let settings = ExecutorSettings {
            api_retry_delay: Duration::from_millis(5),
            ..ExecutorSettings::default()
        };
        let executor = StepExecutor::new(
            Arc::new(MockModel::confident(json!("yes"), 0.9)),
            http,
            notifier,
            Arc::new(RwLock::new(integrations)),
            Arc::new(HumanWorkQueue::new(bus.clone(), vec![])),
            bus.clone(),
            Arc::new(RulesEngine::new()),
            settings,
        );
        (executor, bus)
    }

    fn context(input: Value) -> ExecutionContext {
        ExecutionContext::new("f", "exec-1", input, ["s"])
    }

    #[tokio::test]
    async fn conditional_reports_branch() {
        let (executor, bus) = executor(Arc::new(MockHttp::new()), IntegrationRegistry::new());
        let mut rx = bus.subscribe();
        let step = Step::new(
            "route",
            StepKind::Conditional(ConditionalConfig {
                condition: "{{amount}} > 100".into(),
                on_true: Some("review".into()),
                on_false: Some("approve".into()),
            }),
        );
        let flow = Flow::new("f", "f").with_step(step.clone());
        let ctx = context(json!({ "amount": 40 }));

        let output = executor.run_step(&step, &flow, &ctx).await.unwrap();
        assert_eq!(output["conditionResult"], false);
        assert_eq!(output["nextStep"], "approve");
        assert_eq!(ctx.get("step_route_result").await, Some(output));

        let mut evaluated = false;
        while let Ok(event) = rx.try_recv() {
            if let FlowEvent::ConditionEvaluated { result, .. } = event {
                assert!(!result);
                evaluated = true;
            }
        }
        assert!(evaluated);
    }

    #[tokio::test]
    async fn automation_parameters_are_rendered() {
        let mut integrations = IntegrationRegistry::new();
        integrations.register(FnIntegration::echo("crm"));
        let (executor, _) = executor(Arc::new(MockHttp::new()), integrations);
        let step = Step::new(
            "sync",
            StepKind::Automation(AutomationConfig {
                integration: "crm".into(),
                parameters: json!({ "account": "{{customer.id}}", "tags": "{{tags}}" }),
            }),
        );
        let flow = Flow::new("f", "f").with_step(step.clone());
        let ctx = context(json!({ "customer": { "id": "c-9" }, "tags": ["vip"] }));

        let output = executor.run_step(&step, &flow, &ctx).await.unwrap();
        assert_eq!(output, json!({ "account": "c-9", "tags": ["vip"] }));
    }

    #[tokio::test]
    async fn api_failure_is_recorded_after_retries() {
        let http = Arc::new(MockHttp::new().respond("https://x.example/a", 503, json!({})));
        let (executor, _) = executor(http.clone(), IntegrationRegistry::new());
        let step = Step::new("s", StepKind::api("https://x.example/a")).with_retries(1);
        let flow = Flow::new("f", "f").with_step(step.clone());
        let ctx = context(Value::Null);

        let err = executor.run_step(&step, &flow, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 503"));
        assert_eq!(http.request_count("https://x.example/a"), 2);
        assert_eq!(ctx.step_state("s").await, Some(StepState::Failed));

        let snapshot = ctx.snapshot().await;
        assert_eq!(snapshot.errors.len(), 1);
        assert!(!snapshot.errors[0].resolved);
        assert_eq!(snapshot.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn unknown_integration_fails_the_step() {
        let (executor, _) = executor(Arc::new(MockHttp::new()), IntegrationRegistry::new());
        let step = Step::new("s", StepKind::automation("nowhere", json!({})));
        let flow = Flow::new("f", "f").with_step(step.clone());

        let err = executor
            .run_step(&step, &flow, &context(Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::UnknownIntegration(ref n) if n == "nowhere"));
    }

    fn data_step(cfg: DataConfig) -> (Step, Flow) {
        let step = Step::new("s", StepKind::Data(cfg));
        let flow = Flow::new("f", "f").with_step(step.clone());
        (step, flow)
    }

    #[tokio::test]
    async fn validate_reports_missing_keys_and_failed_conditions() {
        let (executor, _) = executor(Arc::new(MockHttp::new()), IntegrationRegistry::new());
        let (step, flow) = data_step(DataConfig::Validate {
            required: vec!["email".into(), "customer.id".into()],
            conditions: vec!["{{amount}} > 0".into()],
        });

        let ctx = context(json!({ "email": "a@b.example", "customer": { "id": null }, "amount": -5 }));
        let err = executor.run_step(&step, &flow, &ctx).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("customer.id"));
        assert!(message.contains("{{amount}} > 0"));
        assert!(!message.contains("\"email\""));
        assert_eq!(ctx.step_state("s").await, Some(StepState::Failed));

        let ctx = context(json!({ "email": "a@b.example", "customer": { "id": "c-1" }, "amount": 3 }));
        let output = executor.run_step(&step, &flow, &ctx).await.unwrap();
        assert_eq!(output, json!({ "operation": "validate", "valid": true }));
    }

    #[tokio::test]
    async fn store_renders_and_sets_the_key() {
        let (executor, _) = executor(Arc::new(MockHttp::new()), IntegrationRegistry::new());
        let (step, flow) = data_step(DataConfig::Store {
            key: "greeting".into(),
            value: json!({ "text": "Hello {{name}}", "tags": "{{tags}}" }),
        });
        let ctx = context(json!({ "name": "Ada", "tags": ["vip"] }));

        let output = executor.run_step(&step, &flow, &ctx).await.unwrap();
        let stored = json!({ "text": "Hello Ada", "tags": ["vip"] });
        assert_eq!(output["key"], "greeting");
        assert_eq!(output["value"], stored);
        assert_eq!(ctx.get("greeting").await, Some(stored));
    }

    #[tokio::test]
    async fn retrieve_fills_missing_keys_with_null() {
        let (executor, _) = executor(Arc::new(MockHttp::new()), IntegrationRegistry::new());
        let (step, flow) = data_step(DataConfig::Retrieve {
            keys: vec!["region".into(), "customer.tier".into(), "absent".into()],
        });
        let ctx = context(json!({ "region": "eu", "customer": { "tier": "gold" } }));

        let output = executor.run_step(&step, &flow, &ctx).await.unwrap();
        assert_eq!(
            output["values"],
            json!({ "region": "eu", "customer.tier": "gold", "absent": null })
        );
    }

    #[tokio::test]
    async fn email_notification_renders_subject_and_body() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (executor, _) = executor_with(
            Arc::new(MockHttp::new()),
            IntegrationRegistry::new(),
            notifier.clone(),
        );
        let step = Step::new(
            "mail",
            StepKind::Notification(NotificationConfig::Email {
                recipients: vec!["ops@example.com".into()],
                subject: "Order {{orderId}}".into(),
                template: "Order {{orderId}} shipped to {{city}}".into(),
            }),
        );
        let flow = Flow::new("f", "f").with_step(step.clone());
        let ctx = context(json!({ "orderId": 81, "city": "Lyon" }));

        executor.run_step(&step, &flow, &ctx).await.unwrap();
        let sent = notifier.sent_on("email");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].targets, vec!["ops@example.com"]);
        assert_eq!(
            sent[0].body,
            json!({ "subject": "Order 81", "body": "Order 81 shipped to Lyon" })
        );
        assert!(ctx.get("step_mail_result").await.is_some());
        assert!(notifier.sent_on("slack").is_empty());
    }
}
