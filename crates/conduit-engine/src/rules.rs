use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use conduit_core::error::Result;
use conduit_core::expr::Condition;
use conduit_core::flow::BusinessRule;

/// Outcome of evaluating the rules guarding one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub skip: bool,
    /// Condition text of the first rule that failed.
    pub reason: Option<String>,
}

impl RuleOutcome {
    fn proceed() -> Self {
        Self {
            skip: false,
            reason: None,
        }
    }
}

struct CompiledRule {
    rule: BusinessRule,
    condition: Condition,
}

/// Per-flow business rules, kept in registration order.
#[derive(Default)]
pub struct RulesEngine {
    rules: RwLock<HashMap<String, Vec<CompiledRule>>>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store a flow's rules, replacing any previous set.
    pub async fn register(&self, flow_id: &str, rules: &[BusinessRule]) -> Result<()> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    condition: Condition::parse(&rule.condition)?,
                    rule: rule.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.rules.write().await.insert(flow_id.to_string(), compiled);
        Ok(())
    }

    pub async fn deregister(&self, flow_id: &str) {
        self.rules.write().await.remove(flow_id);
    }

    /// Whether `step_id` should be skipped for the given execution data.
    ///
    /// Rules are checked in registration order; the first one that guards the
    /// step and evaluates false decides the skip.
    pub async fn evaluate(
        &self,
        flow_id: &str,
        step_id: &str,
        data: &serde_json::Value,
    ) -> RuleOutcome {
        let rules = self.rules.read().await;
        let Some(list) = rules.get(flow_id) else {
            return RuleOutcome::proceed();
        };
        for compiled in list.iter().filter(|c| c.rule.guards(step_id)) {
            if !compiled.condition.evaluate(data) {
                debug!(flow_id, step_id, rule = %compiled.condition, "Business rule failed");
                return RuleOutcome {
                    skip: true,
                    reason: Some(compiled.rule.condition.clone()),
                };
            }
        }
        RuleOutcome::proceed()
    }

    pub async fn rule_count(&self, flow_id: &str) -> usize {
        self.rules.read().await.get(flow_id).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn failing_rule_skips_guarded_step() {
        let engine = RulesEngine::new();
        engine
            .register(
                "leads",
                &[BusinessRule::new("{{leadScore}} >= 80").guarding(["route_to_sales"])],
            )
            .await
            .unwrap();

        let data = json!({ "leadScore": 50 });
        let outcome = engine.evaluate("leads", "route_to_sales", &data).await;
        assert!(outcome.skip);
        assert_eq!(outcome.reason.as_deref(), Some("{{leadScore}} >= 80"));

        assert!(!engine.evaluate("leads", "enrich", &data).await.skip);
        assert!(!engine.evaluate("leads", "route_to_sales", &json!({ "leadScore": 91 })).await.skip);
    }

    #[tokio::test]
    async fn first_failing_rule_wins() {
        let engine = RulesEngine::new();
        engine
            .register(
                "f",
                &[
                    BusinessRule::new("{{a}} == 1"),
                    BusinessRule::new("{{b}} == 1"),
                ],
            )
            .await
            .unwrap();
        let outcome = engine.evaluate("f", "any", &json!({ "a": 0, "b": 0 })).await;
        assert_eq!(outcome.reason.as_deref(), Some("{{a}} == 1"));
    }

    #[tokio::test]
    async fn unknown_flow_and_deregistration() {
        let engine = RulesEngine::new();
        assert!(!engine.evaluate("nope", "s", &json!({})).await.skip);

        engine
            .register("f", &[BusinessRule::new("false")])
            .await
            .unwrap();
        assert_eq!(engine.rule_count("f").await, 1);
        engine.deregister("f").await;
        assert!(!engine.evaluate("f", "s", &json!({})).await.skip);
    }

    #[tokio::test]
    async fn malformed_rule_is_rejected() {
        let engine = RulesEngine::new();
        assert!(engine
            .register("f", &[BusinessRule::new("{{a}} ==")])
            .await
            .is_err());
        assert_eq!(engine.rule_count("f").await, 0);
    }
}
