use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConduitError;
use crate::work::WorkPriority;

/// A registered automation definition.
///
/// Flows are immutable once registered with the orchestrator; the step list
/// order is the declaration order and carries no scheduling meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
    #[serde(default)]
    pub sla: Option<Sla>,
    #[serde(default)]
    pub metadata: FlowMetadata,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Flow {
    /// Create an empty flow.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            steps: vec![],
            triggers: vec![],
            business_rules: vec![],
            sla: None,
            metadata: FlowMetadata::default(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_rule(mut self, rule: BusinessRule) -> Self {
        self.business_rules.push(rule);
        self
    }

    pub fn with_sla(mut self, sla: Sla) -> Self {
        self.sla = Some(sla);
        self
    }

    /// Get a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> HashSet<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Steps that only run on behalf of another step, mapped to their owners.
    ///
    /// A step is auxiliary when it is the `fallback` of some step or a member
    /// of a `parallel` step's fan-out.
    pub fn auxiliary_owners(&self) -> BTreeMap<String, Vec<String>> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for step in &self.steps {
            if let Some(ref fallback) = step.fallback {
                owners
                    .entry(fallback.clone())
                    .or_default()
                    .push(step.id.clone());
            }
            if let StepKind::Parallel(ref cfg) = step.kind {
                for member in &cfg.steps {
                    owners.entry(member.clone()).or_default().push(step.id.clone());
                }
            }
        }
        owners
    }

    /// The steps the orchestrator plans into waves.
    ///
    /// Auxiliary steps are removed and any dependency on one is redirected to
    /// the step(s) owning it, so dependents still wait for the work to happen.
    pub fn scheduled_steps(&self) -> Vec<Step> {
        let owners = self.auxiliary_owners();
        self.steps
            .iter()
            .filter(|s| !owners.contains_key(&s.id))
            .map(|s| {
                let mut step = s.clone();
                let mut deps: Vec<String> = Vec::with_capacity(step.dependencies.len());
                for dep in &s.dependencies {
                    let targets = redirect(dep, &owners, &mut HashSet::new());
                    for target in targets {
                        if target != step.id && !deps.contains(&target) {
                            deps.push(target);
                        }
                    }
                }
                step.dependencies = deps;
                step
            })
            .collect()
    }
}

/// Resolve a dependency on an auxiliary step to its non-auxiliary owners.
fn redirect(
    id: &str,
    owners: &BTreeMap<String, Vec<String>>,
    seen: &mut HashSet<String>,
) -> Vec<String> {
    match owners.get(id) {
        None => vec![id.to_string()],
        Some(list) => {
            if !seen.insert(id.to_string()) {
                return vec![];
            }
            list.iter()
                .flat_map(|owner| redirect(owner, owners, seen))
                .collect()
        }
    }
}

/// Discriminant of a step's execution mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Api,
    Ai,
    Human,
    Conditional,
    Parallel,
    Data,
    Notification,
    Automation,
}

impl StepType {
    pub const ALL: [StepType; 8] = [
        Self::Api,
        Self::Ai,
        Self::Human,
        Self::Conditional,
        Self::Parallel,
        Self::Data,
        Self::Notification,
        Self::Automation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Ai => "ai",
            Self::Human => "human",
            Self::Conditional => "conditional",
            Self::Parallel => "parallel",
            Self::Data => "data",
            Self::Notification => "notification",
            Self::Automation => "automation",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown step type: {}", s))
    }
}

/// A node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StepDocument", into = "StepDocument")]
pub struct Step {
    pub id: String,
    pub name: String,
    pub kind: StepKind,
    /// Step ids that must be processed first.
    pub dependencies: Vec<String>,
    /// Per-step deadline in milliseconds; the engine default applies if unset.
    pub timeout_ms: Option<u64>,
    /// Retry budget for `api` steps.
    pub retries: u32,
    /// Step to run in place of this one when it fails.
    pub fallback: Option<String>,
    pub ai_model: Option<String>,
    /// Force human sign-off on `ai` decisions regardless of confidence.
    pub human_approval: bool,
    /// Escalate the whole execution when this step fails without a fallback.
    pub critical: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            dependencies: vec![],
            timeout_ms: None,
            retries: 0,
            fallback: None,
            ai_model: None,
            human_approval: false,
            critical: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_ai_model(mut self, model: impl Into<String>) -> Self {
        self.ai_model = Some(model.into());
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.human_approval = true;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }

    /// Data key this step's successful output is stored under.
    pub fn result_key(&self) -> String {
        result_key(&self.id)
    }
}

/// `step_<id>_result`
pub fn result_key(step_id: &str) -> String {
    format!("step_{}_result", step_id)
}

/// Wire shape of a step: `type` discriminant plus a free-form `config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDocument {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    step_type: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default)]
    retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ai_model: Option<String>,
    #[serde(default)]
    human_approval: bool,
    #[serde(default)]
    critical: bool,
}

impl TryFrom<StepDocument> for Step {
    type Error = ConduitError;

    fn try_from(doc: StepDocument) -> Result<Self, Self::Error> {
        // `critical` may also be written inside the type-specific config.
        let critical = doc.critical
            || doc
                .config
                .get("critical")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
        let kind = StepKind::from_parts(&doc.id, &doc.step_type, doc.config)?;
        let name = if doc.name.is_empty() {
            doc.id.clone()
        } else {
            doc.name
        };
        Ok(Self {
            id: doc.id,
            name,
            kind,
            dependencies: doc.dependencies,
            timeout_ms: doc.timeout_ms,
            retries: doc.retries,
            fallback: doc.fallback,
            ai_model: doc.ai_model,
            human_approval: doc.human_approval,
            critical,
        })
    }
}

impl From<Step> for StepDocument {
    fn from(step: Step) -> Self {
        let (step_type, config) = step.kind.to_parts();
        Self {
            id: step.id,
            name: step.name,
            step_type: step_type.as_str().to_string(),
            config,
            dependencies: step.dependencies,
            timeout_ms: step.timeout_ms,
            retries: step.retries,
            fallback: step.fallback,
            ai_model: step.ai_model,
            human_approval: step.human_approval,
            critical: step.critical,
        }
    }
}

/// Type-specific step payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Api(ApiConfig),
    Ai(AiConfig),
    Human(HumanConfig),
    Conditional(ConditionalConfig),
    Parallel(ParallelConfig),
    Data(DataConfig),
    Notification(NotificationConfig),
    Automation(AutomationConfig),
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            Self::Api(_) => StepType::Api,
            Self::Ai(_) => StepType::Ai,
            Self::Human(_) => StepType::Human,
            Self::Conditional(_) => StepType::Conditional,
            Self::Parallel(_) => StepType::Parallel,
            Self::Data(_) => StepType::Data,
            Self::Notification(_) => StepType::Notification,
            Self::Automation(_) => StepType::Automation,
        }
    }

    /// Decode a `type` + `config` pair. A null config is read as `{}`.
    pub fn from_parts(
        step_id: &str,
        step_type: &str,
        config: serde_json::Value,
    ) -> Result<Self, ConduitError> {
        let step_type: StepType = step_type.parse().map_err(|_| ConduitError::UnknownStepType {
            step: step_id.to_string(),
            step_type: step_type.to_string(),
        })?;
        let config = if config.is_null() {
            serde_json::json!({})
        } else {
            config
        };
        let invalid = |e: serde_json::Error| {
            ConduitError::Validation(format!(
                "step {}: invalid {} config: {}",
                step_id, step_type, e
            ))
        };
        Ok(match step_type {
            StepType::Api => Self::Api(serde_json::from_value(config).map_err(invalid)?),
            StepType::Ai => Self::Ai(serde_json::from_value(config).map_err(invalid)?),
            StepType::Human => Self::Human(serde_json::from_value(config).map_err(invalid)?),
            StepType::Conditional => {
                Self::Conditional(serde_json::from_value(config).map_err(invalid)?)
            }
            StepType::Parallel => Self::Parallel(serde_json::from_value(config).map_err(invalid)?),
            StepType::Data => Self::Data(serde_json::from_value(config).map_err(invalid)?),
            StepType::Notification => {
                Self::Notification(serde_json::from_value(config).map_err(invalid)?)
            }
            StepType::Automation => {
                Self::Automation(serde_json::from_value(config).map_err(invalid)?)
            }
        })
    }

    pub fn to_parts(&self) -> (StepType, serde_json::Value) {
        let config = match self {
            Self::Api(c) => serde_json::to_value(c),
            Self::Ai(c) => serde_json::to_value(c),
            Self::Human(c) => serde_json::to_value(c),
            Self::Conditional(c) => serde_json::to_value(c),
            Self::Parallel(c) => serde_json::to_value(c),
            Self::Data(c) => serde_json::to_value(c),
            Self::Notification(c) => serde_json::to_value(c),
            Self::Automation(c) => serde_json::to_value(c),
        };
        (self.step_type(), config.unwrap_or(serde_json::Value::Null))
    }

    /// GET request with no body.
    pub fn api(url: impl Into<String>) -> Self {
        Self::Api(ApiConfig {
            url: url.into(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
            retry_delay_ms: None,
        })
    }

    pub fn ai(prompt: impl Into<String>) -> Self {
        Self::Ai(AiConfig {
            prompt: prompt.into(),
            input_keys: vec![],
        })
    }

    pub fn human(title: impl Into<String>) -> Self {
        Self::Human(HumanConfig {
            title: Some(title.into()),
            ..HumanConfig::default()
        })
    }

    pub fn conditional(condition: impl Into<String>) -> Self {
        Self::Conditional(ConditionalConfig {
            condition: condition.into(),
            on_true: None,
            on_false: None,
        })
    }

    pub fn parallel<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Parallel(ParallelConfig {
            steps: members.into_iter().map(Into::into).collect(),
        })
    }

    pub fn automation(integration: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self::Automation(AutomationConfig {
            integration: integration.into(),
            parameters,
        })
    }
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// URL template; `{{key}}` placeholders are filled from execution data.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Fixed delay between retries; the engine default applies if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    #[serde(default)]
    pub prompt: String,
    /// Data keys rendered into the prompt as context.
    #[serde(default)]
    pub input_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: WorkPriority,
    #[serde(default)]
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalConfig {
    pub condition: String,
    #[serde(default)]
    pub on_true: Option<String>,
    #[serde(default)]
    pub on_false: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Sibling step ids executed concurrently.
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum DataConfig {
    Transform {
        source: String,
        target: String,
        #[serde(default)]
        function: TransformFn,
    },
    Validate {
        #[serde(default)]
        required: Vec<String>,
        #[serde(default)]
        conditions: Vec<String>,
    },
    Store {
        key: String,
        value: serde_json::Value,
    },
    Retrieve {
        keys: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformFn {
    #[default]
    Identity,
    Uppercase,
    Lowercase,
    Trim,
    ToNumber,
    ToString,
    Length,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum NotificationConfig {
    Email {
        recipients: Vec<String>,
        #[serde(default)]
        subject: String,
        template: String,
    },
    Slack {
        channels: Vec<String>,
        template: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Name of the integration in the registry.
    pub integration: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// How a flow gets started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum Trigger {
    Webhook {
        path: String,
        #[serde(default = "default_webhook_method")]
        method: String,
    },
    Schedule {
        /// Cron expression with a leading seconds field.
        cron: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    Event {
        event: String,
    },
    Manual,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

/// A declarative skip-condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRule {
    #[serde(default)]
    pub id: Option<String>,
    /// Expression that must hold for guarded steps to run.
    pub condition: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub priority: i32,
    /// Guarded step ids; empty guards every step.
    #[serde(default)]
    pub steps: Vec<String>,
}

impl BusinessRule {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            id: None,
            condition: condition.into(),
            action: String::new(),
            priority: 0,
            steps: vec![],
        }
    }

    pub fn guarding<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn guards(&self, step_id: &str) -> bool {
        self.steps.is_empty() || self.steps.iter().any(|s| s == step_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sla {
    /// Milliseconds.
    #[serde(default)]
    pub max_duration: Option<u64>,
    #[serde(default)]
    pub escalation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetadata {
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub use_case: Option<String>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_from_document() {
        let step: Step = serde_json::from_value(json!({
            "id": "fetch",
            "type": "api",
            "config": { "url": "https://crm.example/leads/{{leadId}}" },
            "dependencies": [],
            "timeout": 5000,
            "retries": 2,
            "fallback": "fetch_cached",
            "critical": true
        }))
        .unwrap();

        assert_eq!(step.name, "fetch");
        assert_eq!(step.timeout_ms, Some(5000));
        assert_eq!(step.retries, 2);
        assert!(step.critical);
        match step.kind {
            StepKind::Api(ref cfg) => {
                assert_eq!(cfg.method, "GET");
                assert!(cfg.url.contains("{{leadId}}"));
            }
            _ => panic!("expected api step"),
        }
    }

    #[test]
    fn critical_inside_config_is_honored() {
        let step: Step = serde_json::from_value(json!({
            "id": "charge",
            "type": "automation",
            "config": { "integration": "billing", "critical": true }
        }))
        .unwrap();
        assert!(step.critical);
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let err = serde_json::from_value::<Step>(json!({
            "id": "x",
            "type": "teleport",
            "config": {}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn missing_config_defaults_where_possible() {
        let step: Step = serde_json::from_value(json!({
            "id": "review",
            "type": "human"
        }))
        .unwrap();
        assert!(matches!(step.kind, StepKind::Human(ref c) if c.priority == WorkPriority::Normal));

        let err = serde_json::from_value::<Step>(json!({ "id": "call", "type": "api" }))
            .unwrap_err();
        assert!(err.to_string().contains("invalid api config"));
    }

    #[test]
    fn data_and_notification_configs() {
        let step: Step = serde_json::from_value(json!({
            "id": "norm",
            "type": "data",
            "config": { "operation": "transform", "source": "email", "target": "email_lc", "function": "lowercase" }
        }))
        .unwrap();
        assert_eq!(
            step.kind,
            StepKind::Data(DataConfig::Transform {
                source: "email".into(),
                target: "email_lc".into(),
                function: TransformFn::Lowercase,
            })
        );

        let step: Step = serde_json::from_value(json!({
            "id": "ping",
            "type": "notification",
            "config": { "channel": "slack", "channels": ["#sales"], "template": "New lead {{name}}" }
        }))
        .unwrap();
        assert!(matches!(step.kind, StepKind::Notification(NotificationConfig::Slack { .. })));
    }

    #[test]
    fn trigger_documents() {
        let triggers: Vec<Trigger> = serde_json::from_value(json!([
            { "type": "webhook", "config": { "path": "/leads" } },
            { "type": "schedule", "config": { "cron": "0 0 9 * * *" } },
            { "type": "event", "config": { "event": "lead.created" } },
            { "type": "manual" }
        ]))
        .unwrap();
        assert_eq!(
            triggers[0],
            Trigger::Webhook {
                path: "/leads".into(),
                method: "POST".into()
            }
        );
        assert_eq!(triggers[3], Trigger::Manual);
    }

    #[test]
    fn scheduled_steps_exclude_auxiliaries() {
        let flow = Flow::new("f", "F")
            .with_step(Step::new("a", StepKind::api("https://a")).with_fallback("a_backup"))
            .with_step(Step::new("a_backup", StepKind::api("https://b")))
            .with_step(Step::new("fan", StepKind::parallel(["p1", "p2"])))
            .with_step(Step::new("p1", StepKind::api("https://p1")))
            .with_step(Step::new("p2", StepKind::api("https://p2")))
            .with_step(Step::new("z", StepKind::ai("sum up")).depends_on(["a_backup", "p2"]));

        let scheduled = flow.scheduled_steps();
        let ids: Vec<&str> = scheduled.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "fan", "z"]);

        let z = scheduled.iter().find(|s| s.id == "z").unwrap();
        assert_eq!(z.dependencies, vec!["a".to_string(), "fan".to_string()]);
    }

    #[test]
    fn rule_guards() {
        let all = BusinessRule::new("{{x}} > 1");
        assert!(all.guards("anything"));
        let some = BusinessRule::new("{{x}} > 1").guarding(["qualify"]);
        assert!(some.guards("qualify"));
        assert!(!some.guards("notify"));
    }

    #[test]
    fn step_roundtrips_through_document_shape() {
        let step = Step::new("b", StepKind::ai("Score {{name}}"))
            .depends_on(["a"])
            .with_ai_model("scorer-v2");
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "ai");
        assert_eq!(value["aiModel"], "scorer-v2");
        assert_eq!(value["config"]["prompt"], "Score {{name}}");
    }
}
