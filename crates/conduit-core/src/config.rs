use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConduitError, Result};

/// Top-level conduit configuration. Every section has defaults, so an empty
/// file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub human: HumanConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hooks: Option<HooksConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for steps without their own `timeout`.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    /// AI decisions below this confidence need human approval.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Fixed delay between `api` retries.
    #[serde(default = "default_api_retry_delay_ms")]
    pub api_retry_delay_ms: u64,
    /// Finished executions kept in memory; oldest are dropped first.
    #[serde(default = "default_max_retained_executions")]
    pub max_retained_executions: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            confidence_threshold: default_confidence_threshold(),
            api_retry_delay_ms: default_api_retry_delay_ms(),
            max_retained_executions: default_max_retained_executions(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_secs(self.default_step_timeout_secs)
    }
}

fn default_step_timeout_secs() -> u64 { 30 }
fn default_confidence_threshold() -> f64 { 0.7 }
fn default_api_retry_delay_ms() -> u64 { 1000 }
fn default_max_retained_executions() -> usize { 1000 }
fn default_event_capacity() -> usize { 256 }

/// Human work queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanConfig {
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Deadline for `human` step work items without a step timeout.
    #[serde(default = "default_work_item_timeout_secs")]
    pub work_item_timeout_secs: u64,
    /// Round-robin assignment targets.
    #[serde(default = "default_assignees")]
    pub assignees: Vec<String>,
}

impl Default for HumanConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: default_approval_timeout_secs(),
            work_item_timeout_secs: default_work_item_timeout_secs(),
            assignees: default_assignees(),
        }
    }
}

impl HumanConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn work_item_timeout(&self) -> Duration {
        Duration::from_secs(self.work_item_timeout_secs)
    }
}

fn default_approval_timeout_secs() -> u64 { 3600 }
fn default_work_item_timeout_secs() -> u64 { 86_400 }
fn default_assignees() -> Vec<String> { vec!["operations".to_string()] }

/// Model inference endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// POST target for inference requests. Unset disables `ai` steps.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Used when a step has no `aiModel`.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_model() -> String { "default".to_string() }

/// Retry configuration for model requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30_000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout_secs() -> u64 { 30 }
fn default_user_agent() -> String { format!("conduit/{}", env!("CARGO_PKG_VERSION")) }

/// Notification channel endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// HTTP relay that accepts `{to, subject, body}` and sends mail.
    #[serde(default)]
    pub email_relay_url: Option<String>,
    /// Slack incoming webhook.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// Receives a JSON summary whenever an execution fails.
    #[serde(default)]
    pub failure_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every request when set.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8787".to_string() }

/// Shell commands run on execution lifecycle events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_execution_start: Vec<String>,
    #[serde(default)]
    pub on_execution_complete: Vec<String>,
    #[serde(default)]
    pub on_execution_failed: Vec<String>,
    #[serde(default)]
    pub on_escalation: Vec<String>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.on_execution_start.is_empty()
            && self.on_execution_complete.is_empty()
            && self.on_execution_failed.is_empty()
            && self.on_escalation.is_empty()
    }
}

/// JSONL event logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// One `<execution_id>.jsonl` file per run is written here.
    pub event_log_dir: String,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConduitError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| ConduitError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables are left as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CONDUIT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CONDUIT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CONDUIT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CONDUIT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CONDUIT_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.engine.default_step_timeout_secs, 30);
        assert!((config.engine.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.engine.max_retained_executions, 1000);
        assert_eq!(config.human.assignees, vec!["operations".to_string()]);
        assert_eq!(config.gateway.bind, "127.0.0.1:8787");
        assert!(config.model.endpoint.is_none());
        assert!(config.hooks.is_none());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config = AppConfig::from_toml(
            r#"
[engine]
confidence_threshold = 0.85

[model.retry]
max_retries = 5
"#,
        )
        .unwrap();
        assert!((config.engine.confidence_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.engine.api_retry_delay_ms, 1000);
        let retry = config.model.retry.unwrap();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.max_backoff_ms, 30_000);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = AppConfig::from_toml("[engine\nfoo = ").unwrap_err();
        assert!(matches!(err, ConduitError::Config(_)));
    }
}
