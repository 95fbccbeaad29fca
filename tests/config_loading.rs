use std::io::Write;

use conduit_core::config::AppConfig;
use conduit_core::error::ConduitError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
default_step_timeout_secs = 10
confidence_threshold = 0.8
api_retry_delay_ms = 250
max_retained_executions = 50
event_capacity = 512

[human]
approval_timeout_secs = 600
work_item_timeout_secs = 7200
assignees = ["alice", "bob"]

[model]
endpoint = "http://localhost:9000/infer"
api_key = "sk-test-key"
default_model = "lead-scorer"

[model.retry]
max_retries = 2
initial_backoff_ms = 100
max_backoff_ms = 1000

[http]
timeout_secs = 15

[notifications]
slack_webhook_url = "https://hooks.slack.example/T000"
failure_webhook_url = "https://alerts.example.com/conduit"

[gateway]
bind = "0.0.0.0:9999"
token = "test-token"

[hooks]
on_execution_failed = ["echo failed"]
on_escalation = ["echo escalated"]

[log]
event_log_dir = "/tmp/conduit-events"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.default_step_timeout_secs, 10);
    assert!((config.engine.confidence_threshold - 0.8).abs() < f64::EPSILON);
    assert_eq!(config.engine.api_retry_delay_ms, 250);
    assert_eq!(config.engine.max_retained_executions, 50);
    assert_eq!(config.human.approval_timeout().as_secs(), 600);
    assert_eq!(config.human.assignees, vec!["alice", "bob"]);
    assert_eq!(config.model.endpoint.as_deref(), Some("http://localhost:9000/infer"));
    assert_eq!(config.model.default_model, "lead-scorer");
    assert_eq!(config.model.retry.as_ref().unwrap().max_retries, 2);
    assert_eq!(config.http.timeout_secs, 15);
    assert!(config.http.user_agent.starts_with("conduit/"));
    assert!(config.notifications.email_relay_url.is_none());
    assert_eq!(
        config.notifications.failure_webhook_url.as_deref(),
        Some("https://alerts.example.com/conduit")
    );
    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert_eq!(config.gateway.token.as_deref(), Some("test-token"));

    let hooks = config.hooks.expect("hooks section");
    assert!(hooks.on_execution_start.is_empty());
    assert_eq!(hooks.on_escalation, vec!["echo escalated"]);
    assert!(!hooks.is_empty());

    assert_eq!(config.log.unwrap().event_log_dir, "/tmp/conduit-events");
}

#[test]
fn test_env_vars_expand_in_file() {
    std::env::set_var("CONDUIT_TEST_GATEWAY_TOKEN", "from-env");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[gateway]\ntoken = \"${CONDUIT_TEST_GATEWAY_TOKEN}\"\n")
        .expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.gateway.token.as_deref(), Some("from-env"));
    std::env::remove_var("CONDUIT_TEST_GATEWAY_TOKEN");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/conduit.toml")).unwrap_err();
    assert!(matches!(err, ConduitError::ConfigNotFound(_)));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::default();
    let text = toml::to_string_pretty(&config).expect("serialize config");
    let reparsed = AppConfig::from_toml(&text).expect("reparse config");
    assert_eq!(reparsed.engine.max_retained_executions, 1000);
    assert_eq!(reparsed.gateway.bind, config.gateway.bind);
}
