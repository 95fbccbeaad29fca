use serde_json::json;

use conduit_core::config::AppConfig;
use conduit_core::flow::{Flow, Step, StepKind, Trigger};

pub const LEAD_API_URL: &str = "https://crm.example.com/leads";

/// Config with short human deadlines so expiry paths finish quickly.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.default_step_timeout_secs = 5;
    config.engine.api_retry_delay_ms = 10;
    config.human.approval_timeout_secs = 2;
    config.human.work_item_timeout_secs = 2;
    config.human.assignees = vec!["alice".to_string(), "bob".to_string()];
    config
}

/// `fetch` (api) followed by `score` (ai) depending on it.
pub fn lead_flow() -> Flow {
    Flow::new("lead-qualification", "Lead qualification")
        .with_step(Step::new("fetch", StepKind::api(LEAD_API_URL)).named("Fetch lead"))
        .with_step(
            Step::new("score", StepKind::ai("Score lead {{leadId}}"))
                .named("Score lead")
                .depends_on(["fetch"]),
        )
        .with_trigger(Trigger::Manual)
}

/// `fanout` runs three integrations concurrently; `flaky` always fails.
pub fn fan_out_flow() -> Flow {
    Flow::new("fan-out", "Fan out")
        .with_step(Step::new("fanout", StepKind::parallel(["one", "two", "flaky"])))
        .with_step(Step::new("one", StepKind::automation("echo", json!({ "n": 1 }))))
        .with_step(Step::new("two", StepKind::automation("echo", json!({ "n": 2 }))))
        .with_step(Step::new("flaky", StepKind::automation("broken", json!({}))))
}

/// Flow document used by document-loading tests.
pub const LEAD_FLOW_JSON: &str = r##"{
  "id": "lead-intake",
  "name": "Lead intake",
  "description": "Qualify inbound leads",
  "steps": [
    {
      "id": "fetch",
      "name": "Fetch lead",
      "type": "api",
      "config": { "url": "https://crm.example.com/leads/{{leadId}}", "method": "GET" },
      "timeout": 5000,
      "retries": 2
    },
    {
      "id": "score",
      "name": "Score lead",
      "type": "ai",
      "config": { "prompt": "Score lead {{leadId}}", "inputKeys": ["step_fetch_result"] },
      "dependencies": ["fetch"],
      "aiModel": "lead-scorer"
    },
    {
      "id": "notify",
      "name": "Notify sales",
      "type": "notification",
      "config": { "channel": "slack", "channels": ["#sales"], "template": "Lead {{leadId}} scored" },
      "dependencies": ["score"]
    }
  ],
  "triggers": [
    { "type": "webhook", "config": { "path": "/leads", "method": "POST" } },
    { "type": "manual" }
  ],
  "businessRules": [
    { "condition": "{{leadScore}} >= 80", "steps": ["notify"] }
  ],
  "sla": { "maxDuration": 60000 }
}"##;

/// A temp directory holding the given `(file name, contents)` pairs.
pub fn flow_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    for (name, contents) in files {
        std::fs::write(dir.path().join(name), contents).expect("write flow file");
    }
    dir
}
