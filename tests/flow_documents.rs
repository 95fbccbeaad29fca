use std::sync::Arc;

use serde_json::json;

use conduit_core::document::{load_flow, to_json};
use conduit_core::error::ConduitError;
use conduit_core::flow::{StepKind, Trigger};
use conduit_core::types::{ExecutionStatus, StepState};
use conduit_engine::{build_waves, validate_flow, wave_ids, OrchestratorBuilder};
use conduit_test_utils::fixtures::{fast_config, flow_dir, LEAD_FLOW_JSON};
use conduit_test_utils::{MockHttp, MockModel, RecordingNotifier};

const NIGHTLY_TOML: &str = r##"
id = "nightly"
name = "Nightly sync"

[[steps]]
id = "pull"
type = "automation"
config = { integration = "erp", parameters = { since = "{{lastRun}}" } }

[[steps]]
id = "normalize"
type = "data"
dependencies = ["pull"]
config = { operation = "transform", source = "step_pull_result", target = "normalized", function = "identity" }

[[steps]]
id = "announce"
type = "notification"
dependencies = ["normalize"]
config = { channel = "slack", channels = ["#ops"], template = "sync done" }

[[triggers]]
type = "schedule"
config = { cron = "0 0 2 * * *" }
"##;

#[test]
fn json_document_loads_from_disk() {
    let dir = flow_dir(&[("lead.json", LEAD_FLOW_JSON)]);
    let flow = load_flow(&dir.path().join("lead.json")).unwrap();

    assert_eq!(flow.id, "lead-intake");
    assert_eq!(flow.steps.len(), 3);
    assert_eq!(flow.steps[0].timeout_ms, Some(5000));
    assert_eq!(flow.steps[0].retries, 2);
    assert_eq!(flow.steps[1].ai_model.as_deref(), Some("lead-scorer"));
    assert!(matches!(flow.triggers[0], Trigger::Webhook { ref path, .. } if path == "/leads"));
    assert_eq!(flow.business_rules[0].steps, vec!["notify".to_string()]);
    validate_flow(&flow).unwrap();
}

#[test]
fn toml_document_plans_into_waves() {
    let dir = flow_dir(&[("nightly.toml", NIGHTLY_TOML)]);
    let flow = load_flow(&dir.path().join("nightly.toml")).unwrap();
    assert!(matches!(flow.steps[1].kind, StepKind::Data(_)));
    validate_flow(&flow).unwrap();

    let waves = build_waves(&flow.scheduled_steps()).unwrap();
    assert_eq!(
        wave_ids(&waves),
        vec![
            vec!["pull".to_string()],
            vec!["normalize".to_string()],
            vec!["announce".to_string()],
        ]
    );
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = flow_dir(&[("lead.yaml", "id: x")]);
    let err = load_flow(&dir.path().join("lead.yaml")).unwrap_err();
    assert!(matches!(err, ConduitError::Validation(ref m) if m.contains(".yaml")));
}

#[test]
fn missing_document_is_io_error() {
    let dir = flow_dir(&[]);
    let err = load_flow(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConduitError::Io(_)));
}

#[test]
fn dangling_dependency_fails_validation() {
    let doc = r#"{
        "id": "broken",
        "name": "Broken",
        "steps": [
            { "id": "a", "type": "api", "config": { "url": "https://x.example" }, "dependencies": ["ghost"] }
        ]
    }"#;
    let dir = flow_dir(&[("broken.json", doc)]);
    let flow = load_flow(&dir.path().join("broken.json")).unwrap();
    match validate_flow(&flow).unwrap_err() {
        ConduitError::UnknownDependency { step, dependency } => {
            assert_eq!(step, "a");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn exported_document_loads_back() {
    let dir = flow_dir(&[("lead.json", LEAD_FLOW_JSON)]);
    let flow = load_flow(&dir.path().join("lead.json")).unwrap();
    let exported = flow_dir(&[("again.json", to_json(&flow).unwrap().as_str())]);
    let again = load_flow(&exported.path().join("again.json")).unwrap();
    assert_eq!(to_json(&again).unwrap(), to_json(&flow).unwrap());
}

#[tokio::test]
async fn loaded_document_runs_and_honors_its_rule() {
    let notifier = Arc::new(RecordingNotifier::new());
    let http = Arc::new(MockHttp::new());
    let orchestrator = OrchestratorBuilder::new(
        fast_config(),
        Arc::new(MockModel::confident(json!("qualified"), 0.95)),
        http.clone(),
        notifier.clone(),
    )
    .build();
    let dir = flow_dir(&[("lead.json", LEAD_FLOW_JSON)]);
    let flow = load_flow(&dir.path().join("lead.json")).unwrap();
    orchestrator.register_flow(flow).await.unwrap();

    let snapshot = orchestrator
        .execute("lead-intake", json!({ "leadId": "7", "leadScore": 92 }))
        .await
        .unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(http.request_count("https://crm.example.com/leads/7"), 1);
    let sent = notifier.sent_on("slack");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].targets, vec!["#sales"]);
    assert_eq!(sent[0].body, json!("Lead 7 scored"));

    let snapshot = orchestrator
        .execute("lead-intake", json!({ "leadId": "8", "leadScore": 12 }))
        .await
        .unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(snapshot.steps["notify"], StepState::Skipped);
    assert_eq!(notifier.sent_on("slack").len(), 1);
}
