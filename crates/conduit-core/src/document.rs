//! Declarative flow documents (JSON or TOML).

use std::path::Path;

use serde_json::Value;

use crate::error::{ConduitError, Result};
use crate::flow::{Flow, StepType};

/// Parse a JSON flow document.
pub fn parse_flow_json(text: &str) -> Result<Flow> {
    let doc: Value = serde_json::from_str(text)?;
    parse_flow_value(doc)
}

/// Parse a TOML flow document (`[[steps]]` tables, same field names).
pub fn parse_flow_toml(text: &str) -> Result<Flow> {
    let doc: Value =
        toml::from_str(text).map_err(|e| ConduitError::Validation(format!("invalid TOML: {}", e)))?;
    parse_flow_value(doc)
}

/// Load a flow document, picking the format from the file extension.
pub fn load_flow(path: &Path) -> Result<Flow> {
    let text = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_flow_toml(&text),
        Some("json") | None => parse_flow_json(&text),
        Some(other) => Err(ConduitError::Validation(format!(
            "unsupported flow document extension: .{}",
            other
        ))),
    }
}

/// Render a flow back to pretty JSON.
pub fn to_json(flow: &Flow) -> Result<String> {
    Ok(serde_json::to_string_pretty(flow)?)
}

/// Decode an already-parsed document.
pub fn parse_flow_value(doc: Value) -> Result<Flow> {
    check_step_types(&doc)?;
    serde_json::from_value(doc).map_err(|e| ConduitError::Validation(e.to_string()))
}

/// Report unknown step types by name before typed decoding hides them
/// behind a generic serde message.
fn check_step_types(doc: &Value) -> Result<()> {
    let Some(steps) = doc.get("steps").and_then(Value::as_array) else {
        return Ok(());
    };
    for step in steps {
        let id = step.get("id").and_then(Value::as_str).unwrap_or("<unnamed>");
        if let Some(step_type) = step.get("type").and_then(Value::as_str) {
            if step_type.parse::<StepType>().is_err() {
                return Err(ConduitError::UnknownStepType {
                    step: id.to_string(),
                    step_type: step_type.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::StepKind;

    const LEAD_FLOW: &str = r#"{
        "id": "lead-intake",
        "name": "Lead intake",
        "steps": [
            { "id": "fetch", "type": "api", "config": { "url": "https://crm.example/leads/{{leadId}}" } },
            { "id": "score", "type": "ai", "config": { "prompt": "Score this lead" }, "dependencies": ["fetch"] }
        ],
        "triggers": [{ "type": "webhook", "config": { "path": "/leads" } }],
        "businessRules": [{ "condition": "{{leadScore}} >= 80", "action": "route", "steps": ["score"] }],
        "sla": { "maxDuration": 60000 },
        "metadata": { "industry": "saas", "complexity": "moderate" }
    }"#;

    #[test]
    fn json_document() {
        let flow = parse_flow_json(LEAD_FLOW).unwrap();
        assert_eq!(flow.id, "lead-intake");
        assert_eq!(flow.version, "1.0.0");
        assert_eq!(flow.steps.len(), 2);
        assert!(matches!(flow.steps[1].kind, StepKind::Ai(_)));
        assert_eq!(flow.business_rules[0].steps, vec!["score".to_string()]);
        assert_eq!(flow.sla.unwrap().max_duration, Some(60_000));
    }

    #[test]
    fn toml_document() {
        let flow = parse_flow_toml(
            r##"
id = "nightly"
name = "Nightly sync"

[[steps]]
id = "pull"
type = "automation"
config = { integration = "erp", parameters = { since = "{{lastRun}}" } }

[[steps]]
id = "announce"
type = "notification"
dependencies = ["pull"]
config = { channel = "slack", channels = ["#ops"], template = "sync done" }

[[triggers]]
type = "schedule"
config = { cron = "0 0 2 * * *" }
"##,
        )
        .unwrap();
        assert_eq!(flow.steps[1].dependencies, vec!["pull".to_string()]);
        assert!(matches!(flow.steps[0].kind, StepKind::Automation(ref c) if c.integration == "erp"));
    }

    #[test]
    fn unknown_type_names_the_step() {
        let err = parse_flow_json(
            r#"{ "id": "f", "name": "f", "steps": [{ "id": "warp", "type": "teleport" }] }"#,
        )
        .unwrap_err();
        match err {
            ConduitError::UnknownStepType { step, step_type } => {
                assert_eq!(step, "warp");
                assert_eq!(step_type, "teleport");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn malformed_step_config_is_validation_error() {
        let err = parse_flow_json(
            r#"{ "id": "f", "name": "f", "steps": [{ "id": "c", "type": "conditional", "config": {} }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConduitError::Validation(ref m) if m.contains("conditional")));
    }
}
