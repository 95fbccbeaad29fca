use serde_json::{json, Value};

use conduit_core::error::{ConduitError, Result};
use conduit_core::expr::Condition;
use conduit_core::flow::{DataConfig, Step, TransformFn};
use conduit_core::template::{display_value, lookup, render_value};

use super::StepExecutor;
use crate::context::ExecutionContext;

impl StepExecutor {
    pub(super) async fn run_data(
        &self,
        step: &Step,
        cfg: &DataConfig,
        ctx: &ExecutionContext,
    ) -> Result<Value> {
        let data = ctx.data().await;
        match cfg {
            DataConfig::Transform {
                source,
                target,
                function,
            } => {
                let input = lookup(&data, source).ok_or_else(|| {
                    ConduitError::step_failed(&step.id, format!("source key '{}' not found", source))
                })?;
                let value = apply(*function, input)
                    .map_err(|message| ConduitError::step_failed(&step.id, message))?;
                ctx.set(target.clone(), value.clone()).await;
                Ok(json!({ "operation": "transform", "target": target, "value": value }))
            }
            DataConfig::Validate {
                required,
                conditions,
            } => {
                let missing: Vec<&String> = required
                    .iter()
                    .filter(|key| lookup(&data, key).map_or(true, Value::is_null))
                    .collect();
                let mut failed = Vec::new();
                for source in conditions {
                    if !Condition::parse(source)?.evaluate(&data) {
                        failed.push(source);
                    }
                }
                if !missing.is_empty() || !failed.is_empty() {
                    return Err(ConduitError::step_failed(
                        &step.id,
                        format!(
                            "validation failed: missing {:?}, failed conditions {:?}",
                            missing, failed
                        ),
                    ));
                }
                Ok(json!({ "operation": "validate", "valid": true }))
            }
            DataConfig::Store { key, value } => {
                let value = render_value(value, &data);
                ctx.set(key.clone(), value.clone()).await;
                Ok(json!({ "operation": "store", "key": key, "value": value }))
            }
            DataConfig::Retrieve { keys } => {
                let values: serde_json::Map<String, Value> = keys
                    .iter()
                    .map(|k| (k.clone(), lookup(&data, k).cloned().unwrap_or(Value::Null)))
                    .collect();
                Ok(json!({ "operation": "retrieve", "values": values }))
            }
        }
    }
}

fn apply(function: TransformFn, input: &Value) -> std::result::Result<Value, String> {
    Ok(match function {
        TransformFn::Identity => input.clone(),
        TransformFn::Uppercase => Value::String(display_value(input).to_uppercase()),
        TransformFn::Lowercase => Value::String(display_value(input).to_lowercase()),
        TransformFn::Trim => Value::String(display_value(input).trim().to_string()),
        TransformFn::ToString => Value::String(display_value(input)),
        TransformFn::ToNumber => match input {
            Value::Number(_) => input.clone(),
            other => {
                let text = display_value(other);
                let n: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{}' is not a number", text))?;
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a finite number", text))?
            }
        },
        TransformFn::Length => match input {
            Value::String(s) => json!(s.chars().count()),
            Value::Array(a) => json!(a.len()),
            Value::Object(o) => json!(o.len()),
            other => return Err(format!("cannot take the length of {}", other)),
        },
    })
}
