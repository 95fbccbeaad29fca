use std::collections::HashSet;
use std::str::FromStr;

use conduit_core::error::{ConduitError, Result};
use conduit_core::expr::Condition;
use conduit_core::flow::{DataConfig, Flow, StepKind, Trigger};

/// Check a flow definition before it is registered.
///
/// Cycles are not rejected here; the wave builder finds them when the flow
/// is planned.
pub fn validate_flow(flow: &Flow) -> Result<()> {
    if flow.id.trim().is_empty() {
        return Err(ConduitError::Validation("flow id must not be empty".into()));
    }
    if flow.steps.is_empty() {
        return Err(ConduitError::Validation(format!(
            "flow {} has no steps",
            flow.id
        )));
    }

    let mut seen = HashSet::new();
    for step in &flow.steps {
        if step.id.trim().is_empty() {
            return Err(ConduitError::Validation(format!(
                "flow {} has a step with an empty id",
                flow.id
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(ConduitError::DuplicateStep(step.id.clone()));
        }
    }

    let owners = flow.auxiliary_owners();
    for step in &flow.steps {
        // Auxiliary steps run when their owner runs; their own ordering is never planned
        if let (Some(owned_by), false) = (owners.get(&step.id), step.dependencies.is_empty()) {
            return Err(ConduitError::Validation(format!(
                "step {} runs on behalf of {} and cannot declare dependencies",
                step.id,
                owned_by.join(", ")
            )));
        }
        for dep in &step.dependencies {
            if dep == &step.id {
                return Err(ConduitError::Validation(format!(
                    "step {} depends on itself",
                    step.id
                )));
            }
            if !seen.contains(dep.as_str()) {
                return Err(ConduitError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        if let Some(ref fallback) = step.fallback {
            if fallback == &step.id {
                return Err(ConduitError::Validation(format!(
                    "step {} is its own fallback",
                    step.id
                )));
            }
            if !seen.contains(fallback.as_str()) {
                return Err(ConduitError::Validation(format!(
                    "step {} has unknown fallback {}",
                    step.id, fallback
                )));
            }
        }

        validate_kind(flow, &step.id, &step.kind)?;
    }

    for rule in &flow.business_rules {
        Condition::parse(&rule.condition)?;
        for guarded in &rule.steps {
            if !seen.contains(guarded.as_str()) {
                return Err(ConduitError::Validation(format!(
                    "business rule '{}' guards unknown step {}",
                    rule.condition, guarded
                )));
            }
        }
    }

    for trigger in &flow.triggers {
        validate_trigger(&flow.id, trigger)?;
    }

    Ok(())
}

fn validate_kind(flow: &Flow, step_id: &str, kind: &StepKind) -> Result<()> {
    match kind {
        StepKind::Parallel(cfg) => {
            if cfg.steps.is_empty() {
                return Err(ConduitError::Validation(format!(
                    "parallel step {} has no members",
                    step_id
                )));
            }
            for member in &cfg.steps {
                if member == step_id {
                    return Err(ConduitError::Validation(format!(
                        "parallel step {} lists itself as a member",
                        step_id
                    )));
                }
                match flow.step(member) {
                    None => {
                        return Err(ConduitError::Validation(format!(
                            "parallel step {} has unknown member {}",
                            step_id, member
                        )))
                    }
                    Some(m) if matches!(m.kind, StepKind::Parallel(_)) => {
                        return Err(ConduitError::Validation(format!(
                            "parallel step {} has nested parallel member {}",
                            step_id, member
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        StepKind::Conditional(cfg) => {
            Condition::parse(&cfg.condition)?;
            for next in cfg.on_true.iter().chain(cfg.on_false.iter()) {
                if flow.step(next).is_none() {
                    return Err(ConduitError::Validation(format!(
                        "conditional step {} points at unknown step {}",
                        step_id, next
                    )));
                }
            }
        }
        StepKind::Data(DataConfig::Validate { conditions, .. }) => {
            for c in conditions {
                Condition::parse(c)?;
            }
        }
        StepKind::Api(cfg) if cfg.url.trim().is_empty() => {
            return Err(ConduitError::Validation(format!(
                "api step {} has an empty url",
                step_id
            )));
        }
        StepKind::Automation(cfg) if cfg.integration.trim().is_empty() => {
            return Err(ConduitError::Validation(format!(
                "automation step {} names no integration",
                step_id
            )));
        }
        _ => {}
    }
    Ok(())
}

fn validate_trigger(flow_id: &str, trigger: &Trigger) -> Result<()> {
    let invalid = |message: String| ConduitError::InvalidTrigger {
        flow: flow_id.to_string(),
        message,
    };
    match trigger {
        Trigger::Webhook { path, method } => {
            if !path.starts_with('/') {
                return Err(invalid(format!("webhook path '{}' must start with '/'", path)));
            }
            if method.trim().is_empty() {
                return Err(invalid("webhook method must not be empty".into()));
            }
        }
        Trigger::Schedule { cron, .. } => {
            cron::Schedule::from_str(cron)
                .map_err(|e| invalid(format!("invalid cron '{}': {}", cron, e)))?;
        }
        Trigger::Event { event } => {
            if event.trim().is_empty() {
                return Err(invalid("event name must not be empty".into()));
            }
        }
        Trigger::Manual => {}
    }
    Ok(())
}
