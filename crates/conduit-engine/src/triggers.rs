use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde_json::Value;
use tokio::sync::RwLock;

use conduit_core::error::{ConduitError, Result};
use conduit_core::flow::{Flow, Trigger};

/// A flow started on a cron schedule.
#[derive(Debug, Clone)]
pub struct ScheduledFlow {
    pub flow_id: String,
    pub expression: String,
    pub input: Value,
    schedule: Schedule,
}

impl ScheduledFlow {
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

#[derive(Default)]
struct Table {
    webhooks: HashMap<String, Vec<String>>,
    events: HashMap<String, Vec<String>>,
    schedules: Vec<ScheduledFlow>,
}

/// Maps webhook paths, event names and schedules to flow ids.
#[derive(Default)]
pub struct TriggerRegistry {
    table: RwLock<Table>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire up every trigger a flow declares. Manual triggers need nothing.
    pub async fn register(&self, flow: &Flow) -> Result<()> {
        let mut schedules = Vec::new();
        for trigger in &flow.triggers {
            if let Trigger::Schedule { cron, input } = trigger {
                let schedule = Schedule::from_str(cron).map_err(|e| ConduitError::InvalidTrigger {
                    flow: flow.id.clone(),
                    message: format!("invalid cron '{}': {}", cron, e),
                })?;
                schedules.push(ScheduledFlow {
                    flow_id: flow.id.clone(),
                    expression: cron.clone(),
                    input: input.clone(),
                    schedule,
                });
            }
        }

        let mut table = self.table.write().await;
        for trigger in &flow.triggers {
            match trigger {
                Trigger::Webhook { path, .. } => table
                    .webhooks
                    .entry(normalize_path(path))
                    .or_default()
                    .push(flow.id.clone()),
                Trigger::Event { event } => table
                    .events
                    .entry(event.clone())
                    .or_default()
                    .push(flow.id.clone()),
                Trigger::Schedule { .. } | Trigger::Manual => {}
            }
        }
        table.schedules.extend(schedules);
        Ok(())
    }

    pub async fn deregister(&self, flow_id: &str) {
        let mut guard = self.table.write().await;
        let table = &mut *guard;
        for flows in table.webhooks.values_mut().chain(table.events.values_mut()) {
            flows.retain(|f| f != flow_id);
        }
        table.webhooks.retain(|_, flows| !flows.is_empty());
        table.events.retain(|_, flows| !flows.is_empty());
        table.schedules.retain(|s| s.flow_id != flow_id);
    }

    pub async fn webhook_flows(&self, path: &str) -> Vec<String> {
        self.table
            .read()
            .await
            .webhooks
            .get(&normalize_path(path))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn event_flows(&self, event: &str) -> Vec<String> {
        self.table
            .read()
            .await
            .events
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn schedules(&self) -> Vec<ScheduledFlow> {
        self.table.read().await.schedules.clone()
    }

    /// The earliest schedule firing strictly after `after`.
    pub async fn next_due(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, ScheduledFlow)> {
        self.table
            .read()
            .await
            .schedules
            .iter()
            .filter_map(|s| s.next_after(after).map(|at| (at, s.clone())))
            .min_by_key(|(at, _)| *at)
    }
}

/// `/leads/` and `leads` both become `/leads`.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}
