use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use conduit_core::flow::result_key;
use conduit_core::types::{
    AiDecision, ErrorEntry, ExecutionSnapshot, ExecutionStatus, HumanIntervention, StepState,
};

struct ContextState {
    data: HashMap<String, Value>,
    status: ExecutionStatus,
    current_step: Option<String>,
    steps: BTreeMap<String, StepState>,
    end_time: Option<DateTime<Utc>>,
    human_interventions: Vec<HumanIntervention>,
    ai_decisions: Vec<AiDecision>,
    errors: Vec<ErrorEntry>,
    /// Outstanding approval or work-item waits.
    awaiting_human: usize,
}

/// Mutable state of one flow run.
///
/// Shared between the concurrently running steps of a wave. Every mutation
/// goes through one lock, so the append-only logs never lose entries.
pub struct ExecutionContext {
    flow_id: String,
    execution_id: String,
    start_time: DateTime<Utc>,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    /// Seed a context from trigger input. An object is spread into the data
    /// map; any other non-null value is stored under `input`.
    pub fn new<'a>(
        flow_id: impl Into<String>,
        execution_id: impl Into<String>,
        input: Value,
        step_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let data = match input {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => HashMap::from([("input".to_string(), other)]),
        };
        let steps = step_ids
            .into_iter()
            .map(|id| (id.to_string(), StepState::Pending))
            .collect();
        Self {
            flow_id: flow_id.into(),
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            state: Mutex::new(ContextState {
                data,
                status: ExecutionStatus::Running,
                current_step: None,
                steps,
                end_time: None,
                human_interventions: vec![],
                ai_decisions: vec![],
                errors: vec![],
                awaiting_human: 0,
            }),
        }
    }

    /// Never held across an await.
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Execution data as a JSON object.
    pub async fn data(&self) -> Value {
        let state = self.lock();
        Value::Object(
            state
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.lock().data.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().data.insert(key.into(), value);
    }

    /// Store a step's output under `step_<id>_result`.
    pub async fn set_result(&self, step_id: &str, value: Value) {
        self.set(result_key(step_id), value).await;
    }

    pub async fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    pub async fn set_current_step(&self, step_id: &str) {
        self.lock().current_step = Some(step_id.to_string());
    }

    pub async fn set_step_state(&self, step_id: &str, step_state: StepState) {
        self.lock().steps.insert(step_id.to_string(), step_state);
    }

    pub async fn step_state(&self, step_id: &str) -> Option<StepState> {
        self.lock().steps.get(step_id).copied()
    }

    pub async fn record_error(&self, step_id: &str, error: impl Into<String>) {
        self.lock().errors.push(ErrorEntry {
            step_id: step_id.to_string(),
            error: error.into(),
            timestamp: Utc::now(),
            resolved: false,
        });
    }

    /// Mark a step's logged errors as recovered.
    pub async fn resolve_errors(&self, step_id: &str) {
        let mut state = self.lock();
        for entry in state.errors.iter_mut().filter(|e| e.step_id == step_id) {
            entry.resolved = true;
        }
    }

    pub async fn record_ai_decision(&self, decision: AiDecision) {
        self.lock().ai_decisions.push(decision);
    }

    pub async fn record_intervention(&self, intervention: HumanIntervention) {
        self.lock().human_interventions.push(intervention);
    }

    /// A step started waiting on a human. Returns true when this moved the
    /// execution from `running` to `paused`.
    pub fn begin_human_wait(&self) -> bool {
        let mut state = self.lock();
        state.awaiting_human += 1;
        if state.status == ExecutionStatus::Running {
            state.status = ExecutionStatus::Paused;
            return true;
        }
        false
    }

    /// A human wait finished. Returns true when the last outstanding wait
    /// ended and the execution went back to `running`.
    pub fn end_human_wait(&self) -> bool {
        let mut state = self.lock();
        state.awaiting_human = state.awaiting_human.saturating_sub(1);
        if state.awaiting_human == 0 && state.status == ExecutionStatus::Paused {
            state.status = ExecutionStatus::Running;
            return true;
        }
        false
    }

    pub async fn escalate(&self) {
        self.lock().status = ExecutionStatus::Escalated;
    }

    /// Close the run. An escalated run keeps its status when it fails.
    pub async fn finish(&self, status: ExecutionStatus) -> ExecutionStatus {
        let mut state = self.lock();
        if !(state.status == ExecutionStatus::Escalated && status == ExecutionStatus::Failed) {
            state.status = status;
        }
        state.end_time = Some(Utc::now());
        state.current_step = None;
        state.status
    }

    pub async fn is_finished(&self) -> bool {
        self.lock().end_time.is_some()
    }

    pub async fn snapshot(&self) -> ExecutionSnapshot {
        let state = self.lock();
        ExecutionSnapshot {
            flow_id: self.flow_id.clone(),
            execution_id: self.execution_id.clone(),
            status: state.status,
            current_step: state.current_step.clone(),
            data: state.data.clone(),
            steps: state.steps.clone(),
            start_time: self.start_time,
            end_time: state.end_time,
            human_interventions: state.human_interventions.clone(),
            ai_decisions: state.ai_decisions.clone(),
            errors: state.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn input_seeding() {
        let ctx = ExecutionContext::new("f", "e", json!({ "leadId": 7 }), ["a"]);
        assert_eq!(ctx.get("leadId").await, Some(json!(7)));
        assert_eq!(ctx.step_state("a").await, Some(StepState::Pending));

        let ctx = ExecutionContext::new("f", "e", json!([1, 2]), []);
        assert_eq!(ctx.get("input").await, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn pause_tracks_outstanding_waits() {
        let ctx = ExecutionContext::new("f", "e", json!({}), []);
        assert!(ctx.begin_human_wait());
        assert!(!ctx.begin_human_wait());
        assert_eq!(ctx.status().await, ExecutionStatus::Paused);
        assert!(!ctx.end_human_wait());
        assert!(ctx.end_human_wait());
        assert_eq!(ctx.status().await, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn escalation_survives_failure() {
        let ctx = ExecutionContext::new("f", "e", json!({}), []);
        ctx.escalate().await;
        assert!(!ctx.begin_human_wait());
        assert_eq!(ctx.finish(ExecutionStatus::Failed).await, ExecutionStatus::Escalated);
        assert!(ctx.snapshot().await.end_time.is_some());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let ctx = Arc::new(ExecutionContext::new("f", "e", json!({}), []));
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    ctx.record_error(&format!("s{}", i), "boom").await;
                    ctx.set_result(&format!("s{}", i), json!(i)).await;
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        let snap = ctx.snapshot().await;
        assert_eq!(snap.errors.len(), 50);
        assert_eq!(snap.result("s42"), Some(&json!(42)));
    }
}
