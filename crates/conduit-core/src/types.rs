use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::work::{Resolution, WorkItem};

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one flow run.
///
/// `completed` and `failed` are terminal; `paused` and `escalated` are
/// intermediate states an execution can leave again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Escalated,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// Per-step progress inside an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
    /// Failed, but its fallback produced the slot's outcome.
    Recovered,
}

impl StepState {
    /// Counts as done for dependency purposes.
    pub fn is_processed(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// One model decision taken during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDecision {
    pub step_id: String,
    pub model: String,
    pub confidence: f64,
    pub decision: serde_json::Value,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// One human action taken during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanIntervention {
    pub step_id: String,
    pub work_item_id: String,
    pub resolution: Resolution,
}

/// One step-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub step_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    /// Set once a fallback recovered the failure.
    pub resolved: bool,
}

/// Read-only view of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub flow_id: String,
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    pub data: HashMap<String, serde_json::Value>,
    pub steps: BTreeMap<String, StepState>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub human_interventions: Vec<HumanIntervention>,
    pub ai_decisions: Vec<AiDecision>,
    pub errors: Vec<ErrorEntry>,
}

impl ExecutionSnapshot {
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }

    pub fn result(&self, step_id: &str) -> Option<&serde_json::Value> {
        self.data.get(&crate::flow::result_key(step_id))
    }
}

/// Aggregate counters over known executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub escalated: usize,
    /// Mean over completed runs only.
    pub average_duration_ms: Option<f64>,
    pub pending_work_items: usize,
}

/// Output of the model inference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inference {
    pub decision: serde_json::Value,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON, or a JSON string when the body was not JSON.
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Acknowledgment from a notification collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub channel: String,
    pub delivered_to: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryReceipt {
    pub fn new(channel: impl Into<String>, delivered_to: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            delivered_to,
            timestamp: Utc::now(),
        }
    }
}

/// Events published on the event bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowRegistered { flow_id: String },
    FlowDeregistered { flow_id: String },
    ExecutionStarted { execution_id: String, flow_id: String },
    WaveStarted { execution_id: String, wave: usize, steps: Vec<String> },
    StepStarted { execution_id: String, step_id: String },
    StepCompleted { execution_id: String, step_id: String, elapsed_ms: u64 },
    StepSkipped { execution_id: String, step_id: String, reason: String },
    StepFailed { execution_id: String, step_id: String, error: String },
    /// A fallback ran in place of a failed step.
    StepRecovered { execution_id: String, step_id: String, fallback: String },
    ConditionEvaluated {
        execution_id: String,
        step_id: String,
        result: bool,
        next_step: Option<String>,
    },
    WorkItemCreated { item: WorkItem },
    ApprovalRequested { item: WorkItem },
    WorkItemResolved { item_id: String, approved: bool },
    WorkItemExpired { item_id: String },
    ExecutionPaused { execution_id: String },
    ExecutionResumed { execution_id: String },
    ExecutionEscalated { execution_id: String, step_id: String, error: String },
    ExecutionCompleted { execution_id: String, flow_id: String, elapsed_ms: u64 },
    ExecutionFailed { execution_id: String, flow_id: String, error: String },
    /// Emitted after a failure so downstream analysis can pick it up.
    FailureAnalysis {
        execution_id: String,
        flow_id: String,
        failed_step: Option<String>,
        error_count: usize,
    },
    SlaBreached { execution_id: String, flow_id: String, elapsed_ms: u64, max_ms: u64 },
}

impl FlowEvent {
    /// Short machine name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FlowRegistered { .. } => "flow_registered",
            Self::FlowDeregistered { .. } => "flow_deregistered",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::WaveStarted { .. } => "wave_started",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::StepFailed { .. } => "step_failed",
            Self::StepRecovered { .. } => "step_recovered",
            Self::ConditionEvaluated { .. } => "condition_evaluated",
            Self::WorkItemCreated { .. } => "work_item_created",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::WorkItemResolved { .. } => "work_item_resolved",
            Self::WorkItemExpired { .. } => "work_item_expired",
            Self::ExecutionPaused { .. } => "execution_paused",
            Self::ExecutionResumed { .. } => "execution_resumed",
            Self::ExecutionEscalated { .. } => "execution_escalated",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::FailureAnalysis { .. } => "failure_analysis",
            Self::SlaBreached { .. } => "sla_breached",
        }
    }

    /// Execution this event belongs to, if any.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::WaveStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::StepRecovered { execution_id, .. }
            | Self::ConditionEvaluated { execution_id, .. }
            | Self::ExecutionPaused { execution_id }
            | Self::ExecutionResumed { execution_id }
            | Self::ExecutionEscalated { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::FailureAnalysis { execution_id, .. }
            | Self::SlaBreached { execution_id, .. } => Some(execution_id),
            Self::WorkItemCreated { item } | Self::ApprovalRequested { item } => {
                Some(&item.execution_id)
            }
            Self::FlowRegistered { .. }
            | Self::FlowDeregistered { .. }
            | Self::WorkItemResolved { .. }
            | Self::WorkItemExpired { .. } => None,
        }
    }

    /// Whether this event closes out an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted { .. } | Self::ExecutionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminality() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Escalated.is_terminal());
        assert_eq!(ExecutionStatus::Escalated.to_string(), "escalated");
    }

    #[test]
    fn processed_states() {
        assert!(StepState::Skipped.is_processed());
        assert!(StepState::Recovered.is_processed());
        assert!(!StepState::Running.is_processed());
    }

    #[test]
    fn snapshot_duration() {
        let start = Utc::now();
        let snap = ExecutionSnapshot {
            flow_id: "f".into(),
            execution_id: "e".into(),
            status: ExecutionStatus::Completed,
            current_step: None,
            data: HashMap::new(),
            steps: BTreeMap::new(),
            start_time: start,
            end_time: Some(start + chrono::Duration::milliseconds(250)),
            human_interventions: vec![],
            ai_decisions: vec![],
            errors: vec![],
        };
        assert_eq!(snap.duration_ms(), Some(250));
    }

    #[test]
    fn event_execution_ids() {
        let e = FlowEvent::StepStarted {
            execution_id: "e1".into(),
            step_id: "a".into(),
        };
        assert_eq!(e.execution_id(), Some("e1"));
        assert_eq!(e.name(), "step_started");
        assert!(FlowEvent::FlowRegistered { flow_id: "f".into() }
            .execution_id()
            .is_none());
    }
}
