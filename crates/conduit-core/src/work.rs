use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority of a human task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum WorkPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for WorkPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Why a work item exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkKind {
    /// Created by a `human` step; the step waits on it.
    Task,
    /// Gates an AI decision that needs sign-off.
    Approval {
        model: String,
        confidence: f64,
        decision: serde_json::Value,
        reasoning: String,
    },
    /// Raised when a critical step fails; nobody waits on it.
    Escalation { error: String },
}

/// A unit of human-assigned work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub step_id: String,
    pub execution_id: String,
    pub title: String,
    pub description: String,
    /// Snapshot of execution data at creation time.
    pub data: serde_json::Value,
    pub priority: WorkPriority,
    pub deadline: DateTime<Utc>,
    pub kind: WorkKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl WorkItem {
    pub fn new(
        step_id: impl Into<String>,
        execution_id: impl Into<String>,
        title: impl Into<String>,
        kind: WorkKind,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_id: step_id.into(),
            execution_id: execution_id.into(),
            title: title.into(),
            description: String::new(),
            data: serde_json::Value::Null,
            priority: WorkPriority::Normal,
            deadline,
            kind,
            created_at: Utc::now(),
            assigned_to: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: WorkPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn assigned(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    pub fn is_approval(&self) -> bool {
        matches!(self.kind, WorkKind::Approval { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Acknowledgment returned when a work item is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub item_id: String,
    pub assigned_to: String,
}

/// Outcome of a work item or approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub approved: bool,
    /// Who resolved it (`system` for expiries).
    pub approver: String,
    #[serde(default)]
    pub comments: Option<String>,
    /// Optional payload supplied by the human (e.g. corrected values).
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// True when synthesized because the deadline passed.
    #[serde(default)]
    pub timed_out: bool,
}

impl Resolution {
    pub fn approve(approver: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver: approver.into(),
            comments: None,
            data: None,
            timestamp: Utc::now(),
            timed_out: false,
        }
    }

    pub fn reject(approver: impl Into<String>, comments: impl Into<String>) -> Self {
        Self {
            approved: false,
            approver: approver.into(),
            comments: Some(comments.into()),
            data: None,
            timestamp: Utc::now(),
            timed_out: false,
        }
    }

    /// Synthetic "not approved" outcome for a deadline expiry.
    pub fn expired() -> Self {
        Self {
            approved: false,
            approver: "system".to_string(),
            comments: Some("timed out".to_string()),
            data: None,
            timestamp: Utc::now(),
            timed_out: true,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
