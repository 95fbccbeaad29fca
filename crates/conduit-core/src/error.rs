use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConduitError {
    // Definition errors
    #[error("Flow validation failed: {0}")]
    Validation(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Invalid trigger on flow {flow}: {message}")]
    InvalidTrigger { flow: String, message: String },

    #[error("Invalid condition '{condition}': {message}")]
    InvalidCondition { condition: String, message: String },

    #[error("Unknown step type '{step_type}' on step {step}")]
    UnknownStepType { step: String, step_type: String },

    #[error("Circular or unsatisfiable dependency among steps: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    // Step errors
    #[error("Step execution failed: {step}: {message}")]
    StepExecution { step: String, message: String },

    #[error("Step timeout after {timeout_ms}ms: {step}")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("Approval denied for step {step}: {reason}")]
    ApprovalDenied { step: String, reason: String },

    #[error("Approval timeout for step: {step}")]
    ApprovalTimeout { step: String },

    #[error("Work item expired for step: {step}")]
    WorkItemExpired { step: String },

    #[error("Integration not found: {0}")]
    UnknownIntegration(String),

    // Execution errors
    #[error("Execution {execution_id} failed: {source}")]
    ExecutionFailed {
        execution_id: String,
        #[source]
        source: Box<ConduitError>,
    },

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Flow already registered: {0}")]
    FlowAlreadyRegistered(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    // Collaborator errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Model inference failed: {0}")]
    Model(String),

    #[error("Notification failed: {channel}: {message}")]
    Notification { channel: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConduitError {
    /// Deadline-style failures. Routed exactly like step failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ApprovalTimeout { .. } | Self::WorkItemExpired { .. }
        )
    }

    /// Errors raised before any step runs (registration or planning).
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnknownDependency { .. }
                | Self::DuplicateStep(_)
                | Self::InvalidTrigger { .. }
                | Self::InvalidCondition { .. }
                | Self::UnknownStepType { .. }
                | Self::CircularDependency(_)
        )
    }

    /// Unwrap an `ExecutionFailed` to the error that caused it.
    pub fn root_cause(&self) -> &ConduitError {
        match self {
            Self::ExecutionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn step_failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_family() {
        assert!(ConduitError::Timeout {
            step: "a".into(),
            timeout_ms: 10
        }
        .is_timeout());
        assert!(ConduitError::ApprovalTimeout { step: "a".into() }.is_timeout());
        assert!(ConduitError::WorkItemExpired { step: "a".into() }.is_timeout());
        assert!(!ConduitError::step_failed("a", "boom").is_timeout());
    }

    #[test]
    fn root_cause_unwraps_nested_failures() {
        let err = ConduitError::ExecutionFailed {
            execution_id: "e1".into(),
            source: Box::new(ConduitError::CircularDependency(vec!["a".into(), "b".into()])),
        };
        assert!(matches!(
            err.root_cause(),
            ConduitError::CircularDependency(ids) if ids.len() == 2
        ));
        assert!(err.to_string().contains("a, b"));
    }
}
