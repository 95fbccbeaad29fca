pub mod context;
pub mod event_log;
pub mod executor;
pub mod failure;
pub mod graph;
pub mod history;
pub mod integrations;
pub mod orchestrator;
pub mod queue;
pub mod rules;
pub mod scheduler;
pub mod triggers;
pub mod validator;

pub use context::ExecutionContext;
pub use event_log::EventLogger;
pub use executor::{ExecutorSettings, StepExecutor};
pub use failure::FailureHandler;
pub use graph::{build_waves, wave_ids};
pub use history::ExecutionHistory;
pub use integrations::IntegrationRegistry;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use queue::HumanWorkQueue;
pub use rules::{RuleOutcome, RulesEngine};
pub use scheduler::CronScheduler;
pub use triggers::{ScheduledFlow, TriggerRegistry};
pub use validator::validate_flow;
