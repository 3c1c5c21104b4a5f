//! The review cycle state machine.

pub mod context;
pub mod orchestrator;
pub mod types;

pub use context::WorkflowContext;
pub use orchestrator::ReviewCycleOrchestrator;
pub use types::CompletionStatus;
