pub mod engine;
pub mod types;

pub use engine::{NoopPhaseHook, PhaseHook, WorkflowEngine, PLAN_PHASES};
pub use types::*;
