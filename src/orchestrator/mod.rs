pub mod builder;
pub mod engine;

pub use builder::OrchestratorBuilder;
pub use engine::{DeploymentPlan, Orchestrator, RunOutcome};
