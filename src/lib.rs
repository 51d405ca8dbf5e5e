pub mod analysis;
pub mod audit;
pub mod background;
pub mod errors;
pub mod events;
pub mod exec;
pub mod gate;
pub mod launchpad_config;
pub mod orchestrator;
pub mod plan;
pub mod stage;
pub mod store;
pub mod ui;

pub use errors::EngineError;
pub use orchestrator::{DeploymentPlan, Orchestrator, OrchestratorBuilder, RunOutcome};
