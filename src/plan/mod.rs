//! Deployment plans: generation from analysis, and sequential execution.

pub mod executor;
pub mod generator;
pub mod interpreter;
pub mod state;
pub mod step;

pub use executor::{ExecuteOptions, ExecutionError, PlanExecutor};
pub use generator::{
    PotentialIssue, Severity, TimeEstimate, estimate_total_time, generate, generate_rollback_plan,
    identify_potential_issues, validate_plan,
};
pub use interpreter::{RenderContext, StepInterpreter};
pub use state::{ExecutionState, ExecutionStatus, StepResult};
pub use step::{Predicate, Prerequisite, RollbackEntry, Step, StepAction, StepType};
