//! Typed error hierarchy for the Launchpad engine.
//!
//! One enum per subsystem, aggregated by `EngineError`:
//! - `CommandError` — child process spawn, exit, timeout and cancellation
//! - `StoreError` — deployment persistence
//! - `TransitionError` — stage state machine
//! - `GateError` — step completion gate
//! - `PlanError` — plan validation and execution
//! - `RollbackError` — per-step compensation failures (recorded, never raised)
//!
//! Every error exposes a machine-readable `code()` alongside its `Display`.

use launchpad_common::{DeploymentId, DeploymentStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

fn join_statuses(statuses: &[DeploymentStatus]) -> String {
    if statuses.is_empty() {
        return "none".to_string();
    }
    statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from the command execution subsystem.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No usable shell found (tried: {tried})")]
    NoShell { tried: String },

    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command `{command}` was terminated by a signal: {stderr}")]
    Signalled { command: String, stderr: String },

    #[error("Command `{command}` timed out after {timeout_ms}ms")]
    Timeout {
        command: String,
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("Command `{command}` was cancelled")]
    Cancelled { command: String },

    #[error("A command is already running for deployment {deployment_id}")]
    Busy { deployment_id: DeploymentId },

    #[error("Workspace {path} already belongs to deployment {owner}")]
    WorkspaceInUse { path: String, owner: DeploymentId },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NoShell { .. } | CommandError::SpawnFailed { .. } => "SPAWN_FAILED",
            CommandError::NonZeroExit { .. } | CommandError::Signalled { .. } => "COMMAND_FAILED",
            CommandError::Timeout { .. } => "TIMEOUT",
            CommandError::Cancelled { .. } => "CANCELLED",
            CommandError::Busy { .. } | CommandError::WorkspaceInUse { .. } => "CONFLICT",
            CommandError::Io { .. } => "IO_ERROR",
        }
    }

    /// Captured stderr, when the failure carries any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::NonZeroExit { stderr, .. }
            | CommandError::Signalled { stderr, .. }
            | CommandError::Timeout { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Errors from deployment persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Deployment {0} not found")]
    NotFound(DeploymentId),

    #[error("Deployment {0} already exists")]
    AlreadyExists(DeploymentId),

    #[error("Deployment store error: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::AlreadyExists(_) => "CONFLICT",
            StoreError::Backend(_) => "STORE_ERROR",
        }
    }
}

/// Errors from the stage state machine.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(
        "Invalid transition for deployment {deployment_id}: {from} -> {to} (allowed: {})",
        join_statuses(.allowed)
    )]
    Invalid {
        deployment_id: DeploymentId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        allowed: Vec<DeploymentStatus>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::Invalid { .. } => "INVALID_TRANSITION",
            TransitionError::Store(e) => e.code(),
        }
    }
}

/// Errors from the step completion gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Cannot enter {target}: step '{step}' is not complete")]
    Blocked {
        target: DeploymentStatus,
        step: String,
    },

    #[error("Verification for step '{step}' failed: {source:#}")]
    Verification {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            GateError::Blocked { .. } => "PREREQUISITE_NOT_MET",
            GateError::Verification { .. } => "VALIDATION_ERROR",
            GateError::Store(e) => e.code(),
        }
    }
}

/// Errors from plan validation and plan execution.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan is invalid: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },

    #[error("Step {step_id} ({step_name}) has unmet prerequisites: {}", .unmet.join("; "))]
    PrerequisitesNotMet {
        step_id: u32,
        step_name: String,
        unmet: Vec<String>,
    },

    #[error("Step {step_id} ({step_name}) failed validation: {reason}")]
    ValidationFailed {
        step_id: u32,
        step_name: String,
        reason: String,
    },

    #[error("Step {step_id} ({step_name}) failed: {source}")]
    Command {
        step_id: u32,
        step_name: String,
        #[source]
        source: CommandError,
    },

    #[error("Approval for step {step_id} ({step_name}) timed out after {timeout_secs}s")]
    ApprovalTimeout {
        step_id: u32,
        step_name: String,
        timeout_secs: u64,
    },

    #[error("Approval for step {step_id} ({step_name}) was rejected: {reason}")]
    ApprovalRejected {
        step_id: u32,
        step_name: String,
        reason: String,
    },

    #[error("A plan is already executing for deployment {deployment_id}")]
    Conflict { deployment_id: DeploymentId },

    #[error("Plan execution for deployment {deployment_id} was cancelled")]
    Cancelled { deployment_id: DeploymentId },
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Invalid { .. } | PlanError::ValidationFailed { .. } => "VALIDATION_ERROR",
            PlanError::PrerequisitesNotMet { .. } => "PREREQUISITE_NOT_MET",
            PlanError::Command { source, .. } => source.code(),
            PlanError::ApprovalTimeout { .. } => "APPROVAL_TIMEOUT",
            PlanError::ApprovalRejected { .. } => "APPROVAL_REJECTED",
            PlanError::Conflict { .. } => "CONFLICT",
            PlanError::Cancelled { .. } => "CANCELLED",
        }
    }

    /// The plan step the error is attributed to, if any.
    pub fn step_id(&self) -> Option<u32> {
        match self {
            PlanError::PrerequisitesNotMet { step_id, .. }
            | PlanError::ValidationFailed { step_id, .. }
            | PlanError::Command { step_id, .. }
            | PlanError::ApprovalTimeout { step_id, .. }
            | PlanError::ApprovalRejected { step_id, .. } => Some(*step_id),
            _ => None,
        }
    }
}

/// A failed compensating command. Recorded on the execution state, never raised.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("Rollback of step {original_step_id} (`{command}`) failed: {message}")]
pub struct RollbackError {
    pub original_step_id: u32,
    pub command: String,
    pub cause_code: String,
    pub message: String,
}

impl RollbackError {
    pub fn code(&self) -> &'static str {
        "ROLLBACK_FAILED"
    }
}

/// Top-level error returned by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Project analysis failed: {0:#}")]
    Analysis(#[source] anyhow::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Command(e) => e.code(),
            EngineError::Store(e) => e.code(),
            EngineError::Transition(e) => e.code(),
            EngineError::Gate(e) => e.code(),
            EngineError::Plan(e) => e.code(),
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Analysis(_) => "ANALYSIS_FAILED",
        }
    }
}
