//! Event envelope published to observers.
//!
//! Delivery is best-effort at-least-once to currently-subscribed observers;
//! nothing here assumes an observer is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeploymentId, DeploymentStatus};

/// Which pipe of a child process a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    // Stage lifecycle
    StageChanged {
        from: DeploymentStatus,
        to: DeploymentStatus,
        #[serde(default)]
        metadata: serde_json::Value,
    },
    StepMarkedComplete {
        step: String,
    },

    // Planning
    PlanGenerated {
        steps: usize,
        estimate_min_minutes: u32,
        estimate_max_minutes: u32,
    },
    PotentialIssue {
        code: String,
        severity: String,
        message: String,
    },

    // Plan execution
    ExecutionStarted {
        total_steps: usize,
    },
    StepStarted {
        step_id: u32,
        name: String,
    },
    StepSkipped {
        step_id: u32,
        name: String,
    },
    StepInfo {
        step_id: u32,
        message: String,
    },
    ApprovalRequired {
        step_id: u32,
        name: String,
        timeout_secs: u64,
    },
    ApprovalResolved {
        step_id: u32,
        approved: bool,
    },
    StepCompleted {
        step_id: u32,
        name: String,
        duration_ms: u64,
    },
    StepFailed {
        step_id: u32,
        name: String,
        code: String,
        error: String,
    },
    RollbackStarted {
        steps: usize,
    },
    RollbackStep {
        original_step_id: u32,
        command: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ExecutionFinished {
        status: String,
        completed: usize,
        failed: usize,
        skipped: usize,
    },

    // Command streaming
    CommandStarted {
        command: String,
        cwd: String,
    },
    CommandOutput {
        stream: OutputStream,
        chunk: String,
    },
    CommandFinished {
        command: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        duration_ms: u64,
        timed_out: bool,
    },
}

impl EventKind {
    /// The wire name of the event, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StageChanged { .. } => "stage_changed",
            EventKind::StepMarkedComplete { .. } => "step_marked_complete",
            EventKind::PlanGenerated { .. } => "plan_generated",
            EventKind::PotentialIssue { .. } => "potential_issue",
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::StepStarted { .. } => "step_started",
            EventKind::StepSkipped { .. } => "step_skipped",
            EventKind::StepInfo { .. } => "step_info",
            EventKind::ApprovalRequired { .. } => "approval_required",
            EventKind::ApprovalResolved { .. } => "approval_resolved",
            EventKind::StepCompleted { .. } => "step_completed",
            EventKind::StepFailed { .. } => "step_failed",
            EventKind::RollbackStarted { .. } => "rollback_started",
            EventKind::RollbackStep { .. } => "rollback_step",
            EventKind::ExecutionFinished { .. } => "execution_finished",
            EventKind::CommandStarted { .. } => "command_started",
            EventKind::CommandOutput { .. } => "command_output",
            EventKind::CommandFinished { .. } => "command_finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub deployment_id: DeploymentId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(deployment_id: &DeploymentId, kind: EventKind) -> Self {
        Self {
            deployment_id: deployment_id.clone(),
            timestamp: Utc::now(),
            kind,
        }
    }
}
