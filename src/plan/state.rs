//! Per-execution bookkeeping for a running plan.

use chrono::{DateTime, Utc};
use launchpad_common::DeploymentId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::step::Step;
use crate::errors::{PlanError, RollbackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// `pending -> running -> {completed, failed, cancelled}`; a pending
    /// execution may also be cancelled before it starts.
    pub fn can_become(&self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => {
                matches!(next, ExecutionStatus::Running | ExecutionStatus::Cancelled)
            }
            ExecutionStatus::Running => next.is_finished(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub deployment_id: DeploymentId,
    pub status: ExecutionStatus,
    pub current_step_id: Option<u32>,
    pub completed_steps: Vec<u32>,
    pub failed_steps: Vec<u32>,
    pub skipped_steps: Vec<u32>,
    pub results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_failures: Vec<RollbackError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(deployment_id: &DeploymentId) -> Self {
        Self {
            deployment_id: deployment_id.clone(),
            status: ExecutionStatus::Pending,
            current_step_id: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            results: Vec::new(),
            rollback_failures: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    fn advance(&mut self, next: ExecutionStatus) {
        if !self.status.can_become(next) {
            tracing::warn!(
                deployment = %self.deployment_id,
                from = %self.status,
                to = %next,
                "ignoring illegal execution status change"
            );
            return;
        }
        self.status = next;
        if next == ExecutionStatus::Running {
            self.started_at = Some(Utc::now());
        }
        if next.is_finished() {
            self.current_step_id = None;
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn start(&mut self) {
        self.advance(ExecutionStatus::Running);
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.advance(status);
    }

    pub fn begin_step(&mut self, step: &Step) {
        self.current_step_id = Some(step.id);
    }

    pub fn record_skipped(&mut self, step: &Step) {
        self.skipped_steps.push(step.id);
        self.results.push(StepResult {
            step_id: step.id,
            name: step.name.clone(),
            success: true,
            skipped: true,
            duration_ms: 0,
            exit_code: None,
            error_code: None,
            error: None,
        });
    }

    pub fn record_success(&mut self, step: &Step, elapsed: Duration, exit_code: Option<i32>) {
        self.completed_steps.push(step.id);
        self.results.push(StepResult {
            step_id: step.id,
            name: step.name.clone(),
            success: true,
            skipped: false,
            duration_ms: elapsed.as_millis() as u64,
            exit_code,
            error_code: None,
            error: None,
        });
    }

    pub fn record_failure(&mut self, step: &Step, elapsed: Duration, error: &PlanError) {
        let exit_code = match error {
            PlanError::Command {
                source: crate::errors::CommandError::NonZeroExit { exit_code, .. },
                ..
            } => Some(*exit_code),
            _ => None,
        };
        self.failed_steps.push(step.id);
        self.results.push(StepResult {
            step_id: step.id,
            name: step.name.clone(),
            success: false,
            skipped: false,
            duration_ms: elapsed.as_millis() as u64,
            exit_code,
            error_code: Some(error.code().to_string()),
            error: Some(error.to_string()),
        });
    }

    pub fn result_for(&self, step_id: u32) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }
}
