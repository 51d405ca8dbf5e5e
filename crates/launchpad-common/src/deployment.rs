//! The persisted deployment record.
//!
//! A `Deployment` is created at initiation and is only mutated through
//! stage transitions and step-completion writes. Its `status_history` and
//! `step_status` are the postmortem trail and are never pruned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::DeploymentId;

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Analyzing,
    Checking,
    Generating,
    Deploying,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    /// Returns all statuses in lifecycle order.
    pub fn all() -> &'static [DeploymentStatus] {
        &[
            DeploymentStatus::Pending,
            DeploymentStatus::Analyzing,
            DeploymentStatus::Checking,
            DeploymentStatus::Generating,
            DeploymentStatus::Deploying,
            DeploymentStatus::Verifying,
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
            DeploymentStatus::Cancelled,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Analyzing => "analyzing",
            DeploymentStatus::Checking => "checking",
            DeploymentStatus::Generating => "generating",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Verifying => "verifying",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses archive the deployment; `Failed` is not terminal
    /// because it carries retry edges.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Cancelled)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown deployment status '{0}'")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for DeploymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// One entry of a deployment's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: DeploymentStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// Completion record for a (deployment, step) pair, written by the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
    pub previous_status: Option<DeploymentStatus>,
    pub status_history: Vec<StatusChange>,
    /// Keyed by stage step name.
    #[serde(default)]
    pub step_status: BTreeMap<String, StepRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a deployment in `Pending` with the initial history entry.
    pub fn new(id: DeploymentId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: DeploymentStatus::Pending,
            previous_status: None,
            status_history: vec![StatusChange {
                status: DeploymentStatus::Pending,
                timestamp: now,
                metadata: serde_json::Value::Null,
            }],
            step_status: BTreeMap::new(),
            created_at: now,
            archived_at: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_step_complete(&self, step: &str) -> bool {
        self.step_status
            .get(step)
            .map(|record| record.complete)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_deployment_starts_pending_with_history() {
        let deployment = Deployment::new(DeploymentId::new("d1"));
        assert_eq!(deployment.status, DeploymentStatus::Pending);
        assert_eq!(deployment.status_history.len(), 1);
        assert!(deployment.previous_status.is_none());
        assert!(!deployment.is_archived());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Deploying".parse::<DeploymentStatus>().unwrap(), DeploymentStatus::Deploying);
        assert!("shipping".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        let terminal: Vec<_> = DeploymentStatus::all()
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![&DeploymentStatus::Completed, &DeploymentStatus::Cancelled]);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DeploymentStatus::Verifying).unwrap();
        assert_eq!(json, "\"verifying\"");
    }
}
