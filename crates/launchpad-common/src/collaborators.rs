//! Contracts for the engine's external collaborators.
//!
//! Collaborator failures are opaque to the engine, so these traits return
//! `anyhow::Result`; the engine wraps them into its own typed errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Deployment, DeploymentId, Event, LogEntry, ProjectAnalysis};

/// Read-only source of project analysis for plan generation.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, deployment_id: &DeploymentId) -> anyhow::Result<ProjectAnalysis>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

/// Asynchronous approval signal keyed by `(deployment, step)`.
///
/// Implementations may wait indefinitely; the executor bounds the wait.
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn await_decision(
        &self,
        deployment_id: &DeploymentId,
        step_id: u32,
        step_name: &str,
    ) -> anyhow::Result<ApprovalDecision>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl VerificationOutcome {
    pub fn complete() -> Self {
        Self {
            complete: true,
            details: None,
        }
    }

    pub fn incomplete(details: impl Into<String>) -> Self {
        Self {
            complete: false,
            details: Some(details.into()),
        }
    }
}

/// Externally verifiable completion reports (health checks, smoke tests).
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn verify(
        &self,
        deployment_id: &DeploymentId,
        step: &str,
    ) -> anyhow::Result<VerificationOutcome>;
}

/// Destination for lifecycle and output events. Publishing never fails the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Persistence for the `Deployment` record. Storage technology is the implementor's choice.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn load(&self, id: &DeploymentId) -> anyhow::Result<Option<Deployment>>;

    async fn save(&self, deployment: &Deployment) -> anyhow::Result<()>;

    async fn list(&self) -> anyhow::Result<Vec<DeploymentId>>;
}

/// Append-only audit log persistence.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: &LogEntry) -> anyhow::Result<()>;

    async fn entries(&self, deployment_id: &DeploymentId) -> anyhow::Result<Vec<LogEntry>>;
}
