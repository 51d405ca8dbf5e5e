//! Shared domain types for the Launchpad orchestrator.
//!
//! Everything that crosses a seam between the engine and its collaborators
//! lives here: the persisted `Deployment` shape, audit `LogEntry` records,
//! the event envelope published to observers, the project analysis input,
//! and the async traits the engine consumes.

pub mod analysis;
pub mod collaborators;
pub mod deployment;
pub mod event;
pub mod log;

pub use analysis::{AnalysisFlags, ArchitecturePattern, ProjectAnalysis, ProjectType};
pub use collaborators::{
    AnalysisProvider, ApprovalDecision, ApprovalProvider, DeploymentStore, EventSink, LogStore,
    VerificationOutcome, VerificationProvider,
};
pub use deployment::{Deployment, DeploymentStatus, StatusChange, StepRecord};
pub use event::{Event, EventKind, OutputStream};
pub use log::{LogEntry, LogLevel};

use serde::{Deserialize, Serialize};

/// Identifier of a deployment. One deployment maps to exactly one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe name derived from the id.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte, `_` included,
    /// becomes `_xx` (lowercase hex). Each `_` starts an escape, so distinct
    /// ids never share a stem.
    pub fn file_stem(&self) -> String {
        if self.0.is_empty() {
            return "_".to_string();
        }
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("_{:02x}", byte));
            }
        }
        stem
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeploymentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_id_serializes_as_plain_string() {
        let id = DeploymentId::new("dep-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"dep-42\"");
        assert_eq!(id.to_string(), "dep-42");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DeploymentId::generate(), DeploymentId::generate());
    }

    #[test]
    fn file_stem_escapes_path_characters() {
        assert_eq!(
            DeploymentId::new("../etc/passwd").file_stem(),
            "_2e_2e_2fetc_2fpasswd"
        );
        assert_eq!(DeploymentId::new("dep-42").file_stem(), "dep-42");
        assert_eq!(DeploymentId::new("dep-42_a").file_stem(), "dep-42_5fa");
        assert_eq!(DeploymentId::new("").file_stem(), "_");
    }

    #[test]
    fn file_stems_of_distinct_ids_differ() {
        let ids = ["a/b", "a_b", "a_2fb", "a.b", "a b", "_", "", "é"];
        let stems: std::collections::HashSet<String> = ids
            .iter()
            .map(|id| DeploymentId::new(*id).file_stem())
            .collect();
        assert_eq!(stems.len(), ids.len());
    }
}
