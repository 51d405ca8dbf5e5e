//! Project analysis: the read-only input to plan generation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Python,
    Go,
    Rust,
    Java,
    Static,
    #[default]
    Unknown,
}

impl ProjectType {
    /// Manifest file that a project of this type is expected to carry.
    pub fn manifest_file(&self) -> Option<&'static str> {
        match self {
            ProjectType::Node => Some("package.json"),
            ProjectType::Python => Some("requirements.txt"),
            ProjectType::Go => Some("go.mod"),
            ProjectType::Rust => Some("Cargo.toml"),
            ProjectType::Java => Some("pom.xml"),
            ProjectType::Static | ProjectType::Unknown => None,
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Go => "go",
            ProjectType::Rust => "rust",
            ProjectType::Java => "java",
            ProjectType::Static => "static",
            ProjectType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchitecturePattern {
    #[default]
    Monolith,
    Containerized,
    Microservices,
    Serverless,
    Static,
}

impl ArchitecturePattern {
    /// Patterns that only make sense with a container image.
    pub fn expects_container(&self) -> bool {
        matches!(
            self,
            ArchitecturePattern::Containerized | ArchitecturePattern::Microservices
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisFlags {
    pub manifest: bool,
    pub build_script: bool,
    pub test_script: bool,
    pub start_script: bool,
    pub container_file: bool,
    pub compose_file: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    #[serde(default)]
    pub project_type: ProjectType,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub flags: AnalysisFlags,
    #[serde(default)]
    pub architecture_pattern: ArchitecturePattern,
    /// Environment variables the application needs at deploy time.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Free-form notes from the analyzer, carried through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notes: BTreeMap<String, String>,
}
