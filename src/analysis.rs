//! Analysis collaborator adapters.
//!
//! The engine never inspects a project itself; these providers hand it a
//! ready-made [`ProjectAnalysis`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use launchpad_common::{AnalysisProvider, DeploymentId, ProjectAnalysis};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::exec::Workspaces;

/// File name read from the deployment workspace by [`JsonFileAnalysis`].
pub const ANALYSIS_FILE: &str = "launchpad.analysis.json";

/// Returns the same analysis for every deployment.
#[derive(Debug, Clone, Default)]
pub struct StaticAnalysis {
    analysis: ProjectAnalysis,
}

impl StaticAnalysis {
    pub fn new(analysis: ProjectAnalysis) -> Self {
        Self { analysis }
    }
}

#[async_trait]
impl AnalysisProvider for StaticAnalysis {
    async fn analyze(&self, _deployment_id: &DeploymentId) -> Result<ProjectAnalysis> {
        Ok(self.analysis.clone())
    }
}

/// Parse an analysis document (camelCase JSON).
pub async fn read_analysis(path: &Path) -> Result<ProjectAnalysis> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read analysis from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse analysis in {}", path.display()))
}

enum Source {
    Workspace(Arc<Workspaces>),
    File(PathBuf),
}

/// Reads `launchpad.analysis.json` from the deployment's workspace, or a
/// fixed file shared by every deployment.
pub struct JsonFileAnalysis {
    source: Source,
}

impl JsonFileAnalysis {
    pub fn new(workspaces: Arc<Workspaces>) -> Self {
        Self {
            source: Source::Workspace(workspaces),
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
        }
    }
}

#[async_trait]
impl AnalysisProvider for JsonFileAnalysis {
    async fn analyze(&self, deployment_id: &DeploymentId) -> Result<ProjectAnalysis> {
        let path = match self.source {
            Source::File(ref path) => path.clone(),
            Source::Workspace(ref workspaces) => workspaces
                .ensure(deployment_id)
                .await
                .with_context(|| format!("No workspace for deployment {}", deployment_id))?
                .join(ANALYSIS_FILE),
        };
        let analysis = read_analysis(&path).await?;
        tracing::debug!(
            deployment = %deployment_id,
            project_type = %analysis.project_type,
            "loaded project analysis"
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_common::ProjectType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_analysis_returns_input() {
        let analysis = ProjectAnalysis {
            project_type: ProjectType::Go,
            ..Default::default()
        };
        let provider = StaticAnalysis::new(analysis.clone());
        assert_eq!(
            provider.analyze(&DeploymentId::new("d1")).await.unwrap(),
            analysis
        );
    }

    #[tokio::test]
    async fn test_json_file_analysis_reads_workspace_file() {
        let root = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(
            project.path().join(ANALYSIS_FILE),
            r#"{"projectType":"python","flags":{"manifest":true},"requiredEnv":["DATABASE_URL"]}"#,
        )
        .unwrap();
        let workspaces = Arc::new(Workspaces::new(root.path()));
        let id = DeploymentId::new("d1");
        workspaces.register(&id, project.path()).unwrap();

        let analysis = JsonFileAnalysis::new(workspaces)
            .analyze(&id)
            .await
            .unwrap();
        assert_eq!(analysis.project_type, ProjectType::Python);
        assert!(analysis.flags.manifest);
        assert_eq!(analysis.required_env, vec!["DATABASE_URL"]);
    }

    #[tokio::test]
    async fn test_fixed_path_ignores_workspace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"projectType":"rust"}"#).unwrap();
        let analysis = JsonFileAnalysis::at_path(&path)
            .analyze(&DeploymentId::new("any"))
            .await
            .unwrap();
        assert_eq!(analysis.project_type, ProjectType::Rust);
    }

    #[tokio::test]
    async fn test_missing_analysis_file_names_path() {
        let root = TempDir::new().unwrap();
        let provider = JsonFileAnalysis::new(Arc::new(Workspaces::new(root.path())));
        let err = provider.analyze(&DeploymentId::new("d1")).await.unwrap_err();
        assert!(format!("{:#}", err).contains(ANALYSIS_FILE));
    }
}
