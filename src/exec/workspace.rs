//! Deployment → working directory registry.
//!
//! Each deployment owns exactly one directory. Directories are either bound
//! explicitly with [`Workspaces::register`] (e.g. the project being deployed)
//! or created on first use under the managed root. Only managed directories are
//! deleted on release.

use launchpad_common::DeploymentId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::CommandError;

#[derive(Debug, Clone)]
struct Binding {
    path: PathBuf,
    managed: bool,
}

#[derive(Debug)]
pub struct Workspaces {
    root: PathBuf,
    bindings: Mutex<HashMap<DeploymentId, Binding>>,
}

impl Workspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeploymentId, Binding>> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind an existing directory to a deployment.
    ///
    /// Rebinding the same pair is a no-op; binding a directory owned by a
    /// different deployment fails.
    pub fn register(&self, deployment_id: &DeploymentId, dir: &Path) -> Result<(), CommandError> {
        let mut bindings = self.lock();
        if let Some((owner, _)) = bindings
            .iter()
            .find(|(owner, b)| b.path == dir && *owner != deployment_id)
        {
            return Err(CommandError::WorkspaceInUse {
                path: dir.display().to_string(),
                owner: owner.clone(),
            });
        }
        bindings.insert(
            deployment_id.clone(),
            Binding {
                path: dir.to_path_buf(),
                managed: false,
            },
        );
        Ok(())
    }

    pub fn get(&self, deployment_id: &DeploymentId) -> Option<PathBuf> {
        self.lock().get(deployment_id).map(|b| b.path.clone())
    }

    /// The deployment's directory, creating a managed one on first use.
    pub async fn ensure(&self, deployment_id: &DeploymentId) -> std::io::Result<PathBuf> {
        let path = {
            let mut bindings = self.lock();
            bindings
                .entry(deployment_id.clone())
                .or_insert_with(|| Binding {
                    path: self.root.join(deployment_id.file_stem()),
                    managed: true,
                })
                .path
                .clone()
        };
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Forget the binding; managed directories are removed from disk.
    pub async fn release(&self, deployment_id: &DeploymentId) -> std::io::Result<()> {
        let binding = self.lock().remove(deployment_id);
        if let Some(Binding {
            path,
            managed: true,
        }) = binding
        {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_ensure_creates_managed_dir_once() {
        let dir = tempdir().unwrap();
        let workspaces = Workspaces::new(dir.path());
        let id = DeploymentId::new("dep-1");

        let first = workspaces.ensure(&id).await.unwrap();
        let second = workspaces.ensure(&id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_release_removes_only_managed_dirs() {
        let root = tempdir().unwrap();
        let project = tempdir().unwrap();
        let workspaces = Workspaces::new(root.path());
        let managed = DeploymentId::new("managed");
        let bound = DeploymentId::new("bound");

        let managed_dir = workspaces.ensure(&managed).await.unwrap();
        workspaces.register(&bound, project.path()).unwrap();

        workspaces.release(&managed).await.unwrap();
        workspaces.release(&bound).await.unwrap();

        assert!(!managed_dir.exists());
        assert!(project.path().exists());
        assert!(workspaces.get(&bound).is_none());
    }

    #[test]
    fn test_register_rejects_shared_directory() {
        let project = tempdir().unwrap();
        let workspaces = Workspaces::new("/unused");
        let a = DeploymentId::new("a");
        let b = DeploymentId::new("b");

        workspaces.register(&a, project.path()).unwrap();
        workspaces.register(&a, project.path()).unwrap();
        let err = workspaces.register(&b, project.path()).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }
}
