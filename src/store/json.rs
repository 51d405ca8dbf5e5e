use anyhow::{Context, Result};
use async_trait::async_trait;
use launchpad_common::{Deployment, DeploymentId, DeploymentStore};
use std::path::{Path, PathBuf};

/// One pretty-printed JSON file per deployment.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-write leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct JsonDeploymentStore {
    dir: PathBuf,
}

impl JsonDeploymentStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn file_for(&self, id: &DeploymentId) -> PathBuf {
        self.dir.join(format!("{}.json", id.file_stem()))
    }
}

#[async_trait]
impl DeploymentStore for JsonDeploymentStore {
    async fn load(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        let path = self.file_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let deployment: Deployment = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(deployment))
    }

    async fn save(&self, deployment: &Deployment) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.file_for(&deployment.id);
        let tmp = path.with_extension("json.tmp");
        let content =
            serde_json::to_string_pretty(deployment).context("Failed to serialize deployment")?;
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeploymentId>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // The file name is a sanitized form of the id; the record holds the real one.
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Deployment>(&content) {
                Ok(deployment) => ids.push(deployment.id),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable deployment"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_common::DeploymentStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_load_and_list() {
        let dir = tempdir().unwrap();
        let store = JsonDeploymentStore::new(&dir.path().join("deployments"));

        let mut deployment = Deployment::new(DeploymentId::new("web/prod"));
        deployment.status = DeploymentStatus::Analyzing;
        store.save(&deployment).await.unwrap();
        store
            .save(&Deployment::new(DeploymentId::new("api")))
            .await
            .unwrap();

        let loaded = store
            .load(&DeploymentId::new("web/prod"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, deployment);

        let ids = store.list().await.unwrap();
        assert_eq!(
            ids,
            vec![DeploymentId::new("api"), DeploymentId::new("web/prod")]
        );
        assert!(!store.file_for(&deployment.id).with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_similar_ids_keep_separate_records() {
        let dir = tempdir().unwrap();
        let store = JsonDeploymentStore::new(dir.path());
        let mut slashed = Deployment::new(DeploymentId::new("a/b"));
        slashed.status = DeploymentStatus::Checking;
        store.save(&slashed).await.unwrap();
        store
            .save(&Deployment::new(DeploymentId::new("a_b")))
            .await
            .unwrap();

        let loaded = store.load(&DeploymentId::new("a/b")).await.unwrap().unwrap();
        assert_eq!(loaded.id, DeploymentId::new("a/b"));
        assert_eq!(loaded.status, DeploymentStatus::Checking);
        let loaded = store.load(&DeploymentId::new("a_b")).await.unwrap().unwrap();
        assert_eq!(loaded.id, DeploymentId::new("a_b"));
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = JsonDeploymentStore::new(dir.path());
        assert!(store.load(&DeploymentId::new("x")).await.unwrap().is_none());
        assert!(JsonDeploymentStore::new(&dir.path().join("absent"))
            .list()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = JsonDeploymentStore::new(dir.path());
        let id = DeploymentId::new("bad");
        std::fs::write(store.file_for(&id), "{ not json").unwrap();
        assert!(store.load(&id).await.is_err());
    }
}
