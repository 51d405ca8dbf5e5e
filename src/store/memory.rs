use anyhow::Result;
use async_trait::async_trait;
use launchpad_common::{Deployment, DeploymentId, DeploymentStore};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    deployments: Mutex<BTreeMap<DeploymentId, Deployment>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn load(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        Ok(self.deployments.lock().await.get(id).cloned())
    }

    async fn save(&self, deployment: &Deployment) -> Result<()> {
        self.deployments
            .lock()
            .await
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeploymentId>> {
        Ok(self.deployments.lock().await.keys().cloned().collect())
    }
}
