//! Deployment record persistence.
//!
//! [`Ledger`] is the only writer the engine uses. It serializes
//! read-modify-write cycles per deployment and only saves when the mutation
//! succeeds, so a rejected change never reaches the backing store.

pub mod json;
pub mod memory;

pub use json::JsonDeploymentStore;
pub use memory::MemoryDeploymentStore;

use launchpad_common::{Deployment, DeploymentId, DeploymentStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::StoreError;

type LockMap = Mutex<HashMap<DeploymentId, Arc<tokio::sync::Mutex<()>>>>;

pub struct Ledger {
    store: Arc<dyn DeploymentStore>,
    locks: LockMap,
}

/// A deployment's write lock, removed from the map once nobody holds or
/// waits for it.
struct Lease<'a> {
    locks: &'a LockMap,
    id: DeploymentId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only handed out under the map lock: two means the map and us.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lease(&self, id: &DeploymentId) -> Lease<'_> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Lease {
            locks: &self.locks,
            id: id.clone(),
            lock: locks.entry(id.clone()).or_default().clone(),
        }
    }

    pub async fn create(&self, deployment: Deployment) -> Result<Deployment, StoreError> {
        let lease = self.lease(&deployment.id);
        let _held = lease.lock.lock().await;
        if self
            .store
            .load(&deployment.id)
            .await
            .map_err(StoreError::Backend)?
            .is_some()
        {
            return Err(StoreError::AlreadyExists(deployment.id.clone()));
        }
        self.store
            .save(&deployment)
            .await
            .map_err(StoreError::Backend)?;
        Ok(deployment)
    }

    pub async fn find(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        self.store.load(id).await.map_err(StoreError::Backend)
    }

    pub async fn get(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.find(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub async fn list(&self) -> Result<Vec<DeploymentId>, StoreError> {
        self.store.list().await.map_err(StoreError::Backend)
    }

    /// Apply `f` to the stored deployment and persist the result.
    ///
    /// `f` works on a copy; when it returns `Err` nothing is written.
    pub async fn modify<T, E, F>(&self, id: &DeploymentId, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Deployment) -> Result<T, E>,
        E: From<StoreError>,
    {
        let lease = self.lease(id);
        let _held = lease.lock.lock().await;

        let mut deployment = self.get(id).await?;
        let value = f(&mut deployment)?;
        self.store
            .save(&deployment)
            .await
            .map_err(StoreError::Backend)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_common::DeploymentStatus;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryDeploymentStore::new()))
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let ledger = ledger();
        let id = DeploymentId::new("d1");
        ledger.create(Deployment::new(id.clone())).await.unwrap();
        let err = ledger.create(Deployment::new(id)).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_modify_error_leaves_record_untouched() {
        let ledger = ledger();
        let id = DeploymentId::new("d1");
        ledger.create(Deployment::new(id.clone())).await.unwrap();

        let result: Result<(), StoreError> = ledger
            .modify(&id, |d| {
                d.status = DeploymentStatus::Failed;
                Err(StoreError::NotFound(DeploymentId::new("simulated")))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(
            ledger.get(&id).await.unwrap().status,
            DeploymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_modify_missing_is_not_found() {
        let ledger = ledger();
        let result: Result<(), StoreError> =
            ledger.modify(&DeploymentId::new("nope"), |_| Ok(())).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_modifications_are_serialized() {
        let ledger = Arc::new(ledger());
        let id = DeploymentId::new("d1");
        ledger.create(Deployment::new(id.clone())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .modify(&id, |d| -> Result<(), StoreError> {
                        d.step_status.insert(
                            format!("step-{i}"),
                            launchpad_common::StepRecord {
                                complete: true,
                                completed_at: None,
                                metadata: serde_json::Value::Null,
                            },
                        );
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.get(&id).await.unwrap().step_status.len(), 10);
        assert!(ledger.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_locks_are_released_after_use() {
        let ledger = ledger();
        let id = DeploymentId::new("d1");
        ledger.create(Deployment::new(id.clone())).await.unwrap();
        ledger
            .modify(&id, |d| -> Result<(), StoreError> {
                d.status = DeploymentStatus::Analyzing;
                Ok(())
            })
            .await
            .unwrap();
        let _: Result<(), StoreError> = ledger.modify(&DeploymentId::new("nope"), |_| Ok(())).await;
        assert!(ledger.locks.lock().unwrap().is_empty());
    }
}
