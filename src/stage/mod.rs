//! Deployment stage state machine.
//!
//! The adjacency table below is the complete set of legal status changes.
//! `failed` carries retry edges back into the pipeline; `completed` and
//! `cancelled` are terminal and archive the deployment.

use chrono::Utc;
use launchpad_common::{
    Deployment, DeploymentId, DeploymentStatus, EventKind, EventSink, Event, StatusChange,
};
use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::errors::{StoreError, TransitionError};
use crate::store::Ledger;

const AUDIT_SOURCE: &str = "stage";

/// Statuses reachable from `from` in one transition.
pub fn allowed_next(from: DeploymentStatus) -> &'static [DeploymentStatus] {
    use DeploymentStatus::*;
    match from {
        Pending => &[Analyzing, Cancelled],
        Analyzing => &[Checking, Failed, Cancelled],
        Checking => &[Generating, Failed, Cancelled],
        Generating => &[Deploying, Failed, Cancelled],
        Deploying => &[Verifying, Failed, Cancelled],
        Verifying => &[Completed, Failed],
        Failed => &[Checking, Generating, Verifying],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    allowed_next(from).contains(&to)
}

/// Authoritative owner of deployment status and its history.
pub struct StageMachine {
    ledger: Arc<Ledger>,
    events: Arc<dyn EventSink>,
    audit: AuditTrail,
}

impl StageMachine {
    pub fn new(ledger: Arc<Ledger>, events: Arc<dyn EventSink>, audit: AuditTrail) -> Self {
        Self {
            ledger,
            events,
            audit,
        }
    }

    /// Create a deployment in `pending`.
    pub async fn create(&self, id: DeploymentId) -> Result<Deployment, StoreError> {
        let deployment = self.ledger.create(Deployment::new(id)).await?;
        self.audit
            .info(&deployment.id, AUDIT_SOURCE, "deployment created (pending)")
            .await;
        tracing::info!(deployment = %deployment.id, "deployment created");
        Ok(deployment)
    }

    pub async fn get(&self, id: &DeploymentId) -> Result<Deployment, StoreError> {
        self.ledger.get(id).await
    }

    pub async fn status(&self, id: &DeploymentId) -> Result<DeploymentStatus, StoreError> {
        Ok(self.ledger.get(id).await?.status)
    }

    pub async fn history(&self, id: &DeploymentId) -> Result<Vec<StatusChange>, StoreError> {
        Ok(self.ledger.get(id).await?.status_history)
    }

    /// Move `id` to `target`.
    ///
    /// An illegal target fails with [`TransitionError::Invalid`] naming the
    /// allowed set, and the stored record is left exactly as it was.
    pub async fn transition(
        &self,
        id: &DeploymentId,
        target: DeploymentStatus,
        metadata: serde_json::Value,
    ) -> Result<Deployment, TransitionError> {
        let (from, updated) = self
            .ledger
            .modify(id, |deployment| {
                let from = deployment.status;
                if !can_transition(from, target) {
                    return Err(TransitionError::Invalid {
                        deployment_id: deployment.id.clone(),
                        from,
                        to: target,
                        allowed: allowed_next(from).to_vec(),
                    });
                }

                let now = Utc::now();
                deployment.previous_status = Some(from);
                deployment.status = target;
                deployment.status_history.push(StatusChange {
                    status: target,
                    timestamp: now,
                    metadata: metadata.clone(),
                });
                if target.is_terminal() {
                    deployment.archived_at = Some(now);
                }
                Ok((from, deployment.clone()))
            })
            .await
            .inspect_err(|e| tracing::debug!(deployment = %id, error = %e, "transition rejected"))?;

        tracing::info!(deployment = %id, %from, to = %target, "stage changed");
        self.events.publish(Event::new(
            id,
            EventKind::StageChanged {
                from,
                to: target,
                metadata,
            },
        ));
        self.audit
            .info(id, AUDIT_SOURCE, format!("{} -> {}", from, target))
            .await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLogStore;
    use crate::events::EventBus;
    use crate::store::MemoryDeploymentStore;
    use serde_json::json;

    fn machine() -> (StageMachine, EventBus) {
        let bus = EventBus::default();
        let machine = StageMachine::new(
            Arc::new(Ledger::new(Arc::new(MemoryDeploymentStore::new()))),
            Arc::new(bus.clone()),
            AuditTrail::new(Arc::new(MemoryLogStore::new())),
        );
        (machine, bus)
    }

    /// Walk a fresh deployment to `status` along legal edges.
    async fn deployment_in(machine: &StageMachine, status: DeploymentStatus) -> DeploymentId {
        use DeploymentStatus::*;
        let id = DeploymentId::generate();
        machine.create(id.clone()).await.unwrap();
        let path: &[DeploymentStatus] = match status {
            Pending => &[],
            Analyzing => &[Analyzing],
            Checking => &[Analyzing, Checking],
            Generating => &[Analyzing, Checking, Generating],
            Deploying => &[Analyzing, Checking, Generating, Deploying],
            Verifying => &[Analyzing, Checking, Generating, Deploying, Verifying],
            Completed => &[Analyzing, Checking, Generating, Deploying, Verifying, Completed],
            Failed => &[Analyzing, Failed],
            Cancelled => &[Cancelled],
        };
        for step in path {
            machine
                .transition(&id, *step, serde_json::Value::Null)
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_every_illegal_transition_is_rejected_without_change() {
        let (machine, _bus) = machine();
        for &from in DeploymentStatus::all() {
            for &to in DeploymentStatus::all() {
                if can_transition(from, to) {
                    continue;
                }
                let id = deployment_in(&machine, from).await;
                let before = machine.get(&id).await.unwrap();

                let err = machine
                    .transition(&id, to, serde_json::Value::Null)
                    .await
                    .unwrap_err();
                match err {
                    TransitionError::Invalid { allowed, .. } => {
                        assert_eq!(allowed, allowed_next(from).to_vec())
                    }
                    other => panic!("{from} -> {to}: unexpected {other:?}"),
                }
                assert_eq!(machine.get(&id).await.unwrap(), before, "{from} -> {to}");
            }
        }
    }

    #[tokio::test]
    async fn test_transition_records_history_and_publishes() {
        let (machine, bus) = machine();
        let mut rx = bus.subscribe();
        let id = DeploymentId::new("d1");
        machine.create(id.clone()).await.unwrap();

        let updated = machine
            .transition(&id, DeploymentStatus::Analyzing, json!({"by": "test"}))
            .await
            .unwrap();

        assert_eq!(updated.status, DeploymentStatus::Analyzing);
        assert_eq!(updated.previous_status, Some(DeploymentStatus::Pending));
        assert_eq!(updated.status_history.len(), 2);
        assert_eq!(updated.status_history[1].metadata["by"], "test");

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            EventKind::StageChanged {
                from: DeploymentStatus::Pending,
                to: DeploymentStatus::Analyzing,
                metadata: json!({"by": "test"}),
            }
        );
    }

    #[tokio::test]
    async fn test_terminal_status_archives() {
        let (machine, _bus) = machine();
        let id = deployment_in(&machine, DeploymentStatus::Completed).await;
        let deployment = machine.get(&id).await.unwrap();
        assert!(deployment.is_archived());
        assert_eq!(deployment.status_history.len(), 7);

        let cancelled = deployment_in(&machine, DeploymentStatus::Cancelled).await;
        assert!(machine.get(&cancelled).await.unwrap().is_archived());
    }

    #[tokio::test]
    async fn test_failed_is_not_archived_and_can_retry() {
        let (machine, _bus) = machine();
        let id = deployment_in(&machine, DeploymentStatus::Failed).await;
        assert!(!machine.get(&id).await.unwrap().is_archived());

        machine
            .transition(&id, DeploymentStatus::Checking, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(
            machine.status(&id).await.unwrap(),
            DeploymentStatus::Checking
        );
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_found() {
        let (machine, _bus) = machine();
        let err = machine
            .transition(
                &DeploymentId::new("missing"),
                DeploymentStatus::Analyzing,
                serde_json::Value::Null,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_adjacency_matches_lifecycle() {
        assert!(can_transition(DeploymentStatus::Pending, DeploymentStatus::Analyzing));
        assert!(!can_transition(DeploymentStatus::Pending, DeploymentStatus::Deploying));
        assert!(!can_transition(DeploymentStatus::Verifying, DeploymentStatus::Cancelled));
        for status in [DeploymentStatus::Completed, DeploymentStatus::Cancelled] {
            assert!(allowed_next(status).is_empty());
        }
    }
}
