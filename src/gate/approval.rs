//! Approval collaborators.
//!
//! The executor bounds every wait, so providers here may wait indefinitely.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};
use launchpad_common::{ApprovalDecision, ApprovalProvider, DeploymentId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;

/// Approves everything immediately (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalProvider for AutoApprove {
    async fn await_decision(
        &self,
        _deployment_id: &DeploymentId,
        _step_id: u32,
        _step_name: &str,
    ) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Approved)
    }
}

type ApprovalKey = (DeploymentId, u32);

#[derive(Default)]
struct BoardState {
    waiting: HashMap<ApprovalKey, oneshot::Sender<ApprovalDecision>>,
    // Decisions that arrived before their wait started.
    early: HashMap<ApprovalKey, ApprovalDecision>,
    // Waits that ended undecided. The next decision for one of these is stale.
    lapsed: HashSet<ApprovalKey>,
}

/// Frees a wait's slot however the wait ends.
struct WaitSlot<'a> {
    board: &'a ApprovalBoard,
    key: ApprovalKey,
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.board.lock();
        if state.waiting.remove(&self.key).is_some() {
            state.lapsed.insert(self.key.clone());
        }
    }
}

/// Approvals resolved by an external party (an API handler, another task).
///
/// Each `(deployment, step)` wait is a oneshot signal; [`ApprovalBoard::resolve`]
/// completes it. A decision sent before the wait starts is kept until claimed;
/// one sent after a wait gave up is dropped and never carries over to the
/// next request for the same step.
#[derive(Default)]
pub struct ApprovalBoard {
    state: Mutex<BoardState>,
}

impl ApprovalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Steps currently waiting for a decision.
    pub fn pending(&self) -> Vec<(DeploymentId, u32)> {
        let state = self.lock();
        let mut keys: Vec<_> = state
            .waiting
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Deliver a decision. Returns true when a waiter received it.
    pub fn resolve(
        &self,
        deployment_id: &DeploymentId,
        step_id: u32,
        decision: ApprovalDecision,
    ) -> bool {
        let key = (deployment_id.clone(), step_id);
        let mut state = self.lock();
        if let Some(tx) = state.waiting.remove(&key) {
            // Fails only when the waiter is already giving up.
            return tx.send(decision).is_ok();
        }
        if state.lapsed.remove(&key) {
            tracing::debug!(deployment = %deployment_id, step_id, "dropping decision for a lapsed approval");
            return false;
        }
        state.early.insert(key, decision);
        false
    }
}

#[async_trait]
impl ApprovalProvider for ApprovalBoard {
    async fn await_decision(
        &self,
        deployment_id: &DeploymentId,
        step_id: u32,
        _step_name: &str,
    ) -> Result<ApprovalDecision> {
        let key = (deployment_id.clone(), step_id);
        let rx = {
            let mut state = self.lock();
            state.lapsed.remove(&key);
            if let Some(decision) = state.early.remove(&key) {
                return Ok(decision);
            }
            let (tx, rx) = oneshot::channel();
            state.waiting.insert(key.clone(), tx);
            rx
        };
        let _slot = WaitSlot { board: self, key };
        rx.await
            .context("approval board dropped the pending request")
    }
}

/// Asks on the terminal, in the style of the interactive run gate.
#[derive(Debug, Default)]
pub struct PromptApproval {
    approve_all: AtomicBool,
}

impl PromptApproval {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalProvider for PromptApproval {
    async fn await_decision(
        &self,
        deployment_id: &DeploymentId,
        step_id: u32,
        step_name: &str,
    ) -> Result<ApprovalDecision> {
        if self.approve_all.load(Ordering::SeqCst) {
            return Ok(ApprovalDecision::Approved);
        }

        let prompt = format!(
            "Deployment {}: run step {} ({})?",
            deployment_id, step_id, step_name
        );
        let selection = tokio::task::spawn_blocking(move || {
            let options = &[
                "Yes, run this step",
                "Yes, and approve remaining steps",
                "No, reject",
            ];
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(options)
                .default(0)
                .interact()
        })
        .await
        .context("approval prompt task failed")?
        .context("approval prompt failed")?;

        match selection {
            0 => Ok(ApprovalDecision::Approved),
            1 => {
                self.approve_all.store(true, Ordering::SeqCst);
                Ok(ApprovalDecision::Approved)
            }
            _ => Ok(ApprovalDecision::Rejected {
                reason: Some("rejected at prompt".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_auto_approve() {
        let decision = AutoApprove
            .await_decision(&DeploymentId::new("d1"), 1, "IaC Apply")
            .await
            .unwrap();
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn test_board_resolves_waiter() {
        let board = Arc::new(ApprovalBoard::new());
        let id = DeploymentId::new("d1");

        let waiter = {
            let board = board.clone();
            let id = id.clone();
            tokio::spawn(async move { board.await_decision(&id, 6, "IaC Apply").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(board.pending(), vec![(id.clone(), 6)]);

        assert!(board.resolve(
            &id,
            6,
            ApprovalDecision::Rejected {
                reason: Some("freeze".into())
            }
        ));
        let decision = waiter.await.unwrap().unwrap();
        assert!(!decision.is_approved());
        assert!(board.pending().is_empty());
    }

    #[tokio::test]
    async fn test_board_keeps_early_decision() {
        let board = ApprovalBoard::new();
        let id = DeploymentId::new("d1");
        assert!(!board.resolve(&id, 2, ApprovalDecision::Approved));
        let decision = board.await_decision(&id, 2, "IaC Apply").await.unwrap();
        assert!(decision.is_approved());
    }

    #[tokio::test]
    async fn test_board_drops_decision_after_wait_lapses() {
        let board = ApprovalBoard::new();
        let id = DeploymentId::new("d1");

        let first = tokio::time::timeout(
            Duration::from_millis(50),
            board.await_decision(&id, 6, "IaC Apply"),
        )
        .await;
        assert!(first.is_err());
        assert!(board.pending().is_empty());
        assert!(board.lock().waiting.is_empty());

        assert!(!board.resolve(&id, 6, ApprovalDecision::Approved));

        // A later request for the same step needs its own decision.
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            board.await_decision(&id, 6, "IaC Apply"),
        )
        .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_board_accepts_decision_for_new_wait_after_lapse() {
        let board = Arc::new(ApprovalBoard::new());
        let id = DeploymentId::new("d1");
        let lapsed = tokio::time::timeout(
            Duration::from_millis(20),
            board.await_decision(&id, 6, "IaC Apply"),
        )
        .await;
        assert!(lapsed.is_err());

        let waiter = {
            let board = board.clone();
            let id = id.clone();
            tokio::spawn(async move { board.await_decision(&id, 6, "IaC Apply").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(board.resolve(&id, 6, ApprovalDecision::Approved));
        assert!(waiter.await.unwrap().unwrap().is_approved());
    }

    #[tokio::test]
    async fn test_board_keys_are_per_step() {
        let board = Arc::new(ApprovalBoard::new());
        let id = DeploymentId::new("d1");
        board.resolve(&id, 1, ApprovalDecision::Approved);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            board.await_decision(&id, 2, "other"),
        )
        .await;
        assert!(result.is_err());
    }
}
