//! Step completion gate.
//!
//! The gate answers "is stage step X done?" from the deployment's step
//! records plus live checks (files in the workspace, verification reports).
//! Records are first-write-wins and only cleared by an explicit
//! [`StepCompletionGate::reset_from`].

use chrono::Utc;
use launchpad_common::{
    DeploymentId, DeploymentStatus, Event, EventKind, EventSink, StepRecord, VerificationProvider,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::background::spawn_best_effort;
use crate::errors::{GateError, StoreError};
use crate::exec::{SuccessHook, Workspaces};
use crate::store::Ledger;

const AUDIT_SOURCE: &str = "gate";

/// Gate-level steps, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStep {
    Analysis,
    PlanValidated,
    IacConfig,
    Deployed,
    Verified,
}

impl StageStep {
    pub fn all() -> &'static [StageStep] {
        &[
            StageStep::Analysis,
            StageStep::PlanValidated,
            StageStep::IacConfig,
            StageStep::Deployed,
            StageStep::Verified,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStep::Analysis => "analysis",
            StageStep::PlanValidated => "plan_validated",
            StageStep::IacConfig => "iac_config",
            StageStep::Deployed => "deployed",
            StageStep::Verified => "verified",
        }
    }

    /// The step that must be complete before entering `target`.
    pub fn required_for(target: DeploymentStatus) -> Option<StageStep> {
        match target {
            DeploymentStatus::Checking => Some(StageStep::Analysis),
            DeploymentStatus::Generating => Some(StageStep::PlanValidated),
            DeploymentStatus::Deploying => Some(StageStep::IacConfig),
            DeploymentStatus::Verifying => Some(StageStep::Deployed),
            DeploymentStatus::Completed => Some(StageStep::Verified),
            _ => None,
        }
    }

    /// Steps strictly before this one.
    pub fn predecessors(&self) -> &'static [StageStep] {
        let index = StageStep::all()
            .iter()
            .position(|s| s == self)
            .unwrap_or(0);
        &StageStep::all()[..index]
    }

    /// Every step up to and including this one.
    pub fn through(&self) -> &'static [StageStep] {
        &StageStep::all()[..=self.predecessors().len()]
    }

    /// This step and every later one.
    pub fn this_and_later(&self) -> &'static [StageStep] {
        &StageStep::all()[self.predecessors().len()..]
    }
}

impl std::fmt::Display for StageStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageStep::all()
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown stage step '{}'", s))
    }
}

/// One completion criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionCheck {
    /// A record written by `mark_step_complete`.
    Recorded,
    /// A path, relative to the deployment workspace, exists.
    FileExists { path: String },
    /// The verification collaborator reports complete.
    Verification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CompletionCheck,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub step: StageStep,
    pub complete: bool,
    pub checks: Vec<CheckResult>,
}

pub struct StepCompletionGate {
    ledger: Arc<Ledger>,
    workspaces: Arc<Workspaces>,
    verifier: Arc<dyn VerificationProvider>,
    events: Arc<dyn EventSink>,
    audit: AuditTrail,
    iac_dir: String,
}

impl StepCompletionGate {
    pub fn new(
        ledger: Arc<Ledger>,
        workspaces: Arc<Workspaces>,
        verifier: Arc<dyn VerificationProvider>,
        events: Arc<dyn EventSink>,
        audit: AuditTrail,
        iac_dir: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            workspaces,
            verifier,
            events,
            audit,
            iac_dir: iac_dir.into(),
        }
    }

    /// Criteria for `step`. Recorded-only steps can't be derived from the workspace.
    pub fn checks_for(&self, step: StageStep) -> Vec<CompletionCheck> {
        match step {
            StageStep::Analysis | StageStep::PlanValidated | StageStep::Deployed => {
                vec![CompletionCheck::Recorded]
            }
            StageStep::IacConfig => vec![CompletionCheck::FileExists {
                path: format!("{}/main.tf", self.iac_dir.trim_end_matches('/')),
            }],
            StageStep::Verified => vec![CompletionCheck::Verification],
        }
    }

    pub async fn check_step_completion(
        &self,
        deployment_id: &DeploymentId,
        step: StageStep,
    ) -> Result<StepCompletion, GateError> {
        let deployment = self.ledger.get(deployment_id).await?;
        if deployment.is_step_complete(step.as_str()) {
            return Ok(StepCompletion {
                step,
                complete: true,
                checks: vec![CheckResult {
                    check: CompletionCheck::Recorded,
                    passed: true,
                    detail: None,
                }],
            });
        }

        let mut checks = Vec::new();
        for check in self.checks_for(step) {
            let result = self.evaluate(deployment_id, step, check).await?;
            checks.push(result);
        }
        let complete = !checks.is_empty() && checks.iter().all(|c| c.passed);
        Ok(StepCompletion {
            step,
            complete,
            checks,
        })
    }

    async fn evaluate(
        &self,
        deployment_id: &DeploymentId,
        step: StageStep,
        check: CompletionCheck,
    ) -> Result<CheckResult, GateError> {
        let (passed, detail) = match &check {
            CompletionCheck::Recorded => (false, Some("not recorded".to_string())),
            CompletionCheck::FileExists { path } => match self.workspaces.get(deployment_id) {
                Some(dir) => {
                    let exists = dir.join(path).exists();
                    (exists, (!exists).then(|| format!("{} not found", path)))
                }
                None => (false, Some("no workspace".to_string())),
            },
            CompletionCheck::Verification => {
                let outcome = self
                    .verifier
                    .verify(deployment_id, step.as_str())
                    .await
                    .map_err(|source| GateError::Verification {
                        step: step.as_str().to_string(),
                        source,
                    })?;
                (outcome.complete, outcome.details)
            }
        };
        Ok(CheckResult {
            check,
            passed,
            detail,
        })
    }

    /// Record `step` as complete. Repeat calls keep the first record untouched.
    ///
    /// Returns the stored record and whether this call created it.
    pub async fn mark_step_complete(
        &self,
        deployment_id: &DeploymentId,
        step: StageStep,
        metadata: serde_json::Value,
    ) -> Result<(StepRecord, bool), GateError> {
        let (record, created) = self
            .ledger
            .modify(deployment_id, |deployment| -> Result<_, StoreError> {
                if let Some(existing) = deployment.step_status.get(step.as_str())
                    && existing.complete
                {
                    return Ok((existing.clone(), false));
                }
                let record = StepRecord {
                    complete: true,
                    completed_at: Some(Utc::now()),
                    metadata,
                };
                deployment
                    .step_status
                    .insert(step.as_str().to_string(), record.clone());
                Ok((record, true))
            })
            .await?;

        if created {
            tracing::info!(deployment = %deployment_id, %step, "step marked complete");
            self.events.publish(Event::new(
                deployment_id,
                EventKind::StepMarkedComplete {
                    step: step.as_str().to_string(),
                },
            ));
            self.audit
                .info(deployment_id, AUDIT_SOURCE, format!("step {} complete", step))
                .await;
        }
        Ok((record, created))
    }

    async fn first_incomplete(
        &self,
        deployment_id: &DeploymentId,
        steps: &[StageStep],
    ) -> Result<Option<StageStep>, GateError> {
        for step in steps {
            if !self
                .check_step_completion(deployment_id, *step)
                .await?
                .complete
            {
                return Ok(Some(*step));
            }
        }
        Ok(None)
    }

    /// True iff every step strictly before `next` is complete.
    pub async fn can_proceed_to_next_step(
        &self,
        deployment_id: &DeploymentId,
        next: StageStep,
    ) -> Result<bool, GateError> {
        Ok(self
            .first_incomplete(deployment_id, next.predecessors())
            .await?
            .is_none())
    }

    /// Guard for a stage transition into `target`: the step gating `target`
    /// and every step before it must be complete.
    pub async fn guard(
        &self,
        deployment_id: &DeploymentId,
        target: DeploymentStatus,
    ) -> Result<(), GateError> {
        let Some(step) = StageStep::required_for(target) else {
            return Ok(());
        };
        match self.first_incomplete(deployment_id, step.through()).await? {
            None => Ok(()),
            Some(missing) => Err(GateError::Blocked {
                target,
                step: missing.as_str().to_string(),
            }),
        }
    }

    /// Failure-path reset: clear `step` and every later step.
    pub async fn reset_from(
        &self,
        deployment_id: &DeploymentId,
        step: StageStep,
    ) -> Result<Vec<StageStep>, GateError> {
        let cleared = self
            .ledger
            .modify(deployment_id, |deployment| -> Result<_, StoreError> {
                let mut cleared = Vec::new();
                for later in step.this_and_later() {
                    if deployment.step_status.remove(later.as_str()).is_some() {
                        cleared.push(*later);
                    }
                }
                Ok(cleared)
            })
            .await?;

        if !cleared.is_empty() {
            let names: Vec<_> = cleared.iter().map(|s| s.as_str()).collect();
            tracing::info!(deployment = %deployment_id, steps = ?names, "step records reset");
            self.audit
                .info(
                    deployment_id,
                    AUDIT_SOURCE,
                    format!("reset steps: {}", names.join(", ")),
                )
                .await;
        }
        Ok(cleared)
    }

    /// Mark steps whose live criteria now hold.
    ///
    /// Only steps with derivable checks are considered, and only once every
    /// earlier step is complete.
    pub async fn auto_complete(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Vec<StageStep>, GateError> {
        let mut marked = Vec::new();
        for step in StageStep::all() {
            let completion = self.check_step_completion(deployment_id, *step).await?;
            if completion.complete {
                let derivable = !self
                    .checks_for(*step)
                    .contains(&CompletionCheck::Recorded);
                if derivable {
                    let (_, created) = self
                        .mark_step_complete(
                            deployment_id,
                            *step,
                            serde_json::json!({"source": "auto"}),
                        )
                        .await?;
                    if created {
                        marked.push(*step);
                    }
                }
                continue;
            }
            break;
        }
        Ok(marked)
    }
}

/// Runs [`StepCompletionGate::auto_complete`] in the background after each
/// successful command.
pub struct AutoCompleter {
    gate: Arc<StepCompletionGate>,
}

impl AutoCompleter {
    pub fn new(gate: Arc<StepCompletionGate>) -> Self {
        Self { gate }
    }
}

impl SuccessHook for AutoCompleter {
    fn command_succeeded(&self, deployment_id: &DeploymentId, _command: &str) {
        let gate = self.gate.clone();
        let deployment_id = deployment_id.clone();
        spawn_best_effort("auto-complete", async move {
            gate.auto_complete(&deployment_id).await.map(|_| ())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLogStore;
    use crate::events::EventBus;
    use crate::gate::StaticVerifier;
    use crate::store::MemoryDeploymentStore;
    use launchpad_common::Deployment;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        gate: Arc<StepCompletionGate>,
        ledger: Arc<Ledger>,
        workspace: TempDir,
        id: DeploymentId,
    }

    async fn fixture(verified: bool) -> Fixture {
        let ledger = Arc::new(Ledger::new(Arc::new(MemoryDeploymentStore::new())));
        let workspace = tempfile::tempdir().unwrap();
        let workspaces = Arc::new(Workspaces::new("/unused"));
        let id = DeploymentId::new("d1");
        workspaces.register(&id, workspace.path()).unwrap();
        ledger.create(Deployment::new(id.clone())).await.unwrap();

        let gate = Arc::new(StepCompletionGate::new(
            ledger.clone(),
            workspaces,
            Arc::new(StaticVerifier::new(verified)),
            Arc::new(EventBus::default()),
            AuditTrail::new(Arc::new(MemoryLogStore::new())),
            "infra",
        ));
        Fixture {
            gate,
            ledger,
            workspace,
            id,
        }
    }

    #[tokio::test]
    async fn test_mark_step_complete_is_idempotent() {
        let fx = fixture(false).await;
        let (first, created) = fx
            .gate
            .mark_step_complete(&fx.id, StageStep::Analysis, json!({"run": 1}))
            .await
            .unwrap();
        assert!(created);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let (second, created_again) = fx
            .gate
            .mark_step_complete(&fx.id, StageStep::Analysis, json!({"run": 2}))
            .await
            .unwrap();
        assert!(!created_again);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(second.metadata, json!({"run": 1}));

        let stored = fx.ledger.get(&fx.id).await.unwrap();
        assert_eq!(stored.step_status["analysis"].completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn test_recorded_step_reports_complete() {
        let fx = fixture(false).await;
        assert!(
            !fx.gate
                .check_step_completion(&fx.id, StageStep::Deployed)
                .await
                .unwrap()
                .complete
        );
        fx.gate
            .mark_step_complete(&fx.id, StageStep::Deployed, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(
            fx.gate
                .check_step_completion(&fx.id, StageStep::Deployed)
                .await
                .unwrap()
                .complete
        );
    }

    #[tokio::test]
    async fn test_iac_config_follows_workspace_file() {
        let fx = fixture(false).await;
        let before = fx
            .gate
            .check_step_completion(&fx.id, StageStep::IacConfig)
            .await
            .unwrap();
        assert!(!before.complete);
        assert_eq!(before.checks[0].detail.as_deref(), Some("infra/main.tf not found"));

        std::fs::create_dir_all(fx.workspace.path().join("infra")).unwrap();
        std::fs::write(fx.workspace.path().join("infra/main.tf"), "# tf").unwrap();
        assert!(
            fx.gate
                .check_step_completion(&fx.id, StageStep::IacConfig)
                .await
                .unwrap()
                .complete
        );
        // Checked but not recorded.
        assert!(!fx.ledger.get(&fx.id).await.unwrap().is_step_complete("iac_config"));
    }

    #[tokio::test]
    async fn test_verified_step_consults_verifier() {
        let fx = fixture(true).await;
        assert!(
            fx.gate
                .check_step_completion(&fx.id, StageStep::Verified)
                .await
                .unwrap()
                .complete
        );
    }

    #[tokio::test]
    async fn test_guard_blocks_until_step_complete() {
        let fx = fixture(false).await;
        let err = fx
            .gate
            .guard(&fx.id, DeploymentStatus::Checking)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PREREQUISITE_NOT_MET");

        fx.gate
            .mark_step_complete(&fx.id, StageStep::Analysis, serde_json::Value::Null)
            .await
            .unwrap();
        fx.gate
            .guard(&fx.id, DeploymentStatus::Checking)
            .await
            .unwrap();
        fx.gate
            .guard(&fx.id, DeploymentStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_guard_requires_earlier_steps_recorded() {
        let fx = fixture(false).await;
        std::fs::create_dir_all(fx.workspace.path().join("infra")).unwrap();
        std::fs::write(fx.workspace.path().join("infra/main.tf"), "# tf").unwrap();

        // The file check for iac_config passes, but nothing before it is recorded.
        let err = fx
            .gate
            .guard(&fx.id, DeploymentStatus::Deploying)
            .await
            .unwrap_err();
        match err {
            GateError::Blocked { step, .. } => assert_eq!(step, "analysis"),
            other => panic!("unexpected error: {other}"),
        }

        fx.gate
            .mark_step_complete(&fx.id, StageStep::Analysis, serde_json::Value::Null)
            .await
            .unwrap();
        let err = fx
            .gate
            .guard(&fx.id, DeploymentStatus::Deploying)
            .await
            .unwrap_err();
        match err {
            GateError::Blocked { step, .. } => assert_eq!(step, "plan_validated"),
            other => panic!("unexpected error: {other}"),
        }

        fx.gate
            .mark_step_complete(&fx.id, StageStep::PlanValidated, serde_json::Value::Null)
            .await
            .unwrap();
        fx.gate
            .guard(&fx.id, DeploymentStatus::Deploying)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_can_proceed_requires_all_predecessors() {
        let fx = fixture(false).await;
        fx.gate
            .mark_step_complete(&fx.id, StageStep::Analysis, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(
            fx.gate
                .can_proceed_to_next_step(&fx.id, StageStep::PlanValidated)
                .await
                .unwrap()
        );
        assert!(
            !fx.gate
                .can_proceed_to_next_step(&fx.id, StageStep::IacConfig)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reset_from_clears_step_and_later() {
        let fx = fixture(false).await;
        for step in [StageStep::Analysis, StageStep::PlanValidated, StageStep::Deployed] {
            fx.gate
                .mark_step_complete(&fx.id, step, serde_json::Value::Null)
                .await
                .unwrap();
        }
        let cleared = fx
            .gate
            .reset_from(&fx.id, StageStep::PlanValidated)
            .await
            .unwrap();
        assert_eq!(cleared, vec![StageStep::PlanValidated, StageStep::Deployed]);

        let stored = fx.ledger.get(&fx.id).await.unwrap();
        assert!(stored.is_step_complete("analysis"));
        assert!(!stored.is_step_complete("plan_validated"));
        assert!(!stored.is_step_complete("deployed"));
    }

    #[tokio::test]
    async fn test_auto_complete_marks_derivable_steps_in_order() {
        let fx = fixture(false).await;
        std::fs::create_dir_all(fx.workspace.path().join("infra")).unwrap();
        std::fs::write(fx.workspace.path().join("infra/main.tf"), "").unwrap();

        // plan_validated is missing, so iac_config is not reached yet
        assert!(fx.gate.auto_complete(&fx.id).await.unwrap().is_empty());

        for step in [StageStep::Analysis, StageStep::PlanValidated] {
            fx.gate
                .mark_step_complete(&fx.id, step, serde_json::Value::Null)
                .await
                .unwrap();
        }
        assert_eq!(
            fx.gate.auto_complete(&fx.id).await.unwrap(),
            vec![StageStep::IacConfig]
        );
        assert!(fx.gate.auto_complete(&fx.id).await.unwrap().is_empty());
    }

    #[test]
    fn test_stage_step_ordering_helpers() {
        assert!(StageStep::Analysis.predecessors().is_empty());
        assert_eq!(
            StageStep::IacConfig.predecessors(),
            &[StageStep::Analysis, StageStep::PlanValidated]
        );
        assert_eq!(
            StageStep::PlanValidated.through(),
            &[StageStep::Analysis, StageStep::PlanValidated]
        );
        assert_eq!(
            StageStep::Deployed.this_and_later(),
            &[StageStep::Deployed, StageStep::Verified]
        );
        assert_eq!("iac_config".parse::<StageStep>().unwrap(), StageStep::IacConfig);
        assert_eq!(
            StageStep::required_for(DeploymentStatus::Completed),
            Some(StageStep::Verified)
        );
    }
}
