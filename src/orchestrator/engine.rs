//! End-to-end deployment driver.
//!
//! The orchestrator owns every registry keyed by deployment: the ledger, the
//! workspace bindings (through the command service) and the active runs. A run
//! walks the stage machine from wherever the deployment currently is, and any
//! error on the way becomes a `failed` transition carrying the error code.

use launchpad_common::{
    AnalysisProvider, Deployment, DeploymentId, DeploymentStatus, Event, EventKind, EventSink,
    ProjectAnalysis,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::builder::OrchestratorBuilder;
use crate::audit::AuditTrail;
use crate::errors::{EngineError, PlanError};
use crate::events::EventBus;
use crate::exec::{CommandOutput, CommandService, ExecOptions, Workspaces};
use crate::gate::{StageStep, StepCompletionGate};
use crate::plan::{
    ExecuteOptions, ExecutionState, PlanExecutor, PotentialIssue, RollbackEntry, Step,
    TimeEstimate, estimate_total_time, generate, generate_rollback_plan,
    identify_potential_issues, validate_plan,
};
use crate::stage::{StageMachine, can_transition};
use crate::store::Ledger;

const AUDIT_SOURCE: &str = "orchestrator";

/// A validated plan with its advisory extras.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentPlan {
    pub steps: Vec<Step>,
    pub rollback: Vec<RollbackEntry>,
    pub estimate: TimeEstimate,
    pub issues: Vec<PotentialIssue>,
}

impl DeploymentPlan {
    /// Generate and validate. `workspace` is consulted for `.env` when
    /// looking for unresolved variables.
    pub fn build(analysis: &ProjectAnalysis, workspace: Option<&Path>) -> Result<Self, PlanError> {
        let steps = generate(analysis);
        validate_plan(&steps, analysis)?;
        Ok(Self {
            rollback: generate_rollback_plan(&steps),
            estimate: estimate_total_time(&steps),
            issues: identify_potential_issues(analysis, workspace),
            steps,
        })
    }
}

/// How a run ended. `error` is set whenever the deployment did not complete.
#[derive(Debug)]
pub struct RunOutcome {
    pub deployment: Deployment,
    pub plan: Option<DeploymentPlan>,
    pub execution: Option<ExecutionState>,
    pub error: Option<EngineError>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.deployment.status == DeploymentStatus::Completed
    }
}

/// What a run accumulates as it moves through the stages.
#[derive(Default)]
struct RunContext {
    analysis: Option<ProjectAnalysis>,
    plan: Option<DeploymentPlan>,
    execution: Option<ExecutionState>,
}

pub struct Orchestrator {
    pub(super) ledger: Arc<Ledger>,
    pub(super) stages: StageMachine,
    pub(super) gate: Arc<StepCompletionGate>,
    pub(super) commands: Arc<CommandService>,
    pub(super) executor: PlanExecutor,
    pub(super) analysis: Arc<dyn AnalysisProvider>,
    pub(super) workspaces: Arc<Workspaces>,
    pub(super) bus: EventBus,
    pub(super) audit: AuditTrail,
    pub(super) execute: ExecuteOptions,
    pub(super) runs: Mutex<HashMap<DeploymentId, CancellationToken>>,
}

/// Clears the active-run slot however the run ends.
struct RunGuard<'a> {
    runs: &'a Mutex<HashMap<DeploymentId, CancellationToken>>,
    deployment_id: DeploymentId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut runs = self
            .runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        runs.remove(&self.deployment_id);
    }
}

/// Where a failed deployment re-enters the pipeline, and the gate step that
/// must be redone first.
fn retry_route(failed_in: DeploymentStatus) -> (DeploymentStatus, StageStep) {
    use DeploymentStatus::*;
    match failed_in {
        Pending | Analyzing => (Checking, StageStep::Analysis),
        Checking => (Checking, StageStep::PlanValidated),
        Generating => (Generating, StageStep::IacConfig),
        Deploying => (Generating, StageStep::Deployed),
        _ => (Verifying, StageStep::Verified),
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn stages(&self) -> &StageMachine {
        &self.stages
    }

    pub fn gate(&self) -> &Arc<StepCompletionGate> {
        &self.gate
    }

    pub fn commands(&self) -> &Arc<CommandService> {
        &self.commands
    }

    pub fn execute_options(&self) -> &ExecuteOptions {
        &self.execute
    }

    /// Create a deployment, optionally bound to an existing directory.
    pub async fn create_deployment(
        &self,
        id: Option<DeploymentId>,
        workspace: Option<&Path>,
    ) -> Result<Deployment, EngineError> {
        let id = id.unwrap_or_else(DeploymentId::generate);
        if let Some(dir) = workspace {
            self.workspaces.register(&id, dir)?;
        }
        match self.stages.create(id.clone()).await {
            Ok(deployment) => Ok(deployment),
            Err(e) => {
                if workspace.is_some() {
                    let _ = self.workspaces.release(&id).await;
                }
                Err(e.into())
            }
        }
    }

    /// Bind a directory to an existing deployment (e.g. in a new process).
    pub fn attach_workspace(&self, id: &DeploymentId, dir: &Path) -> Result<(), EngineError> {
        self.workspaces.register(id, dir)?;
        Ok(())
    }

    /// Forget the deployment's workspace; managed directories are deleted.
    pub async fn release_workspace(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.workspaces
            .release(id)
            .await
            .map_err(|e| EngineError::Validation(format!("failed to release workspace: {}", e)))
    }

    pub async fn get(&self, id: &DeploymentId) -> Result<Deployment, EngineError> {
        Ok(self.ledger.get(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<DeploymentId>, EngineError> {
        Ok(self.ledger.list().await?)
    }

    pub fn is_running(&self, id: &DeploymentId) -> bool {
        self.runs
            .lock()
            .map(|runs| runs.contains_key(id))
            .unwrap_or(false)
    }

    /// Run an ad-hoc command in the deployment's workspace.
    pub async fn exec(
        &self,
        id: &DeploymentId,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandOutput, EngineError> {
        self.ledger.get(id).await?;
        Ok(self.commands.run(id, command, opts).await?)
    }

    /// Drive the deployment to a terminal status.
    ///
    /// Returns `Err` only when the run could not start (unknown deployment,
    /// another run in progress, nothing left to run). Failures during the run
    /// are transitions to `failed` reported through [`RunOutcome::error`].
    pub async fn run(&self, id: &DeploymentId) -> Result<RunOutcome, EngineError> {
        let token = CancellationToken::new();
        {
            let mut runs = self
                .runs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if runs.contains_key(id) {
                return Err(PlanError::Conflict {
                    deployment_id: id.clone(),
                }
                .into());
            }
            runs.insert(id.clone(), token.clone());
        }
        let _guard = RunGuard {
            runs: &self.runs,
            deployment_id: id.clone(),
        };

        let status = self.stages.status(id).await?;
        match status {
            DeploymentStatus::Failed | DeploymentStatus::Cancelled => {
                return Err(EngineError::Validation(format!(
                    "deployment {} is {}; nothing to run",
                    id, status
                )));
            }
            DeploymentStatus::Completed => {
                return Ok(RunOutcome {
                    deployment: self.ledger.get(id).await?,
                    plan: None,
                    execution: None,
                    error: None,
                });
            }
            _ => {}
        }

        tracing::info!(deployment = %id, from = %status, "run started");
        let mut ctx = RunContext::default();
        let result = self.drive(id, &token, &mut ctx).await;

        let error = match result {
            Ok(()) => None,
            Err(error) => {
                self.settle_failure(id, &error, ctx.execution.as_ref())
                    .await;
                Some(error)
            }
        };

        Ok(RunOutcome {
            deployment: self.ledger.get(id).await?,
            plan: ctx.plan,
            execution: ctx.execution,
            error,
        })
    }

    async fn drive(
        &self,
        id: &DeploymentId,
        token: &CancellationToken,
        ctx: &mut RunContext,
    ) -> Result<(), EngineError> {
        loop {
            if token.is_cancelled() {
                return Err(PlanError::Cancelled {
                    deployment_id: id.clone(),
                }
                .into());
            }

            let status = self.stages.status(id).await?;
            match status {
                DeploymentStatus::Pending => {
                    self.advance(id, DeploymentStatus::Analyzing).await?;
                }
                DeploymentStatus::Analyzing => {
                    let analysis = self.analyze(id, ctx).await?;
                    self.gate
                        .mark_step_complete(
                            id,
                            StageStep::Analysis,
                            json!({ "project_type": analysis.project_type }),
                        )
                        .await?;
                    self.advance(id, DeploymentStatus::Checking).await?;
                }
                DeploymentStatus::Checking => {
                    let plan = self.prepare_plan(id, ctx).await?;
                    self.gate
                        .mark_step_complete(
                            id,
                            StageStep::PlanValidated,
                            json!({ "steps": plan.steps.len() }),
                        )
                        .await?;
                    self.advance(id, DeploymentStatus::Generating).await?;
                }
                DeploymentStatus::Generating => {
                    // IaC files come from outside; pick them up if they are there.
                    self.gate.auto_complete(id).await?;
                    self.advance(id, DeploymentStatus::Deploying).await?;
                }
                DeploymentStatus::Deploying => {
                    if ctx.plan.is_none() {
                        self.prepare_plan(id, ctx).await?;
                    }
                    let steps = ctx
                        .plan
                        .as_ref()
                        .map(|p| p.steps.clone())
                        .unwrap_or_default();
                    let opts = ExecuteOptions {
                        cancel: Some(token.clone()),
                        ..self.execute.clone()
                    };
                    match self.executor.execute_plan(id, &steps, &opts).await {
                        Ok(state) => {
                            let completed = state.completed_steps.len();
                            ctx.execution = Some(state);
                            self.gate
                                .mark_step_complete(
                                    id,
                                    StageStep::Deployed,
                                    json!({ "completed_steps": completed }),
                                )
                                .await?;
                            self.advance(id, DeploymentStatus::Verifying).await?;
                        }
                        Err(failure) => {
                            ctx.execution = failure.state.map(|state| *state);
                            return Err(failure.error.into());
                        }
                    }
                }
                DeploymentStatus::Verifying => {
                    let completion = self
                        .gate
                        .check_step_completion(id, StageStep::Verified)
                        .await?;
                    if completion.complete {
                        self.gate
                            .mark_step_complete(id, StageStep::Verified, json!({}))
                            .await?;
                    }
                    self.advance(id, DeploymentStatus::Completed).await?;
                }
                DeploymentStatus::Completed => {
                    tracing::info!(deployment = %id, "deployment completed");
                    return Ok(());
                }
                DeploymentStatus::Failed | DeploymentStatus::Cancelled => {
                    return Err(EngineError::Validation(format!(
                        "deployment {} became {} during the run",
                        id, status
                    )));
                }
            }
        }
    }

    /// Guarded transition.
    async fn advance(&self, id: &DeploymentId, target: DeploymentStatus) -> Result<(), EngineError> {
        self.gate.guard(id, target).await?;
        self.stages.transition(id, target, json!({})).await?;
        Ok(())
    }

    async fn analyze(
        &self,
        id: &DeploymentId,
        ctx: &mut RunContext,
    ) -> Result<ProjectAnalysis, EngineError> {
        if let Some(ref analysis) = ctx.analysis {
            return Ok(analysis.clone());
        }
        let analysis = self
            .analysis
            .analyze(id)
            .await
            .map_err(EngineError::Analysis)?;
        ctx.analysis = Some(analysis.clone());
        Ok(analysis)
    }

    async fn prepare_plan(
        &self,
        id: &DeploymentId,
        ctx: &mut RunContext,
    ) -> Result<DeploymentPlan, EngineError> {
        let analysis = self.analyze(id, ctx).await?;
        let workspace = self.workspaces.get(id);
        let plan = DeploymentPlan::build(&analysis, workspace.as_deref())?;

        self.bus.publish(Event::new(
            id,
            EventKind::PlanGenerated {
                steps: plan.steps.len(),
                estimate_min_minutes: plan.estimate.min_minutes,
                estimate_max_minutes: plan.estimate.max_minutes,
            },
        ));
        for issue in &plan.issues {
            self.bus.publish(Event::new(
                id,
                EventKind::PotentialIssue {
                    code: issue.code.clone(),
                    severity: issue.severity.to_string(),
                    message: issue.message.clone(),
                },
            ));
        }
        self.audit
            .info(
                id,
                AUDIT_SOURCE,
                format!(
                    "plan generated: {} steps, {} potential issues",
                    plan.steps.len(),
                    plan.issues.len()
                ),
            )
            .await;

        ctx.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Record a run's error on the deployment: `cancelled` where the stage
    /// allows it, `failed` otherwise.
    async fn settle_failure(
        &self,
        id: &DeploymentId,
        error: &EngineError,
        execution: Option<&ExecutionState>,
    ) {
        let status = match self.stages.status(id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(deployment = %id, error = %e, "cannot load deployment to record failure");
                return;
            }
        };

        let failed_steps = execution
            .map(|state| state.failed_steps.clone())
            .unwrap_or_default();
        let metadata = json!({
            "code": error.code(),
            "message": error.to_string(),
            "stage": status,
            "failed_steps": failed_steps,
        });

        let cancelled = matches!(error, EngineError::Plan(PlanError::Cancelled { .. }));
        let target = if cancelled && can_transition(status, DeploymentStatus::Cancelled) {
            DeploymentStatus::Cancelled
        } else {
            DeploymentStatus::Failed
        };
        if !can_transition(status, target) {
            tracing::warn!(deployment = %id, %status, code = error.code(), "run error left deployment unchanged: {}", error);
            return;
        }

        tracing::warn!(deployment = %id, %status, code = error.code(), "run stopped: {}", error);
        self.audit
            .error(id, AUDIT_SOURCE, format!("{} [{}]", error, error.code()))
            .await;
        if let Err(e) = self.stages.transition(id, target, metadata).await {
            tracing::warn!(deployment = %id, error = %e, "failed to record run failure");
        }
    }

    /// Re-enter a failed deployment through its retry edge and run it again.
    pub async fn retry(&self, id: &DeploymentId) -> Result<RunOutcome, EngineError> {
        if self.is_running(id) {
            return Err(PlanError::Conflict {
                deployment_id: id.clone(),
            }
            .into());
        }
        let deployment = self.ledger.get(id).await?;
        if deployment.status != DeploymentStatus::Failed {
            return Err(EngineError::Validation(format!(
                "only failed deployments can be retried; {} is {}",
                id, deployment.status
            )));
        }

        let failed_in = deployment
            .previous_status
            .unwrap_or(DeploymentStatus::Analyzing);
        let (target, reset) = retry_route(failed_in);
        self.gate.reset_from(id, reset).await?;

        if reset == StageStep::Analysis {
            // No retry edge leads back into analysis; redo it here.
            let analysis = self
                .analysis
                .analyze(id)
                .await
                .map_err(EngineError::Analysis)?;
            self.gate
                .mark_step_complete(
                    id,
                    StageStep::Analysis,
                    json!({ "project_type": analysis.project_type }),
                )
                .await?;
        }

        tracing::info!(deployment = %id, %failed_in, %target, "retrying deployment");
        self.audit
            .info(
                id,
                AUDIT_SOURCE,
                format!("retry: failed in {}, re-entering at {}", failed_in, target),
            )
            .await;
        self.advance(id, target).await?;
        self.run(id).await
    }

    /// Stop a deployment.
    ///
    /// An active run is signalled and records the cancellation itself; the
    /// call returns `true`. An idle deployment is transitioned directly and
    /// the call returns `false`.
    pub async fn cancel(&self, id: &DeploymentId) -> Result<bool, EngineError> {
        let signalled = {
            let runs = self
                .runs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match runs.get(id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };
        if signalled {
            self.executor.cancel(id);
            self.commands.cancel(id);
            tracing::info!(deployment = %id, "cancellation requested");
            return Ok(true);
        }

        self.stages
            .transition(
                id,
                DeploymentStatus::Cancelled,
                json!({ "code": "CANCELLED", "message": "cancelled while idle" }),
            )
            .await?;
        Ok(false)
    }
}
