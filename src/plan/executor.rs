//! Sequential plan execution with approval, prerequisites and rollback.
//!
//! One execution per deployment at a time. Steps never overlap; a failure
//! stops the plan and, when enabled, runs the compensating commands of the
//! already-completed steps newest first. Cancellation stops the plan and kills
//! the in-flight command but never rolls back.

use launchpad_common::{
    ApprovalDecision, ApprovalProvider, DeploymentId, Event, EventKind, EventSink,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::interpreter::{RenderContext, StepInterpreter};
use super::state::{ExecutionState, ExecutionStatus};
use super::step::{Step, StepAction};
use crate::audit::AuditTrail;
use crate::errors::{CommandError, PlanError, RollbackError};
use crate::exec::{CommandService, ExecOptions};

const AUDIT_SOURCE: &str = "plan";

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub auto_approve: bool,
    pub rollback_on_failure: bool,
    pub approval_timeout: Duration,
    /// Step ids to skip at run time; each must be skippable.
    pub skip: BTreeSet<u32>,
    pub image: String,
    pub iac_dir: String,
    pub env: BTreeMap<String, String>,
    /// Overrides the per-category command timeout for every step.
    pub step_timeout: Option<Duration>,
    /// Parent token; cancelling it cancels the execution.
    pub cancel: Option<CancellationToken>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            auto_approve: false,
            rollback_on_failure: true,
            approval_timeout: Duration::from_secs(300),
            skip: BTreeSet::new(),
            image: "app:latest".to_string(),
            iac_dir: "infra".to_string(),
            env: BTreeMap::new(),
            step_timeout: None,
            cancel: None,
        }
    }
}

impl ExecuteOptions {
    fn render_context(&self) -> RenderContext {
        RenderContext {
            image: self.image.clone(),
            iac_dir: self.iac_dir.clone(),
        }
    }

    fn exec_options(&self, cancel: Option<CancellationToken>) -> ExecOptions {
        ExecOptions {
            env: self.env.clone(),
            timeout: self.step_timeout,
            cancel,
            ..Default::default()
        }
    }
}

/// A failed execution. `state` is absent when the plan never started.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionError {
    pub error: PlanError,
    pub state: Option<Box<ExecutionState>>,
}

impl ExecutionError {
    fn before_start(error: PlanError) -> Self {
        Self { error, state: None }
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

pub struct PlanExecutor {
    interpreter: StepInterpreter,
    approvals: Arc<dyn ApprovalProvider>,
    events: Arc<dyn EventSink>,
    audit: AuditTrail,
    active: Mutex<HashMap<DeploymentId, CancellationToken>>,
}

/// Removes the registry entry however the execution ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<DeploymentId, CancellationToken>>,
    deployment_id: DeploymentId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.deployment_id);
    }
}

impl PlanExecutor {
    pub fn new(
        interpreter: StepInterpreter,
        approvals: Arc<dyn ApprovalProvider>,
        events: Arc<dyn EventSink>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            interpreter,
            approvals,
            events,
            audit,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn commands(&self) -> &Arc<CommandService> {
        self.interpreter.commands()
    }

    pub fn is_active(&self, deployment_id: &DeploymentId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(deployment_id))
            .unwrap_or(false)
    }

    /// Stop the deployment's execution and kill its in-flight command.
    pub fn cancel(&self, deployment_id: &DeploymentId) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match active.get(deployment_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn publish(&self, deployment_id: &DeploymentId, kind: EventKind) {
        self.events.publish(Event::new(deployment_id, kind));
    }

    pub async fn execute_plan(
        &self,
        deployment_id: &DeploymentId,
        steps: &[Step],
        opts: &ExecuteOptions,
    ) -> Result<ExecutionState, ExecutionError> {
        let token = match opts.cancel {
            Some(ref parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        {
            let mut active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if active.contains_key(deployment_id) {
                return Err(ExecutionError::before_start(PlanError::Conflict {
                    deployment_id: deployment_id.clone(),
                }));
            }
            active.insert(deployment_id.clone(), token.clone());
        }
        let _guard = ActiveGuard {
            active: &self.active,
            deployment_id: deployment_id.clone(),
        };

        check_skips(steps, &opts.skip).map_err(ExecutionError::before_start)?;

        let ctx = opts.render_context();
        let mut state = ExecutionState::new(deployment_id);
        state.start();
        tracing::info!(deployment = %deployment_id, steps = steps.len(), "executing plan");
        self.publish(
            deployment_id,
            EventKind::ExecutionStarted {
                total_steps: steps.len(),
            },
        );
        self.audit
            .info(
                deployment_id,
                AUDIT_SOURCE,
                format!("executing plan with {} steps", steps.len()),
            )
            .await;

        let outcome = self
            .run_steps(deployment_id, steps, opts, &ctx, &token, &mut state)
            .await;

        let result = match outcome {
            Ok(()) => {
                state.finish(ExecutionStatus::Completed);
                Ok(())
            }
            Err(error @ PlanError::Cancelled { .. }) => {
                state.finish(ExecutionStatus::Cancelled);
                Err(error)
            }
            Err(error) => {
                if opts.rollback_on_failure {
                    state.rollback_failures = self
                        .rollback(deployment_id, steps, &state.completed_steps, opts)
                        .await;
                }
                state.finish(ExecutionStatus::Failed);
                Err(error)
            }
        };

        self.publish(
            deployment_id,
            EventKind::ExecutionFinished {
                status: state.status.to_string(),
                completed: state.completed_steps.len(),
                failed: state.failed_steps.len(),
                skipped: state.skipped_steps.len(),
            },
        );
        self.audit
            .info(
                deployment_id,
                AUDIT_SOURCE,
                format!("plan {}", state.status),
            )
            .await;

        match result {
            Ok(()) => Ok(state),
            Err(error) => Err(ExecutionError {
                error,
                state: Some(Box::new(state)),
            }),
        }
    }

    async fn run_steps(
        &self,
        deployment_id: &DeploymentId,
        steps: &[Step],
        opts: &ExecuteOptions,
        ctx: &RenderContext,
        token: &CancellationToken,
        state: &mut ExecutionState,
    ) -> Result<(), PlanError> {
        for step in steps {
            if token.is_cancelled() {
                return Err(PlanError::Cancelled {
                    deployment_id: deployment_id.clone(),
                });
            }

            if step.skipped || opts.skip.contains(&step.id) {
                state.record_skipped(step);
                self.publish(
                    deployment_id,
                    EventKind::StepSkipped {
                        step_id: step.id,
                        name: step.name.clone(),
                    },
                );
                self.audit
                    .info(
                        deployment_id,
                        AUDIT_SOURCE,
                        format!("step {} ({}) skipped", step.id, step.name),
                    )
                    .await;
                continue;
            }

            state.begin_step(step);
            self.publish(
                deployment_id,
                EventKind::StepStarted {
                    step_id: step.id,
                    name: step.name.clone(),
                },
            );
            let started = Instant::now();

            match self
                .run_step(deployment_id, step, opts, ctx, token, &state.completed_steps)
                .await
            {
                Ok(exit_code) => {
                    let elapsed = started.elapsed();
                    state.record_success(step, elapsed, exit_code);
                    self.publish(
                        deployment_id,
                        EventKind::StepCompleted {
                            step_id: step.id,
                            name: step.name.clone(),
                            duration_ms: elapsed.as_millis() as u64,
                        },
                    );
                    self.audit
                        .info(
                            deployment_id,
                            AUDIT_SOURCE,
                            format!("step {} ({}) completed", step.id, step.name),
                        )
                        .await;
                }
                Err(error @ PlanError::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    state.record_failure(step, started.elapsed(), &error);
                    tracing::warn!(
                        deployment = %deployment_id,
                        step = step.id,
                        code = error.code(),
                        "step failed: {}",
                        error
                    );
                    self.publish(
                        deployment_id,
                        EventKind::StepFailed {
                            step_id: step.id,
                            name: step.name.clone(),
                            code: error.code().to_string(),
                            error: error.to_string(),
                        },
                    );
                    self.audit
                        .error(
                            deployment_id,
                            AUDIT_SOURCE,
                            format!("{} [{}]", error, error.code()),
                        )
                        .await;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Approval, prerequisites, body, post-validation. Returns the exit code
    /// of command steps.
    async fn run_step(
        &self,
        deployment_id: &DeploymentId,
        step: &Step,
        opts: &ExecuteOptions,
        ctx: &RenderContext,
        token: &CancellationToken,
        completed: &[u32],
    ) -> Result<Option<i32>, PlanError> {
        if step.requires_approval && !opts.auto_approve {
            self.await_approval(deployment_id, step, opts.approval_timeout, token)
                .await?;
        }

        if !step.prerequisites.is_empty() {
            let unmet = self
                .interpreter
                .unmet_prerequisites(deployment_id, &step.prerequisites, completed, &opts.env, ctx)
                .await;
            if !unmet.is_empty() {
                return Err(PlanError::PrerequisitesNotMet {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    unmet,
                });
            }
        }

        let mut exit_code = None;
        match &step.action {
            StepAction::Validation(predicate) => {
                self.interpreter
                    .evaluate(deployment_id, predicate, ctx)
                    .await
                    .map_err(|reason| PlanError::ValidationFailed {
                        step_id: step.id,
                        step_name: step.name.clone(),
                        reason,
                    })?;
            }
            StepAction::Command(template) | StepAction::Iac(template) => {
                let command = ctx.render(template);
                let output = self
                    .interpreter
                    .run_command(
                        deployment_id,
                        &command,
                        opts.exec_options(Some(token.clone())),
                    )
                    .await
                    .map_err(|source| match source {
                        CommandError::Cancelled { .. } => PlanError::Cancelled {
                            deployment_id: deployment_id.clone(),
                        },
                        source => PlanError::Command {
                            step_id: step.id,
                            step_name: step.name.clone(),
                            source,
                        },
                    })?;
                exit_code = output.exit_code;
            }
            StepAction::Info(message) => {
                self.publish(
                    deployment_id,
                    EventKind::StepInfo {
                        step_id: step.id,
                        message: message.clone(),
                    },
                );
                self.audit
                    .info(deployment_id, AUDIT_SOURCE, message.clone())
                    .await;
            }
        }

        if let Some(ref predicate) = step.validation {
            self.interpreter
                .evaluate(deployment_id, predicate, ctx)
                .await
                .map_err(|reason| PlanError::ValidationFailed {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    reason,
                })?;
        }

        Ok(exit_code)
    }

    async fn await_approval(
        &self,
        deployment_id: &DeploymentId,
        step: &Step,
        limit: Duration,
        token: &CancellationToken,
    ) -> Result<(), PlanError> {
        self.publish(
            deployment_id,
            EventKind::ApprovalRequired {
                step_id: step.id,
                name: step.name.clone(),
                timeout_secs: limit.as_secs(),
            },
        );

        let wait = tokio::time::timeout(
            limit,
            self.approvals
                .await_decision(deployment_id, step.id, &step.name),
        );
        let decision = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(PlanError::Cancelled {
                    deployment_id: deployment_id.clone(),
                });
            }
            decision = wait => decision,
        };

        let result = match decision {
            Err(_) => Err(PlanError::ApprovalTimeout {
                step_id: step.id,
                step_name: step.name.clone(),
                timeout_secs: limit.as_secs(),
            }),
            Ok(Err(e)) => Err(PlanError::ApprovalRejected {
                step_id: step.id,
                step_name: step.name.clone(),
                reason: format!("approval provider failed: {:#}", e),
            }),
            Ok(Ok(ApprovalDecision::Rejected { reason })) => Err(PlanError::ApprovalRejected {
                step_id: step.id,
                step_name: step.name.clone(),
                reason: reason.unwrap_or_else(|| "no reason given".to_string()),
            }),
            Ok(Ok(ApprovalDecision::Approved)) => Ok(()),
        };

        self.publish(
            deployment_id,
            EventKind::ApprovalResolved {
                step_id: step.id,
                approved: result.is_ok(),
            },
        );
        result
    }

    /// Run the rollback command of each completed step, newest first.
    ///
    /// Best-effort: every entry is attempted and failures are returned, not raised.
    pub async fn rollback(
        &self,
        deployment_id: &DeploymentId,
        steps: &[Step],
        completed: &[u32],
        opts: &ExecuteOptions,
    ) -> Vec<RollbackError> {
        let ctx = opts.render_context();
        let entries: Vec<(u32, String)> = completed
            .iter()
            .rev()
            .filter_map(|id| steps.iter().find(|s| s.id == *id))
            .filter_map(|step| {
                step.rollback_command
                    .as_ref()
                    .map(|command| (step.id, ctx.render(command)))
            })
            .collect();
        if entries.is_empty() {
            return Vec::new();
        }

        tracing::info!(deployment = %deployment_id, steps = entries.len(), "rolling back");
        self.publish(
            deployment_id,
            EventKind::RollbackStarted {
                steps: entries.len(),
            },
        );

        let mut failures = Vec::new();
        for (original_step_id, command) in entries {
            // Rollback runs even when the execution was cancelled upstream.
            let result = self
                .interpreter
                .run_command(deployment_id, &command, opts.exec_options(None))
                .await;
            match result {
                Ok(_) => {
                    self.publish(
                        deployment_id,
                        EventKind::RollbackStep {
                            original_step_id,
                            command,
                            success: true,
                            error: None,
                        },
                    );
                }
                Err(e) => {
                    let failure = RollbackError {
                        original_step_id,
                        command: command.clone(),
                        cause_code: e.code().to_string(),
                        message: e.to_string(),
                    };
                    tracing::warn!(deployment = %deployment_id, "{}", failure);
                    self.audit
                        .error(
                            deployment_id,
                            AUDIT_SOURCE,
                            format!("{} [{}]", failure, failure.code()),
                        )
                        .await;
                    self.publish(
                        deployment_id,
                        EventKind::RollbackStep {
                            original_step_id,
                            command,
                            success: false,
                            error: Some(e.to_string()),
                        },
                    );
                    failures.push(failure);
                }
            }
        }
        failures
    }
}

fn check_skips(steps: &[Step], skip: &BTreeSet<u32>) -> Result<(), PlanError> {
    let problems: Vec<String> = skip
        .iter()
        .filter_map(|id| match steps.iter().find(|s| s.id == *id) {
            None => Some(format!("cannot skip unknown step {}", id)),
            Some(step) if !step.can_skip => {
                Some(format!("step {} ({}) cannot be skipped", step.id, step.name))
            }
            Some(_) => None,
        })
        .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(PlanError::Invalid { problems })
    }
}
