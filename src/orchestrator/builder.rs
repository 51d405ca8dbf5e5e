use anyhow::Result;
use launchpad_common::{
    AnalysisProvider, ApprovalProvider, DeploymentStore, EventSink, LogStore,
    VerificationProvider,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Orchestrator;
use crate::analysis::JsonFileAnalysis;
use crate::audit::{AuditTrail, JsonlLogStore, MemoryLogStore};
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::exec::{
    CommandRunner, CommandService, ShellEnvironment, ShellSettings, SuccessHook, TimeoutPolicy,
    Workspaces,
};
use crate::gate::{
    ApprovalBoard, AutoApprove, AutoCompleter, HttpHealthVerifier, PromptApproval,
    StaticVerifier, StepCompletionGate,
};
use crate::launchpad_config::LaunchpadConfig;
use crate::plan::{ExecuteOptions, PlanExecutor, StepInterpreter};
use crate::stage::StageMachine;
use crate::store::{JsonDeploymentStore, Ledger, MemoryDeploymentStore};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Wires collaborators and settings into an [`Orchestrator`].
///
/// Everything has an in-memory or conservative default: memory stores, no
/// analysis file override, approvals resolved through an [`ApprovalBoard`]
/// nobody answers (so gated steps time out unless auto-approved).
pub struct OrchestratorBuilder {
    deployments: Option<Arc<dyn DeploymentStore>>,
    logs: Option<Arc<dyn LogStore>>,
    analysis: Option<Arc<dyn AnalysisProvider>>,
    approvals: Option<Arc<dyn ApprovalProvider>>,
    verifier: Option<Arc<dyn VerificationProvider>>,
    shell: ShellSettings,
    policy: TimeoutPolicy,
    workspace_root: Option<PathBuf>,
    execute: ExecuteOptions,
    event_capacity: usize,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            deployments: None,
            logs: None,
            analysis: None,
            approvals: None,
            verifier: None,
            shell: ShellSettings::default(),
            policy: TimeoutPolicy::default(),
            workspace_root: None,
            execute: ExecuteOptions::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persistent stores under the state directory plus every setting from
    /// `config`. Approval is interactive unless auto-approve is on.
    pub fn from_config(config: &LaunchpadConfig) -> Result<Self> {
        let verifier: Arc<dyn VerificationProvider> = match config.toml.deploy.verify_url {
            Some(ref url) => Arc::new(HttpHealthVerifier::new(
                url.clone(),
                Duration::from_secs(config.toml.timeouts.probe_secs.max(1)),
            )?),
            None => Arc::new(StaticVerifier::new(true)),
        };
        let approvals: Arc<dyn ApprovalProvider> = if config.auto_approve() {
            Arc::new(AutoApprove)
        } else {
            Arc::new(PromptApproval::new())
        };

        Ok(Self::new()
            .deployment_store(Arc::new(JsonDeploymentStore::new(&config.deployments_dir())))
            .log_store(Arc::new(JsonlLogStore::new(&config.audit_dir())))
            .approvals(approvals)
            .verifier(verifier)
            .shell(config.shell_settings())
            .timeouts(config.timeout_policy())
            .workspace_root(config.state_dir.join("workspaces"))
            .execute_options(ExecuteOptions {
                auto_approve: config.auto_approve(),
                rollback_on_failure: config.rollback_on_failure(),
                approval_timeout: config.approval_timeout(),
                image: config.image(),
                iac_dir: config.toml.deploy.iac_dir.clone(),
                ..ExecuteOptions::default()
            }))
    }

    pub fn deployment_store(mut self, store: Arc<dyn DeploymentStore>) -> Self {
        self.deployments = Some(store);
        self
    }

    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.logs = Some(store);
        self
    }

    pub fn analysis(mut self, provider: Arc<dyn AnalysisProvider>) -> Self {
        self.analysis = Some(provider);
        self
    }

    pub fn approvals(mut self, provider: Arc<dyn ApprovalProvider>) -> Self {
        self.approvals = Some(provider);
        self
    }

    pub fn verifier(mut self, provider: Arc<dyn VerificationProvider>) -> Self {
        self.verifier = Some(provider);
        self
    }

    pub fn shell(mut self, settings: ShellSettings) -> Self {
        self.shell = settings;
        self
    }

    pub fn timeouts(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parent of the directories created for deployments without a bound workspace.
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn execute_options(mut self, options: ExecuteOptions) -> Self {
        self.execute = options;
        self
    }

    /// Plan steps to skip on every run. Only skippable steps are accepted at execution time.
    pub fn skip_steps(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.execute.skip.extend(ids);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Orchestrator, EngineError> {
        let shell = ShellEnvironment::resolve(&self.shell)?;

        let workspaces = Arc::new(Workspaces::new(
            self.workspace_root
                .unwrap_or_else(|| std::env::temp_dir().join("launchpad-workspaces")),
        ));
        let bus = EventBus::new(self.event_capacity);
        let events: Arc<dyn EventSink> = Arc::new(bus.clone());
        let audit = AuditTrail::new(
            self.logs
                .unwrap_or_else(|| Arc::new(MemoryLogStore::new())),
        );
        let ledger = Arc::new(Ledger::new(
            self.deployments
                .unwrap_or_else(|| Arc::new(MemoryDeploymentStore::new())),
        ));
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(StaticVerifier::new(true)));
        let analysis = self
            .analysis
            .unwrap_or_else(|| Arc::new(JsonFileAnalysis::new(workspaces.clone())));
        let approvals = self
            .approvals
            .unwrap_or_else(|| Arc::new(ApprovalBoard::new()));

        let gate = Arc::new(StepCompletionGate::new(
            ledger.clone(),
            workspaces.clone(),
            verifier.clone(),
            events.clone(),
            audit.clone(),
            self.execute.iac_dir.clone(),
        ));
        let hook: Arc<dyn SuccessHook> = Arc::new(AutoCompleter::new(gate.clone()));
        let commands = Arc::new(CommandService::new(
            CommandRunner::new(shell, self.policy),
            workspaces.clone(),
            events.clone(),
            audit.clone(),
            Some(hook),
        ));
        let executor = PlanExecutor::new(
            StepInterpreter::new(commands.clone(), verifier),
            approvals,
            events.clone(),
            audit.clone(),
        );
        let stages = StageMachine::new(ledger.clone(), events, audit.clone());

        Ok(Orchestrator {
            ledger,
            stages,
            gate,
            commands,
            executor,
            analysis,
            workspaces,
            bus,
            audit,
            execute: self.execute,
            runs: Mutex::new(HashMap::new()),
        })
    }
}
