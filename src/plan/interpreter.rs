//! Resolves tagged step variants against live state.

use launchpad_common::{DeploymentId, VerificationProvider};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::generator::dotenv_names;
use super::step::{Predicate, Prerequisite};
use crate::errors::CommandError;
use crate::exec::{CommandOutput, CommandService, ExecOptions};

/// Values substituted into command and path templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub image: String,
    pub iac_dir: String,
}

impl RenderContext {
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{image}", &self.image)
            .replace("{iac_dir}", &self.iac_dir)
    }
}

pub struct StepInterpreter {
    commands: Arc<CommandService>,
    verifier: Arc<dyn VerificationProvider>,
}

impl StepInterpreter {
    pub fn new(commands: Arc<CommandService>, verifier: Arc<dyn VerificationProvider>) -> Self {
        Self { commands, verifier }
    }

    pub fn commands(&self) -> &Arc<CommandService> {
        &self.commands
    }

    fn probe_timeout(&self) -> Duration {
        self.commands.runner().policy().probe
    }

    async fn workspace(&self, deployment_id: &DeploymentId) -> Result<PathBuf, String> {
        self.commands
            .workspace(deployment_id)
            .await
            .map_err(|e| format!("workspace unavailable: {}", e))
    }

    async fn tool_available(&self, tool: &str) -> bool {
        self.commands
            .runner()
            .shell()
            .locate_tool(tool, self.probe_timeout())
            .await
            .is_some()
    }

    /// Every unmet prerequisite, described. Empty means the step may run.
    pub async fn unmet_prerequisites(
        &self,
        deployment_id: &DeploymentId,
        prerequisites: &[Prerequisite],
        completed: &[u32],
        env: &BTreeMap<String, String>,
        ctx: &RenderContext,
    ) -> Vec<String> {
        let mut unmet = Vec::new();
        for prerequisite in prerequisites {
            let met = match prerequisite {
                Prerequisite::StepCompleted { step_id } => completed.contains(step_id),
                Prerequisite::ToolAvailable { tool } => self.tool_available(tool).await,
                Prerequisite::FileExists { path } => match self.workspace(deployment_id).await {
                    Ok(root) => exists(&root.join(ctx.render(path))).await,
                    Err(reason) => {
                        unmet.push(reason);
                        continue;
                    }
                },
                Prerequisite::EnvVar { name } => {
                    env.contains_key(name)
                        || std::env::var_os(name).is_some()
                        || match self.workspace(deployment_id).await {
                            Ok(root) => dotenv_names(&root).contains(name),
                            Err(_) => false,
                        }
                }
            };
            if !met {
                unmet.push(describe_unmet(prerequisite, ctx));
            }
        }
        unmet
    }

    /// `Ok(())` when the predicate holds, otherwise the reason it does not.
    pub async fn evaluate(
        &self,
        deployment_id: &DeploymentId,
        predicate: &Predicate,
        ctx: &RenderContext,
    ) -> Result<(), String> {
        match predicate {
            Predicate::ToolsInstalled { tools } => {
                let mut missing = Vec::new();
                for tool in tools {
                    if !self.tool_available(tool).await {
                        missing.push(tool.as_str());
                    }
                }
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("missing tools: {}", missing.join(", ")))
                }
            }
            Predicate::ManifestPresent { file } => {
                let root = self.workspace(deployment_id).await?;
                require_file(&root.join(file)).await
            }
            Predicate::IacConfigPresent => {
                let root = self.workspace(deployment_id).await?;
                require_file(&root.join(&ctx.iac_dir).join("main.tf")).await
            }
            Predicate::IacPlanPresent => {
                let root = self.workspace(deployment_id).await?;
                require_file(&root.join(&ctx.iac_dir).join("tfplan")).await
            }
            Predicate::DeploymentVerified => {
                match self.verifier.verify(deployment_id, "verified").await {
                    Ok(outcome) if outcome.complete => Ok(()),
                    Ok(outcome) => Err(outcome
                        .details
                        .unwrap_or_else(|| "deployment not verified".to_string())),
                    Err(e) => Err(format!("verification failed: {:#}", e)),
                }
            }
        }
    }

    /// Run a rendered command; unsuccessful exits become errors.
    pub async fn run_command(
        &self,
        deployment_id: &DeploymentId,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandOutput, CommandError> {
        self.commands
            .run(deployment_id, command, opts)
            .await?
            .into_result(command)
    }
}

fn describe_unmet(prerequisite: &Prerequisite, ctx: &RenderContext) -> String {
    match prerequisite {
        Prerequisite::StepCompleted { step_id } => format!("step {} has not completed", step_id),
        Prerequisite::ToolAvailable { tool } => format!("tool `{}` not found", tool),
        Prerequisite::FileExists { path } => format!("file {} not found", ctx.render(path)),
        Prerequisite::EnvVar { name } => format!("env var `{}` unset", name),
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn require_file(path: &Path) -> Result<(), String> {
    if exists(path).await {
        Ok(())
    } else {
        Err(format!("{} not found", path.display()))
    }
}
