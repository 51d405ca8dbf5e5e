//! Deployment runs: `launchpad deploy`, `launchpad retry` and `launchpad cancel`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use launchpad::analysis::{ANALYSIS_FILE, JsonFileAnalysis};
use launchpad::launchpad_config::LaunchpadConfig;
use launchpad::ui::DeployUI;
use launchpad::{EngineError, Orchestrator, OrchestratorBuilder, RunOutcome};
use launchpad_common::{Deployment, DeploymentId};

use super::super::Cli;

fn load_config(cli: &Cli, project_dir: PathBuf) -> Result<LaunchpadConfig> {
    let config = LaunchpadConfig::with_cli_args(project_dir, cli.yes, cli.rollback_override())?;
    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }
    Ok(config)
}

fn build_orchestrator(
    config: &LaunchpadConfig,
    analysis: Option<PathBuf>,
    skip: Vec<u32>,
) -> Result<Orchestrator> {
    let analysis_path = analysis.unwrap_or_else(|| config.project_dir.join(ANALYSIS_FILE));
    let orchestrator = OrchestratorBuilder::from_config(config)?
        .analysis(Arc::new(JsonFileAnalysis::at_path(analysis_path)))
        .skip_steps(skip)
        .build()?;
    Ok(orchestrator)
}

/// Load an existing deployment and bind the project directory to it.
async fn resume(
    orchestrator: &Orchestrator,
    config: &LaunchpadConfig,
    id: &DeploymentId,
) -> Result<Deployment> {
    let deployment = orchestrator
        .get(id)
        .await
        .with_context(|| format!("Unknown deployment {}", id))?;
    orchestrator.attach_workspace(id, &config.project_dir)?;
    Ok(deployment)
}

pub async fn cmd_deploy(
    cli: &Cli,
    project_dir: PathBuf,
    id: Option<String>,
    analysis: Option<PathBuf>,
    skip: Vec<u32>,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let orchestrator = build_orchestrator(&config, analysis, skip)?;

    let id = id.map(DeploymentId::new);
    let existing = match id {
        Some(ref id) => orchestrator.get(id).await.ok(),
        None => None,
    };
    let deployment = match (existing, id) {
        (Some(_), Some(id)) => resume(&orchestrator, &config, &id).await?,
        (_, id) => {
            orchestrator
                .create_deployment(id, Some(&config.project_dir))
                .await?
        }
    };

    println!(
        "Deploying {} as {} ({})",
        style(config.project_name()).cyan().bold(),
        style(&deployment.id).bold(),
        deployment.status
    );
    drive(&orchestrator, &deployment.id, cli.verbose, Run::Fresh).await
}

pub async fn cmd_retry(
    cli: &Cli,
    project_dir: PathBuf,
    id: &str,
    analysis: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let orchestrator = build_orchestrator(&config, analysis, Vec::new())?;
    let id = DeploymentId::new(id);
    resume(&orchestrator, &config, &id).await?;

    println!("Retrying {}", style(&id).bold());
    drive(&orchestrator, &id, cli.verbose, Run::Retry).await
}

/// Only idle deployments can be cancelled from another process; a running
/// `deploy` is stopped with Ctrl-C.
pub async fn cmd_cancel(cli: &Cli, project_dir: PathBuf, id: &str) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let orchestrator = OrchestratorBuilder::from_config(&config)?.build()?;
    let id = DeploymentId::new(id);
    orchestrator.cancel(&id).await?;
    println!("Cancelled {}", style(&id).bold());
    Ok(())
}

#[derive(Clone, Copy)]
enum Run {
    Fresh,
    Retry,
}

/// Run the deployment while rendering its events; the first Ctrl-C cancels.
async fn drive(
    orchestrator: &Orchestrator,
    id: &DeploymentId,
    verbose: bool,
    run: Run,
) -> Result<()> {
    let ui = DeployUI::new(verbose);
    let mut rx = orchestrator.subscribe();

    let work = async {
        match run {
            Run::Fresh => orchestrator.run(id).await,
            Run::Retry => orchestrator.retry(id).await,
        }
    };
    tokio::pin!(work);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    let result: Result<RunOutcome, EngineError> = loop {
        tokio::select! {
            biased;
            result = &mut work => break result,
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                tracing::warn!(deployment = %id, "interrupt received, cancelling");
                if let Err(e) = orchestrator.cancel(id).await {
                    tracing::warn!(deployment = %id, error = %e, "cancel failed");
                }
            }
            event = rx.recv() => match event {
                Ok(event) => ui.handle(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress display fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => {}
            },
        }
    };
    while let Ok(event) = rx.try_recv() {
        ui.handle(&event);
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            ui.clear();
            return Err(error.into());
        }
    };
    ui.finish(&outcome.deployment, outcome.execution.as_ref());
    match outcome.error {
        Some(error) => Err(anyhow::Error::new(error).context(format!(
            "Deployment {} ended {}",
            id, outcome.deployment.status
        ))),
        None => Ok(()),
    }
}
