//! Ad-hoc commands in a deployment's workspace: `launchpad exec`.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use launchpad::exec::ExecOptions;
use launchpad::launchpad_config::LaunchpadConfig;
use launchpad::OrchestratorBuilder;
use launchpad_common::DeploymentId;

use super::super::Cli;

pub async fn cmd_exec(
    cli: &Cli,
    project_dir: PathBuf,
    id: &str,
    command: &str,
    timeout: Option<u64>,
) -> Result<()> {
    let config = LaunchpadConfig::with_cli_args(project_dir, cli.yes, None)?;
    let orchestrator = OrchestratorBuilder::from_config(&config)?.build()?;
    let id = DeploymentId::new(id);
    orchestrator
        .get(&id)
        .await
        .with_context(|| format!("Unknown deployment {}", id))?;
    orchestrator.attach_workspace(&id, &config.project_dir)?;

    let mut opts = ExecOptions {
        on_stdout: Some(Arc::new(|chunk: &str| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk.as_bytes());
            let _ = out.flush();
        })),
        on_stderr: Some(Arc::new(|chunk: &str| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(chunk.as_bytes());
            let _ = err.flush();
        })),
        ..ExecOptions::default()
    };
    if let Some(secs) = timeout {
        opts = opts.with_timeout(Duration::from_secs(secs));
    }

    let output = orchestrator.exec(&id, command, opts).await?;
    if !output.success {
        let code = output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        anyhow::bail!(
            "`{}` exited with {} after {:.1}s",
            command,
            code,
            output.duration.as_secs_f64()
        );
    }
    Ok(())
}
