//! Read-only views over persisted state: `launchpad status` and `launchpad logs`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use launchpad::audit::{AuditTrail, JsonlLogStore};
use launchpad::launchpad_config::LaunchpadConfig;
use launchpad::store::{JsonDeploymentStore, Ledger};
use launchpad::ui::icons::status_icon;
use launchpad_common::{Deployment, DeploymentId, LogLevel};

pub async fn cmd_status(project_dir: PathBuf, id: Option<&str>) -> Result<()> {
    let config = LaunchpadConfig::new(project_dir)?;
    let ledger = Ledger::new(Arc::new(JsonDeploymentStore::new(&config.deployments_dir())));

    match id {
        Some(id) => {
            let id = DeploymentId::new(id);
            let deployment = ledger
                .get(&id)
                .await
                .with_context(|| format!("Unknown deployment {}", id))?;
            print_deployment(&deployment);
        }
        None => {
            let ids = ledger.list().await?;
            if ids.is_empty() {
                println!("No deployments found in {}", config.deployments_dir().display());
                return Ok(());
            }
            let mut deployments = Vec::with_capacity(ids.len());
            for id in &ids {
                deployments.push(ledger.get(id).await?);
            }
            deployments.sort_by_key(|d| d.created_at);

            println!();
            println!("{}", style("Deployments").bold().underlined());
            for deployment in &deployments {
                println!(
                    "  {}{:<40} {:<12} {}",
                    status_icon(deployment.status),
                    deployment.id,
                    deployment.status,
                    style(deployment.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
                );
            }
            println!();
        }
    }
    Ok(())
}

fn print_deployment(deployment: &Deployment) {
    println!();
    println!(
        "{}{} {}",
        status_icon(deployment.status),
        style(&deployment.id).cyan().bold(),
        style(deployment.status).bold()
    );
    if let Some(previous) = deployment.previous_status {
        println!("  {} {}", style("Previous:").dim(), previous);
    }
    if let Some(archived) = deployment.archived_at {
        println!(
            "  {} {}",
            style("Archived:").dim(),
            archived.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("{}", style("History:").underlined());
    for change in &deployment.status_history {
        let mut line = format!(
            "  {} {}",
            style(change.timestamp.format("%H:%M:%S")).dim(),
            change.status
        );
        if let Some(code) = change.metadata.get("code").and_then(|c| c.as_str()) {
            line.push_str(&format!(" {}", style(code).red()));
        }
        if let Some(message) = change.metadata.get("message").and_then(|m| m.as_str()) {
            line.push_str(&format!(" {}", message));
        }
        println!("{}", line);
    }

    if !deployment.step_status.is_empty() {
        println!();
        println!("{}", style("Steps:").underlined());
        for (step, record) in &deployment.step_status {
            let mark = if record.complete {
                style("done").green()
            } else {
                style("open").yellow()
            };
            println!("  {:<16} {}", step, mark);
        }
    }
    println!();
}

pub async fn cmd_logs(project_dir: PathBuf, id: &str) -> Result<()> {
    let config = LaunchpadConfig::new(project_dir)?;
    let audit = AuditTrail::new(Arc::new(JsonlLogStore::new(&config.audit_dir())));
    let id = DeploymentId::new(id);
    let entries = audit.entries(&id).await?;

    if entries.is_empty() {
        println!("No log entries for {}", id);
        return Ok(());
    }
    for entry in entries {
        let level = match entry.level {
            LogLevel::Error => style(entry.level.to_string()).red(),
            LogLevel::Warn => style(entry.level.to_string()).yellow(),
            _ => style(entry.level.to_string()).dim(),
        };
        println!(
            "{} {:<5} {} {}",
            style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            level,
            style(format!("[{}]", entry.source)).cyan(),
            entry.message
        );
    }
    Ok(())
}
