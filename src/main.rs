use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(version, about = "Deployment workflow orchestrator")]
pub struct Cli {
    /// Debug-level logs and streamed command output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every gated step without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true, env = "LAUNCHPAD_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate and validate the deployment plan without running it
    Plan {
        /// Analysis document (defaults to launchpad.analysis.json in the project)
        #[arg(long)]
        analysis: Option<PathBuf>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a deployment end to end
    Deploy {
        /// Deployment id (generated when omitted; an existing id resumes)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        analysis: Option<PathBuf>,

        /// Skip a plan step by id (repeatable; only optional steps)
        #[arg(long = "skip", value_name = "STEP")]
        skip: Vec<u32>,

        /// Do not run rollback commands when a step fails
        #[arg(long, conflicts_with = "rollback")]
        no_rollback: bool,

        /// Run rollback commands when a step fails (overrides the config file)
        #[arg(long)]
        rollback: bool,
    },
    /// Retry a failed deployment from the stage it failed in
    Retry {
        id: String,

        #[arg(long)]
        analysis: Option<PathBuf>,
    },
    /// Cancel an idle deployment
    Cancel { id: String },
    /// Run a shell command in a deployment's workspace
    Exec {
        id: String,

        /// Timeout in seconds (defaults to the category timeout)
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// List deployments, or show one in detail
    Status { id: Option<String> },
    /// Show the audit log of a deployment
    Logs { id: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default launchpad.toml file
    Init,
}

impl Cli {
    /// Rollback override from the deploy flags, if any.
    pub fn rollback_override(&self) -> Option<bool> {
        match self.command {
            Commands::Deploy {
                no_rollback: true, ..
            } => Some(false),
            Commands::Deploy { rollback: true, .. } => Some(true),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = cmd::init_tracing(cli.verbose, cli.log_json, cli.log_dir.as_deref())?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Plan { analysis, json } => {
            cmd::cmd_plan(&project_dir, analysis.as_deref(), *json).await?
        }
        Commands::Deploy {
            id, analysis, skip, ..
        } => {
            cmd::cmd_deploy(&cli, project_dir, id.clone(), analysis.clone(), skip.clone()).await?
        }
        Commands::Retry { id, analysis } => {
            cmd::cmd_retry(&cli, project_dir, id, analysis.clone()).await?
        }
        Commands::Cancel { id } => cmd::cmd_cancel(&cli, project_dir, id).await?,
        Commands::Exec {
            id,
            timeout,
            command,
        } => cmd::cmd_exec(&cli, project_dir, id, &command.join(" "), *timeout).await?,
        Commands::Status { id } => cmd::cmd_status(project_dir, id.as_deref()).await?,
        Commands::Logs { id } => cmd::cmd_logs(project_dir, id).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
