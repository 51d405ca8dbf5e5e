//! Configuration view and validation commands: `launchpad config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use launchpad::launchpad_config::{LaunchpadConfig, LaunchpadToml};

    let config = LaunchpadConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Launchpad Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No launchpad.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            if let Some(name) = &toml.project.name {
                println!("[project]");
                println!("  name = \"{}\"", name);
                println!();
            }

            println!("[shell]");
            if let Some(shell) = &toml.shell.shell {
                println!("  shell = \"{}\"", shell.display());
            }
            println!("  login = {}", toml.shell.login);
            if !toml.shell.extra_path.is_empty() {
                let dirs: Vec<_> = toml
                    .shell
                    .extra_path
                    .iter()
                    .map(|p| format!("\"{}\"", p.display()))
                    .collect();
                println!("  extra_path = [{}]", dirs.join(", "));
            }
            println!();

            println!("[timeouts]");
            println!("  probe_secs = {}", toml.timeouts.probe_secs);
            println!("  install_secs = {}", toml.timeouts.install_secs);
            println!("  build_secs = {}", toml.timeouts.build_secs);
            println!("  iac_apply_secs = {}", toml.timeouts.iac_apply_secs);
            println!("  default_secs = {}", toml.timeouts.default_secs);
            println!("  kill_grace_ms = {}", toml.timeouts.kill_grace_ms);
            println!();

            println!("[executor]");
            println!("  auto_approve = {}", toml.executor.auto_approve);
            println!(
                "  rollback_on_failure = {}",
                toml.executor.rollback_on_failure
            );
            println!(
                "  approval_timeout_secs = {}",
                toml.executor.approval_timeout_secs
            );
            println!();

            println!("[deploy]");
            println!("  iac_dir = \"{}\"", toml.deploy.iac_dir);
            if let Some(image) = &toml.deploy.image {
                println!("  image = \"{}\"", image);
            }
            if let Some(url) = &toml.deploy.verify_url {
                println!("  verify_url = \"{}\"", url);
            }
            println!();

            // Show effective values (including env overrides)
            println!("Effective values (with env/CLI overrides):");
            println!("  project = \"{}\"", config.project_name());
            println!("  state_dir = \"{}\"", config.state_dir.display());
            println!("  image = \"{}\"", config.image());
            println!(
                "  approval_timeout = {}s",
                config.approval_timeout().as_secs()
            );
            if let Some(shell) = config.shell_settings().preferred {
                println!("  shell = \"{}\"", shell.display());
            }
            println!();

            if !config_path.exists() {
                println!("Run 'launchpad config init' to create a launchpad.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No launchpad.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("launchpad.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.state_dir)?;
            LaunchpadToml::default().save(&config_path)?;

            println!("Created launchpad.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [shell] shell, login, extra_path");
            println!("  - [timeouts] per-category command timeouts");
            println!("  - [executor] auto_approve, rollback_on_failure, approval_timeout_secs");
            println!("  - [deploy] iac_dir, image, verify_url");
            println!();
        }
    }

    Ok(())
}
