//! Unified configuration for Launchpad.
//!
//! Settings are read from `.launchpad/launchpad.toml` and layered
//! (file → environment → CLI). Every section has defaults, so a missing
//! file is equivalent to an empty one.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "storefront"
//!
//! [shell]
//! shell = "/bin/zsh"
//! login = false
//! extra_path = ["/opt/tools/bin"]
//!
//! [timeouts]
//! probe_secs = 10
//! install_secs = 600
//! build_secs = 900
//! iac_apply_secs = 1800
//! default_secs = 300
//! kill_grace_ms = 2000
//!
//! [executor]
//! auto_approve = false
//! rollback_on_failure = true
//! approval_timeout_secs = 300
//!
//! [deploy]
//! iac_dir = "infra"
//! image = "storefront:latest"
//! verify_url = "https://storefront.example.com/health"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::{ShellSettings, TimeoutPolicy};

/// Project-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,
}

/// Shell and PATH resolution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellSection {
    /// Preferred shell; probed first, before the platform default.
    #[serde(default)]
    pub shell: Option<PathBuf>,
    /// Run commands through a login shell (`-l`).
    #[serde(default)]
    pub login: bool,
    /// Directories searched before the inherited PATH.
    #[serde(default)]
    pub extra_path: Vec<PathBuf>,
}

impl ShellSection {
    pub fn to_shell_settings(&self) -> ShellSettings {
        ShellSettings {
            preferred: self.shell.clone(),
            login: self.login,
            extra_path: self.extra_path.clone(),
        }
    }
}

/// Per-category command timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_install_secs")]
    pub install_secs: u64,
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    #[serde(default = "default_iac_apply_secs")]
    pub iac_apply_secs: u64,
    #[serde(default = "default_default_secs")]
    pub default_secs: u64,
    /// Grace period between SIGTERM and SIGKILL on timeout.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_probe_secs() -> u64 {
    10
}

fn default_install_secs() -> u64 {
    600
}

fn default_build_secs() -> u64 {
    900
}

fn default_iac_apply_secs() -> u64 {
    1800
}

fn default_default_secs() -> u64 {
    300
}

fn default_kill_grace_ms() -> u64 {
    2000
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            install_secs: default_install_secs(),
            build_secs: default_build_secs(),
            iac_apply_secs: default_iac_apply_secs(),
            default_secs: default_default_secs(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl TimeoutsSection {
    pub fn to_timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            probe: Duration::from_secs(self.probe_secs),
            install: Duration::from_secs(self.install_secs),
            build: Duration::from_secs(self.build_secs),
            iac_apply: Duration::from_secs(self.iac_apply_secs),
            general: Duration::from_secs(self.default_secs),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            ..TimeoutPolicy::default()
        }
    }
}

/// Plan executor behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

fn default_rollback_on_failure() -> bool {
    true
}

fn default_approval_timeout_secs() -> u64 {
    300
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            auto_approve: false,
            rollback_on_failure: default_rollback_on_failure(),
            approval_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

/// Deployment target settings substituted into generated commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySection {
    #[serde(default = "default_iac_dir")]
    pub iac_dir: String,
    /// Container image tag; defaults to `<project>:latest`.
    #[serde(default)]
    pub image: Option<String>,
    /// Health endpoint polled by the verification step.
    #[serde(default)]
    pub verify_url: Option<String>,
}

fn default_iac_dir() -> String {
    "infra".to_string()
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            iac_dir: default_iac_dir(),
            image: None,
            verify_url: None,
        }
    }
}

/// The complete launchpad.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchpadToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub deploy: DeploySection,
}

impl LaunchpadToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse launchpad.toml")
    }

    /// Load `.launchpad/launchpad.toml`, or defaults when it doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join("launchpad.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize launchpad.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let timeouts = [
            ("probe_secs", self.timeouts.probe_secs),
            ("install_secs", self.timeouts.install_secs),
            ("build_secs", self.timeouts.build_secs),
            ("iac_apply_secs", self.timeouts.iac_apply_secs),
            ("default_secs", self.timeouts.default_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                warnings.push(format!(
                    "timeouts.{} is 0: every command in that category will time out immediately",
                    name
                ));
            }
        }

        if self.timeouts.probe_secs > self.timeouts.iac_apply_secs {
            warnings.push(
                "timeouts.probe_secs is larger than timeouts.iac_apply_secs".to_string(),
            );
        }

        if self.deploy.iac_dir.trim().is_empty() {
            warnings.push("deploy.iac_dir is empty".to_string());
        } else if Path::new(&self.deploy.iac_dir).is_absolute() {
            warnings.push(format!(
                "deploy.iac_dir '{}' is absolute; it is resolved inside each deployment workspace",
                self.deploy.iac_dir
            ));
        }

        if let Some(ref shell) = self.shell.shell
            && !shell.exists()
        {
            warnings.push(format!(
                "shell.shell '{}' does not exist; the platform default will be used",
                shell.display()
            ));
        }

        if let Some(ref url) = self.deploy.verify_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            warnings.push(format!("deploy.verify_url '{}' is not an http(s) URL", url));
        }

        warnings
    }
}

/// Configuration merged from launchpad.toml, the environment and CLI flags.
#[derive(Debug, Clone)]
pub struct LaunchpadConfig {
    pub project_dir: PathBuf,
    /// `.launchpad` directory inside the project, unless `LAUNCHPAD_STATE_DIR` overrides it.
    pub state_dir: PathBuf,
    pub toml: LaunchpadToml,
    /// CLI override: auto-approve every gated step
    pub yes: bool,
    /// CLI override for rollback-on-failure
    pub cli_rollback_on_failure: Option<bool>,
}

impl LaunchpadConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = std::env::var_os("LAUNCHPAD_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_dir.join(".launchpad"));
        let toml = LaunchpadToml::load_or_default(&state_dir)?;

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            yes: false,
            cli_rollback_on_failure: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        yes: bool,
        rollback_on_failure: Option<bool>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.yes = yes;
        config.cli_rollback_on_failure = rollback_on_failure;
        Ok(config)
    }

    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "app".to_string())
        })
    }

    /// Shell settings (env `LAUNCHPAD_SHELL` overrides the file).
    pub fn shell_settings(&self) -> ShellSettings {
        let mut settings = self.toml.shell.to_shell_settings();
        if let Some(shell) = std::env::var_os("LAUNCHPAD_SHELL") {
            settings.preferred = Some(PathBuf::from(shell));
        }
        settings
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.toml.timeouts.to_timeout_policy()
    }

    /// Auto-approve (CLI → file).
    pub fn auto_approve(&self) -> bool {
        self.yes || self.toml.executor.auto_approve
    }

    /// Rollback on failure (CLI → file).
    pub fn rollback_on_failure(&self) -> bool {
        self.cli_rollback_on_failure
            .unwrap_or(self.toml.executor.rollback_on_failure)
    }

    /// Approval timeout (env `LAUNCHPAD_APPROVAL_TIMEOUT_SECS` → file).
    pub fn approval_timeout(&self) -> Duration {
        let secs = std::env::var("LAUNCHPAD_APPROVAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(self.toml.executor.approval_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn image(&self) -> String {
        self.toml
            .deploy
            .image
            .clone()
            .unwrap_or_else(|| format!("{}:latest", self.project_name()))
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join("launchpad.toml")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.state_dir.join("deployments")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.state_dir.join("audit")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = LaunchpadToml::parse("").unwrap();
        assert_eq!(toml.timeouts.probe_secs, 10);
        assert_eq!(toml.timeouts.iac_apply_secs, 1800);
        assert!(toml.executor.rollback_on_failure);
        assert!(!toml.executor.auto_approve);
        assert_eq!(toml.deploy.iac_dir, "infra");
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
[project]
name = "storefront"

[shell]
shell = "/bin/bash"
login = true
extra_path = ["/opt/tools/bin"]

[timeouts]
probe_secs = 5
build_secs = 60
kill_grace_ms = 250

[executor]
auto_approve = true
rollback_on_failure = false

[deploy]
iac_dir = "terraform"
image = "storefront:v2"
"#;
        let toml = LaunchpadToml::parse(content).unwrap();
        assert_eq!(toml.project.name.as_deref(), Some("storefront"));
        assert!(toml.shell.login);
        assert_eq!(toml.shell.extra_path, vec![PathBuf::from("/opt/tools/bin")]);
        assert_eq!(toml.timeouts.probe_secs, 5);
        assert_eq!(toml.timeouts.install_secs, 600);
        assert!(toml.executor.auto_approve);
        assert!(!toml.executor.rollback_on_failure);
        assert_eq!(toml.deploy.iac_dir, "terraform");

        let policy = toml.timeouts.to_timeout_policy();
        assert_eq!(policy.probe, Duration::from_secs(5));
        assert_eq!(policy.build, Duration::from_secs(60));
        assert_eq!(policy.kill_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        assert!(LaunchpadToml::parse("[timeouts\nprobe_secs = ").is_err());
    }

    #[test]
    fn test_validate_flags_zero_timeouts_and_bad_url() {
        let mut toml = LaunchpadToml::default();
        toml.timeouts.build_secs = 0;
        toml.deploy.verify_url = Some("ftp://example.com".to_string());
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("build_secs")));
        assert!(warnings.iter().any(|w| w.contains("verify_url")));
    }

    #[test]
    fn test_validate_default_is_clean() {
        assert!(LaunchpadToml::default().validate().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("launchpad.toml");
        let mut toml = LaunchpadToml::default();
        toml.deploy.image = Some("api:1.0".to_string());
        toml.save(&path).unwrap();

        let loaded = LaunchpadToml::load(&path).unwrap();
        assert_eq!(loaded.deploy.image.as_deref(), Some("api:1.0"));
    }

    #[test]
    fn test_config_cli_overrides_file() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join(".launchpad");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(
            state_dir.join("launchpad.toml"),
            "[executor]\nrollback_on_failure = true\n",
        )
        .unwrap();

        let config =
            LaunchpadConfig::with_cli_args(dir.path().to_path_buf(), true, Some(false)).unwrap();
        assert!(config.auto_approve());
        assert!(!config.rollback_on_failure());
    }

    #[test]
    fn test_image_defaults_to_project_name() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("storefront");
        std::fs::create_dir_all(&project).unwrap();
        let config = LaunchpadConfig::new(project).unwrap();
        assert_eq!(config.image(), "storefront:latest");
    }
}
