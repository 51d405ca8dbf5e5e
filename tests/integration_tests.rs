//! Integration tests for the launchpad CLI
//!
//! Deployments run against fake `terraform` scripts placed first on PATH, so
//! nothing here touches real infrastructure.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const FAKE_TERRAFORM: &str = r#"#!/bin/sh
dir=.
for arg in "$@"; do
  case "$arg" in -chdir=*) dir="${arg#-chdir=}" ;; esac
done
case " $* " in *" plan "*) touch "$dir/tfplan" ;; esac
exit 0
"#;

/// A project directory plus a bin directory of fake tools.
struct Project {
    dir: TempDir,
    bin: TempDir,
}

impl Project {
    fn new(analysis: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let bin = TempDir::new().unwrap();
        fs::write(dir.path().join("launchpad.analysis.json"), analysis).unwrap();
        let terraform = bin.path().join("terraform");
        fs::write(&terraform, FAKE_TERRAFORM).unwrap();
        fs::set_permissions(&terraform, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, bin }
    }

    fn static_site() -> Self {
        Self::new(r#"{"projectType":"static"}"#)
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_iac(&self) {
        fs::create_dir_all(self.path().join("infra")).unwrap();
        fs::write(self.path().join("infra/main.tf"), "# managed\n").unwrap();
    }

    /// `launchpad` with this project selected and the fake tools first on PATH.
    fn launchpad(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("launchpad");
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.current_dir(self.path())
            .env("PATH", format!("{}:{}", self.bin.path().display(), path))
            .env_remove("LAUNCHPAD_STATE_DIR")
            .env_remove("LAUNCHPAD_LOG")
            .env_remove("LAUNCHPAD_PROJECT_DIR")
            .arg("--project-dir")
            .arg(self.path());
        cmd
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        cargo_bin_cmd!("launchpad")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("deploy"))
            .stdout(predicate::str::contains("plan"));
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("launchpad").arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_deployments() {
        let project = Project::static_site();
        project
            .launchpad()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No deployments found"));
    }

    #[test]
    fn test_exec_requires_command() {
        let project = Project::static_site();
        project.launchpad().args(["exec", "d1"]).assert().failure();
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let project = Project::static_site();
        project
            .launchpad()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No launchpad.toml found"))
            .stdout(predicate::str::contains("iac_dir = \"infra\""));
    }

    #[test]
    fn test_config_init_then_validate() {
        let project = Project::static_site();
        project
            .launchpad()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created launchpad.toml"));
        assert!(project.path().join(".launchpad/launchpad.toml").exists());

        project
            .launchpad()
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));

        project
            .launchpad()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let project = Project::static_site();
        fs::create_dir_all(project.path().join(".launchpad")).unwrap();
        fs::write(
            project.path().join(".launchpad/launchpad.toml"),
            "[timeouts]\nbuild_secs = 0\n\n[deploy]\nverify_url = \"ftp://example\"\n",
        )
        .unwrap();

        project
            .launchpad()
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("timeouts.build_secs is 0"))
            .stdout(predicate::str::contains("verify_url"));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let project = Project::static_site();
        fs::create_dir_all(project.path().join(".launchpad")).unwrap();
        fs::write(
            project.path().join(".launchpad/launchpad.toml"),
            "[timeouts\n",
        )
        .unwrap();
        project
            .launchpad()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("launchpad.toml"));
    }
}

// =============================================================================
// Planning
// =============================================================================

mod plan {
    use super::*;

    #[test]
    fn test_plan_prints_steps_and_estimate() {
        let project = Project::static_site();
        project
            .launchpad()
            .arg("plan")
            .assert()
            .success()
            .stdout(predicate::str::contains("Validate Prerequisites"))
            .stdout(predicate::str::contains("terraform -chdir=infra apply"))
            .stdout(predicate::str::contains("Estimated time: 6-30 minutes"));
    }

    #[test]
    fn test_plan_json_is_machine_readable() {
        let project = Project::static_site();
        let output = project
            .launchpad()
            .args(["plan", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(plan["steps"].as_array().unwrap().len(), 7);
        assert_eq!(plan["rollback"][0]["original_step_id"], 6);
    }

    #[test]
    fn test_plan_rejects_missing_manifest() {
        let project = Project::new(r#"{"projectType":"java"}"#);
        project
            .launchpad()
            .arg("plan")
            .assert()
            .failure()
            .stderr(predicate::str::contains("pom.xml"));
    }

    #[test]
    fn test_plan_without_analysis_names_file() {
        let project = Project::static_site();
        fs::remove_file(project.path().join("launchpad.analysis.json")).unwrap();
        project
            .launchpad()
            .arg("plan")
            .assert()
            .failure()
            .stderr(predicate::str::contains("launchpad.analysis.json"));
    }
}

// =============================================================================
// Deployments
// =============================================================================

mod deploy {
    use super::*;

    #[test]
    fn test_deploy_completes_and_is_recorded() {
        let project = Project::static_site();
        project.write_iac();

        project
            .launchpad()
            .args(["--yes", "deploy", "--id", "site-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));

        project
            .launchpad()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("site-1"));

        project
            .launchpad()
            .args(["status", "site-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("verifying"))
            .stdout(predicate::str::contains("Archived:"));

        project
            .launchpad()
            .args(["logs", "site-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[command]"))
            .stdout(predicate::str::contains("terraform -chdir=infra init"));
    }

    #[test]
    fn test_failed_deploy_can_be_retried() {
        let project = Project::static_site();

        project
            .launchpad()
            .args(["--yes", "deploy", "--id", "site-2"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("site-2"));

        project
            .launchpad()
            .args(["status", "site-2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PREREQUISITE_NOT_MET"));

        project.write_iac();
        project
            .launchpad()
            .args(["--yes", "retry", "site-2"])
            .assert()
            .success();

        project
            .launchpad()
            .args(["status", "site-2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("completed"));
    }

    #[test]
    fn test_retry_unknown_deployment_fails() {
        let project = Project::static_site();
        project
            .launchpad()
            .args(["retry", "ghost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ghost"));
    }

    #[test]
    fn test_cancel_idle_deployment() {
        let project = Project::static_site();
        project
            .launchpad()
            .args(["--yes", "deploy", "--id", "site-3"])
            .assert()
            .failure();

        // Failed deployments can only be retried.
        project
            .launchpad()
            .args(["cancel", "site-3"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed"));
    }

    #[test]
    fn test_exec_runs_in_project_dir() {
        let project = Project::static_site();
        project.write_iac();
        project
            .launchpad()
            .args(["--yes", "deploy", "--id", "site-4"])
            .assert()
            .success();

        project
            .launchpad()
            .args(["exec", "site-4", "ls", "infra"])
            .assert()
            .success()
            .stdout(predicate::str::contains("main.tf"));

        project
            .launchpad()
            .args(["exec", "site-4", "exit", "3"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("exited with 3"));
    }
}
