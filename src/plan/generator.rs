//! Plan generation from project analysis.
//!
//! `generate` is a pure function of the analysis: the rule table decides
//! which steps exist and their flags, and the project type supplies the
//! concrete commands. Everything else here is advisory or structural.

use launchpad_common::{ProjectAnalysis, ProjectType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::step::{Predicate, Prerequisite, RollbackEntry, Step, StepAction};
use crate::errors::PlanError;

pub const VALIDATE_PREREQUISITES: &str = "Validate Prerequisites";
pub const INSTALL_DEPENDENCIES: &str = "Install Dependencies";
pub const BUILD_APPLICATION: &str = "Build Application";
pub const BUILD_APPLICATION_SKIPPED: &str = "Build Application (Skipped)";
pub const RUN_TESTS: &str = "Run Tests";
pub const BUILD_CONTAINER_IMAGE: &str = "Build Container Image";
pub const START_COMPOSE_SERVICES: &str = "Start Compose Services";
pub const GENERATE_IAC_CONFIGURATION: &str = "Generate IaC Configuration";
pub const IAC_INIT: &str = "IaC Init";
pub const IAC_PLAN: &str = "IaC Plan";
pub const IAC_APPLY: &str = "IaC Apply";
pub const VERIFY_DEPLOYMENT: &str = "Verify Deployment";

const IAC_TOOL: &str = "terraform";
const CONTAINER_TOOL: &str = "docker";

/// Per-language toolchain commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectCommands {
    pub tool: &'static str,
    pub install: &'static str,
    pub build: &'static str,
    pub test: &'static str,
}

pub fn project_commands(project_type: ProjectType) -> Option<ProjectCommands> {
    let commands = match project_type {
        ProjectType::Node => ProjectCommands {
            tool: "npm",
            install: "npm install",
            build: "npm run build",
            test: "npm test",
        },
        ProjectType::Python => ProjectCommands {
            tool: "pip",
            install: "pip install -r requirements.txt",
            build: "python -m compileall -q .",
            test: "pytest",
        },
        ProjectType::Go => ProjectCommands {
            tool: "go",
            install: "go mod download",
            build: "go build ./...",
            test: "go test ./...",
        },
        ProjectType::Rust => ProjectCommands {
            tool: "cargo",
            install: "cargo fetch",
            build: "cargo build --release",
            test: "cargo test",
        },
        ProjectType::Java => ProjectCommands {
            tool: "mvn",
            install: "mvn -q dependency:resolve",
            build: "mvn -q package -DskipTests",
            test: "mvn -q test",
        },
        ProjectType::Static | ProjectType::Unknown => return None,
    };
    Some(commands)
}

fn new_step(id: u32, name: &str, action: StepAction, estimated_secs: u64) -> Step {
    Step {
        id,
        name: name.to_string(),
        action,
        prerequisites: Vec::new(),
        validation: None,
        estimated_secs,
        can_skip: false,
        skipped: false,
        rollback_command: None,
        requires_approval: false,
    }
}

/// Command step, or an info step when the toolchain is unknown.
fn command_or_info(command: Option<&str>, what: &str, project_type: ProjectType) -> StepAction {
    match command {
        Some(command) => StepAction::Command(command.to_string()),
        None => StepAction::Info(format!(
            "No {} command known for project type {}",
            what, project_type
        )),
    }
}

/// Build the ordered plan for `analysis`.
pub fn generate(analysis: &ProjectAnalysis) -> Vec<Step> {
    let flags = &analysis.flags;
    let commands = project_commands(analysis.project_type);
    let mut steps: Vec<Step> = Vec::new();
    let next_id = |steps: &Vec<Step>| steps.len() as u32 + 1;

    let mut tools: Vec<String> = Vec::new();
    if let Some(c) = commands {
        tools.push(c.tool.to_string());
    }
    if flags.container_file || flags.compose_file {
        tools.push(CONTAINER_TOOL.to_string());
    }
    tools.push(IAC_TOOL.to_string());

    let validate_id = next_id(&steps);
    steps.push(new_step(
        validate_id,
        VALIDATE_PREREQUISITES,
        StepAction::Validation(Predicate::ToolsInstalled { tools }),
        15,
    ));
    // The last step a build-phase step depends on.
    let mut previous = validate_id;

    if flags.manifest {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            INSTALL_DEPENDENCIES,
            command_or_info(commands.map(|c| c.install), "install", analysis.project_type),
            120,
        );
        step.prerequisites.push(Prerequisite::StepCompleted { step_id: previous });
        if let Some(manifest) = analysis.project_type.manifest_file() {
            step.prerequisites.push(Prerequisite::FileExists {
                path: manifest.to_string(),
            });
        }
        steps.push(step);
        previous = id;
    }

    if flags.build_script {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            BUILD_APPLICATION,
            command_or_info(commands.map(|c| c.build), "build", analysis.project_type),
            180,
        );
        step.prerequisites.push(Prerequisite::StepCompleted { step_id: previous });
        steps.push(step);
        previous = id;
    } else {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            BUILD_APPLICATION_SKIPPED,
            StepAction::Info("No build script detected; nothing to build".to_string()),
            0,
        );
        step.can_skip = true;
        step.skipped = true;
        steps.push(step);
    }

    if flags.test_script {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            RUN_TESTS,
            command_or_info(commands.map(|c| c.test), "test", analysis.project_type),
            120,
        );
        step.can_skip = true;
        step.prerequisites.push(Prerequisite::StepCompleted { step_id: previous });
        steps.push(step);
    }

    if flags.container_file {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            BUILD_CONTAINER_IMAGE,
            StepAction::Command("docker build -t {image} .".to_string()),
            300,
        );
        step.prerequisites.push(Prerequisite::ToolAvailable {
            tool: CONTAINER_TOOL.to_string(),
        });
        step.rollback_command = Some("docker rmi -f {image}".to_string());
        steps.push(step);
    }

    if flags.compose_file {
        let id = next_id(&steps);
        let mut step = new_step(
            id,
            START_COMPOSE_SERVICES,
            StepAction::Command("docker compose up -d".to_string()),
            60,
        );
        step.prerequisites.push(Prerequisite::ToolAvailable {
            tool: CONTAINER_TOOL.to_string(),
        });
        step.rollback_command = Some("docker compose down".to_string());
        steps.push(step);
    }

    let generate_id = next_id(&steps);
    steps.push(new_step(
        generate_id,
        GENERATE_IAC_CONFIGURATION,
        StepAction::Validation(Predicate::IacConfigPresent),
        30,
    ));

    let init_id = next_id(&steps);
    let mut init = new_step(
        init_id,
        IAC_INIT,
        StepAction::Iac(format!("{IAC_TOOL} -chdir={{iac_dir}} init -input=false")),
        60,
    );
    init.prerequisites = vec![
        Prerequisite::StepCompleted {
            step_id: generate_id,
        },
        Prerequisite::ToolAvailable {
            tool: IAC_TOOL.to_string(),
        },
        Prerequisite::FileExists {
            path: "{iac_dir}/main.tf".to_string(),
        },
    ];
    steps.push(init);

    let plan_id = next_id(&steps);
    let mut plan = new_step(
        plan_id,
        IAC_PLAN,
        StepAction::Iac(format!(
            "{IAC_TOOL} -chdir={{iac_dir}} plan -input=false -out=tfplan"
        )),
        90,
    );
    plan.prerequisites
        .push(Prerequisite::StepCompleted { step_id: init_id });
    plan.validation = Some(Predicate::IacPlanPresent);
    steps.push(plan);

    let apply_id = next_id(&steps);
    let mut apply = new_step(
        apply_id,
        IAC_APPLY,
        StepAction::Iac(format!(
            "{IAC_TOOL} -chdir={{iac_dir}} apply -input=false -auto-approve tfplan"
        )),
        600,
    );
    apply
        .prerequisites
        .push(Prerequisite::StepCompleted { step_id: plan_id });
    apply.requires_approval = true;
    apply.rollback_command = Some(format!(
        "{IAC_TOOL} -chdir={{iac_dir}} destroy -input=false -auto-approve"
    ));
    steps.push(apply);

    let verify_id = next_id(&steps);
    let mut verify = new_step(
        verify_id,
        VERIFY_DEPLOYMENT,
        StepAction::Validation(Predicate::DeploymentVerified),
        30,
    );
    verify
        .prerequisites
        .push(Prerequisite::StepCompleted { step_id: apply_id });
    steps.push(verify);

    steps
}

/// Compensating commands for every step that has one, newest first.
pub fn generate_rollback_plan(steps: &[Step]) -> Vec<RollbackEntry> {
    let mut entries: Vec<RollbackEntry> = steps
        .iter()
        .rev()
        .filter_map(|step| {
            step.rollback_command.as_ref().map(|command| RollbackEntry {
                original_step_id: step.id,
                command: command.clone(),
            })
        })
        .collect();
    entries.sort_by(|a, b| b.original_step_id.cmp(&a.original_step_id));
    entries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

/// Coarse advisory range: one to five minutes per active step.
pub fn estimate_total_time(steps: &[Step]) -> TimeEstimate {
    let active = steps.iter().filter(|s| !s.skipped).count() as u32;
    TimeEstimate {
        min_minutes: active,
        max_minutes: active * 5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl PotentialIssue {
    fn new(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Names defined in `<workspace>/.env`; an unreadable file counts as empty.
pub fn dotenv_names(workspace: &Path) -> BTreeSet<String> {
    let path = workspace.join(".env");
    match dotenvy::from_path_iter(&path) {
        Ok(iter) => iter.filter_map(|item| item.ok()).map(|(k, _)| k).collect(),
        Err(_) => BTreeSet::new(),
    }
}

/// Advisory findings. Never blocks a plan.
pub fn identify_potential_issues(
    analysis: &ProjectAnalysis,
    workspace: Option<&Path>,
) -> Vec<PotentialIssue> {
    let flags = &analysis.flags;
    let mut issues = Vec::new();

    if !flags.build_script {
        issues.push(PotentialIssue::new(
            Severity::Info,
            "missing_build_script",
            "No build script detected; the build step will be skipped",
        ));
    }

    if !flags.start_script && !flags.container_file && analysis.project_type != ProjectType::Static
    {
        issues.push(PotentialIssue::new(
            Severity::Warning,
            "missing_start_script",
            "No start script detected; the deployed service may not know how to start",
        ));
    }

    if analysis.architecture_pattern.expects_container() && !flags.container_file {
        issues.push(PotentialIssue::new(
            Severity::Warning,
            "missing_container_file",
            "Architecture expects a container image but no container file was found",
        ));
    }

    if !analysis.required_env.is_empty() {
        let from_file = workspace.map(dotenv_names).unwrap_or_default();
        for name in &analysis.required_env {
            if std::env::var_os(name).is_none() && !from_file.contains(name) {
                issues.push(PotentialIssue::new(
                    Severity::Warning,
                    "unresolved_env_var",
                    format!("Required environment variable {} is not set", name),
                ));
            }
        }
    }

    issues
}

/// Structural check. Fails closed: any problem rejects the plan.
pub fn validate_plan(steps: &[Step], analysis: &ProjectAnalysis) -> Result<(), PlanError> {
    let mut problems = Vec::new();

    if steps.is_empty() {
        problems.push("plan has no steps".to_string());
    }

    let mut seen = BTreeSet::new();
    for step in steps {
        if step.id == 0 {
            problems.push(format!("step '{}' has id 0", step.name));
        }
        if !seen.insert(step.id) {
            problems.push(format!("duplicate step id {}", step.id));
        }
        if step.skipped && !step.can_skip {
            problems.push(format!(
                "step {} ({}) is skipped but not skippable",
                step.id, step.name
            ));
        }
    }

    for step in steps {
        for prerequisite in &step.prerequisites {
            if let Prerequisite::StepCompleted { step_id } = prerequisite
                && !steps.iter().any(|s| s.id == *step_id && s.id < step.id)
            {
                problems.push(format!(
                    "step {} ({}) depends on step {} which does not precede it",
                    step.id, step.name, step_id
                ));
            }
        }
    }

    if let Some(manifest) = analysis.project_type.manifest_file()
        && !analysis.flags.manifest
    {
        problems.push(format!(
            "project type {} requires {} but no manifest was detected",
            analysis.project_type, manifest
        ));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(PlanError::Invalid { problems })
    }
}
