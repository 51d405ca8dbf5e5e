//! Plan steps as plain data.
//!
//! Behaviour lives in tagged variants (`StepAction`, `Predicate`,
//! `Prerequisite`) that the interpreter resolves at run time, so a plan can be
//! serialized, printed and compared.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Validation,
    Command,
    Iac,
    Info,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Validation => "validation",
            StepType::Command => "command",
            StepType::Iac => "iac",
            StepType::Info => "info",
        };
        f.write_str(s)
    }
}

/// Named checks evaluated against the live workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum Predicate {
    ToolsInstalled { tools: Vec<String> },
    ManifestPresent { file: String },
    /// `{iac_dir}/main.tf` exists.
    IacConfigPresent,
    /// `{iac_dir}/tfplan` exists.
    IacPlanPresent,
    DeploymentVerified,
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::ToolsInstalled { tools } => write!(f, "tools installed ({})", tools.join(", ")),
            Predicate::ManifestPresent { file } => write!(f, "{} present", file),
            Predicate::IacConfigPresent => f.write_str("IaC configuration present"),
            Predicate::IacPlanPresent => f.write_str("IaC plan present"),
            Predicate::DeploymentVerified => f.write_str("deployment verified"),
        }
    }
}

/// What a step does when it runs. Templates may contain `{image}` and `{iac_dir}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepAction {
    Validation(Predicate),
    Command(String),
    Iac(String),
    Info(String),
}

/// A condition checked against live state before the step body runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prerequisite {
    StepCompleted { step_id: u32 },
    ToolAvailable { tool: String },
    /// Relative to the deployment workspace; may be a template.
    FileExists { path: String },
    EnvVar { name: String },
}

impl std::fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prerequisite::StepCompleted { step_id } => write!(f, "step {} completed", step_id),
            Prerequisite::ToolAvailable { tool } => write!(f, "tool `{}` available", tool),
            Prerequisite::FileExists { path } => write!(f, "file {} exists", path),
            Prerequisite::EnvVar { name } => write!(f, "env var {} set", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the plan.
    pub id: u32,
    pub name: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Prerequisite>,
    /// Checked after the body; a failure fails the step even on exit code 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Predicate>,
    pub estimated_secs: u64,
    pub can_skip: bool,
    /// Skipped at generation time (e.g. nothing to build).
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    pub requires_approval: bool,
}

impl Step {
    pub fn step_type(&self) -> StepType {
        match self.action {
            StepAction::Validation(_) => StepType::Validation,
            StepAction::Command(_) => StepType::Command,
            StepAction::Iac(_) => StepType::Iac,
            StepAction::Info(_) => StepType::Info,
        }
    }

    /// The command template for `command` and `iac` steps.
    pub fn command(&self) -> Option<&str> {
        match &self.action {
            StepAction::Command(template) | StepAction::Iac(template) => Some(template),
            _ => None,
        }
    }
}

/// One compensating command in a rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub original_step_id: u32,
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_serializes_with_tagged_action() {
        let step = Step {
            id: 3,
            name: "IaC Init".into(),
            action: StepAction::Iac("terraform -chdir={iac_dir} init -input=false".into()),
            prerequisites: vec![Prerequisite::ToolAvailable {
                tool: "terraform".into(),
            }],
            validation: None,
            estimated_secs: 60,
            can_skip: false,
            skipped: false,
            rollback_command: None,
            requires_approval: false,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["action"]["kind"], "iac");
        assert_eq!(json["prerequisites"][0]["kind"], "tool_available");
        assert_eq!(step.step_type(), StepType::Iac);

        let back: Step = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
