//! Plan preview: `launchpad plan`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use launchpad::DeploymentPlan;
use launchpad::analysis::{ANALYSIS_FILE, read_analysis};
use launchpad::launchpad_config::LaunchpadConfig;
use launchpad::plan::{RenderContext, Step, StepAction};
use launchpad::ui::icons::{GATE, PLAN, SKIP, WARN};

pub async fn cmd_plan(project_dir: &Path, analysis: Option<&Path>, json: bool) -> Result<()> {
    let config = LaunchpadConfig::new(project_dir.to_path_buf())?;
    let analysis_path = analysis
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.project_dir.join(ANALYSIS_FILE));
    let analysis = read_analysis(&analysis_path).await?;

    let plan = DeploymentPlan::build(&analysis, Some(&config.project_dir))
        .with_context(|| format!("Plan for {} is invalid", analysis_path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let ctx = RenderContext {
        image: config.image(),
        iac_dir: config.toml.deploy.iac_dir.clone(),
    };

    println!();
    println!(
        "{}Deployment plan for {} ({})",
        PLAN,
        style(config.project_name()).cyan().bold(),
        analysis.project_type
    );
    println!();
    for step in &plan.steps {
        print_step(step, &ctx);
    }

    if !plan.rollback.is_empty() {
        println!();
        println!("{}", style("Rollback (newest first):").underlined());
        for entry in &plan.rollback {
            println!(
                "  {} {}",
                style(format!("[{}]", entry.original_step_id)).dim(),
                ctx.render(&entry.command)
            );
        }
    }

    println!();
    println!(
        "{} {}-{} minutes",
        style("Estimated time:").dim(),
        plan.estimate.min_minutes,
        plan.estimate.max_minutes
    );

    if !plan.issues.is_empty() {
        println!();
        println!("{}", style("Potential issues:").underlined());
        for issue in &plan.issues {
            println!(
                "  {}{} {}",
                WARN,
                style(&issue.code).yellow(),
                issue.message
            );
        }
    }
    println!();
    Ok(())
}

fn print_step(step: &Step, ctx: &RenderContext) {
    let mut flags = String::new();
    if step.skipped {
        flags.push_str(&format!(" {}", SKIP));
    }
    if step.requires_approval {
        flags.push_str(&format!(" {}", GATE));
    }
    println!(
        "  {} {:<28} {}{}",
        style(format!("{:>2}.", step.id)).bold(),
        step.name,
        style(format!("[{}]", step.step_type())).dim(),
        flags
    );
    let detail = match &step.action {
        StepAction::Command(template) | StepAction::Iac(template) => ctx.render(template),
        StepAction::Validation(predicate) => format!("check: {}", predicate),
        StepAction::Info(message) => message.clone(),
    };
    println!("      {}", style(detail).dim());
    for prerequisite in &step.prerequisites {
        println!("      {} {}", style("requires").dim(), prerequisite);
    }
}
