use crate::plan::ExecutionState;
use crate::ui::icons::{
    CHECK, CLOCK, CROSS, GATE, PLAN, RUNNING, SKIP, SPARKLE, UNDO, WARN, status_icon,
};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use launchpad_common::{Deployment, DeploymentStatus, Event, EventKind, OutputStream};
use std::time::Duration;

/// Terminal UI for a deployment run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Stage spinner: the deployment's current stage
/// - Step bar: plan steps finished out of the plan total, once execution starts
///
/// Everything else (plan summary, step outcomes, rollback) is printed above
/// the bars as it happens.
pub struct DeployUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
}

impl DeployUI {
    /// `verbose` echoes command output lines as they stream.
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix(" Stage");
        stage_bar.enable_steady_tick(Duration::from_millis(100));

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let step_bar = multi.add(ProgressBar::new(0));
        step_bar.set_style(step_style);
        step_bar.set_prefix(" Steps");

        Self {
            multi,
            stage_bar,
            step_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to plain stdout when the
    /// bars are hidden (not a terminal) and to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() {
            println!("{}", msg.as_ref());
        } else if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn handle(&self, event: &Event) {
        match &event.kind {
            EventKind::StageChanged { to, .. } => {
                self.stage_bar
                    .set_message(format!("{}{}", status_icon(*to), style(to).yellow()));
            }
            EventKind::ExecutionStarted { total_steps } => {
                self.step_bar.set_length(*total_steps as u64);
                self.step_bar.set_position(0);
            }
            EventKind::StepStarted { name, .. } => {
                self.step_bar.set_message(name.clone());
            }
            EventKind::StepCompleted { .. } | EventKind::StepSkipped { .. } => {
                self.step_bar.inc(1);
            }
            EventKind::ApprovalRequired { .. } => {
                // The prompt owns the terminal until it is answered.
                self.stage_bar.disable_steady_tick();
            }
            EventKind::ApprovalResolved { .. } => {
                self.stage_bar.enable_steady_tick(Duration::from_millis(100));
            }
            EventKind::CommandOutput { stream, chunk } if self.verbose => {
                for line in chunk.lines() {
                    let line = match stream {
                        OutputStream::Stdout => style(line).dim().to_string(),
                        OutputStream::Stderr => style(line).red().dim().to_string(),
                    };
                    self.print_line(format!("      {}", line));
                }
            }
            _ => {}
        }
        if let Some(line) = describe(&event.kind) {
            self.print_line(line);
        }
    }

    pub fn clear(&self) {
        self.stage_bar.finish_and_clear();
        self.step_bar.finish_and_clear();
    }

    /// Stop the bars and print the final status line.
    pub fn finish(&self, deployment: &Deployment, execution: Option<&ExecutionState>) {
        self.clear();

        if let Some(state) = execution {
            self.print_line(format!(
                "  {} {} completed, {} skipped, {} failed",
                style("Steps:").dim(),
                style(state.completed_steps.len()).green(),
                state.skipped_steps.len(),
                style(state.failed_steps.len()).red()
            ));
            for failure in &state.rollback_failures {
                self.print_line(format!("  {}{}", WARN, style(failure).yellow()));
            }
        }

        let status = deployment.status;
        let label = match status {
            DeploymentStatus::Completed => style(status).green().bold(),
            DeploymentStatus::Failed => style(status).red().bold(),
            _ => style(status).yellow().bold(),
        };
        self.print_line(format!(
            "{}Deployment {} {}",
            status_icon(status),
            style(&deployment.id).cyan(),
            label
        ));
        if status == DeploymentStatus::Failed
            && let Some(change) = deployment.status_history.last()
            && let Some(message) = change.metadata.get("message").and_then(|m| m.as_str())
        {
            self.print_line(format!("  {} {}", style("Reason:").dim(), message));
        }
    }
}

/// One printable line for events worth showing outside the bars.
pub fn describe(kind: &EventKind) -> Option<String> {
    let line = match kind {
        EventKind::PlanGenerated {
            steps,
            estimate_min_minutes,
            estimate_max_minutes,
        } => format!(
            "{}Plan: {} steps, estimated {}-{} min",
            PLAN,
            style(steps).cyan(),
            estimate_min_minutes,
            estimate_max_minutes
        ),
        EventKind::PotentialIssue {
            severity, message, ..
        } => format!("  {}{} {}", WARN, style(severity).yellow(), message),
        EventKind::StepStarted { step_id, name } => {
            format!("  {}{} {}", RUNNING, style(format!("[{}]", step_id)).dim(), name)
        }
        EventKind::StepSkipped { step_id, name } => format!(
            "  {}{} {}",
            SKIP,
            style(format!("[{}]", step_id)).dim(),
            style(name).dim()
        ),
        EventKind::StepInfo { message, .. } => {
            format!("    {} {}", style("→").dim(), style(message).dim())
        }
        EventKind::ApprovalRequired {
            name, timeout_secs, ..
        } => format!(
            "  {}{} requires approval ({}s)",
            GATE,
            style(name).yellow(),
            timeout_secs
        ),
        EventKind::ApprovalResolved { step_id, approved } => {
            if *approved {
                format!("  {}step {} approved", CHECK, step_id)
            } else {
                format!("  {}step {} rejected", CROSS, step_id)
            }
        }
        EventKind::StepCompleted {
            name, duration_ms, ..
        } => format!(
            "  {}{} {}",
            CHECK,
            name,
            style(format!("({})", format_duration(*duration_ms))).dim()
        ),
        EventKind::StepFailed {
            name, code, error, ..
        } => format!(
            "  {}{} {} {}",
            CROSS,
            style(name).red().bold(),
            style(code).red(),
            error
        ),
        EventKind::RollbackStarted { steps } => {
            format!("{}Rolling back {} step(s)", UNDO, style(steps).yellow())
        }
        EventKind::RollbackStep {
            original_step_id,
            command,
            success,
            error,
        } => {
            let icon = if *success { &CHECK } else { &CROSS };
            let mut line = format!(
                "  {}{} {}",
                icon,
                style(format!("[{}]", original_step_id)).dim(),
                command
            );
            if let Some(error) = error {
                line.push_str(&format!(" {}", style(error).red()));
            }
            line
        }
        EventKind::ExecutionFinished { status, .. } if status == "completed" => {
            format!("{}Plan executed", SPARKLE)
        }
        EventKind::CommandFinished {
            timed_out: true,
            command,
            duration_ms,
            ..
        } => format!(
            "  {}{} timed out after {}",
            CLOCK,
            command,
            format_duration(*duration_ms)
        ),
        _ => return None,
    };
    Some(line)
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}
