//! Shared UI icons.

use console::Emoji;
use launchpad_common::DeploymentStatus;

// Outcome indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Stage indicators
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static ANALYZE: Emoji<'_, '_> = Emoji("🔍 ", "[A]");
pub static PLAN: Emoji<'_, '_> = Emoji("📋 ", "[P]");
pub static BUILD: Emoji<'_, '_> = Emoji("🏗️  ", "[G]");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "[D]");
pub static VERIFY: Emoji<'_, '_> = Emoji("🩺 ", "[V]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[X]");

// Step indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static GATE: Emoji<'_, '_> = Emoji("🔐 ", "[?]");
pub static UNDO: Emoji<'_, '_> = Emoji("↩️  ", "[<]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

pub fn status_icon(status: DeploymentStatus) -> &'static Emoji<'static, 'static> {
    match status {
        DeploymentStatus::Pending => &PENDING,
        DeploymentStatus::Analyzing => &ANALYZE,
        DeploymentStatus::Checking => &PLAN,
        DeploymentStatus::Generating => &BUILD,
        DeploymentStatus::Deploying => &ROCKET,
        DeploymentStatus::Verifying => &VERIFY,
        DeploymentStatus::Completed => &CHECK,
        DeploymentStatus::Failed => &CROSS,
        DeploymentStatus::Cancelled => &STOP,
    }
}
