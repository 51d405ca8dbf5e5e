//! Audit trail records. Append-only: nothing in the engine rewrites them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeploymentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub deployment_id: DeploymentId,
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the entry, e.g. `command`, `stage`, `plan`.
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        deployment_id: &DeploymentId,
        level: LogLevel,
        source: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.clone(),
            level,
            message: message.into(),
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }
}
