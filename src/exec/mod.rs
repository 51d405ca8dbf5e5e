//! Command execution: shell resolution, the process runner and the
//! deployment-scoped command service.

pub mod runner;
pub mod service;
pub mod shell;
pub mod workspace;

pub use runner::{
    ChunkCallback, CommandCategory, CommandOutput, CommandRunner, ExecOptions, TimeoutPolicy,
};
pub use service::{CommandService, SuccessHook};
pub use shell::{ShellEnvironment, ShellSettings};
pub use workspace::Workspaces;
