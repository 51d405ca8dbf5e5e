//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                   |
//! |------------|------------------------------------|
//! | `plan`     | `Plan`                             |
//! | `deploy`   | `Deploy`, `Retry`, `Cancel`        |
//! | `exec`     | `Exec`                             |
//! | `status`   | `Status`, `Logs`                   |
//! | `config`   | `Config`                           |
//! | `logging`  | tracing setup shared by all of them |

pub mod config;
pub mod deploy;
pub mod exec;
pub mod logging;
pub mod plan;
pub mod status;

pub use config::cmd_config;
pub use deploy::{cmd_cancel, cmd_deploy, cmd_retry};
pub use exec::cmd_exec;
pub use logging::init_tracing;
pub use plan::cmd_plan;
pub use status::{cmd_logs, cmd_status};
