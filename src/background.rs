//! Fire-and-forget side effects.
//!
//! Work spawned here never reports back to the caller. Failures are logged at
//! `warn` and dropped; panics stay inside the task.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;

/// Run `fut` on the runtime, logging (not propagating) its error.
pub fn spawn_best_effort<F, E>(label: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            tracing::warn!(task = label, error = %e, "best-effort task failed");
        }
    })
}
