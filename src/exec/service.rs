//! Deployment-scoped command execution.
//!
//! `CommandService` wraps the reentrant [`CommandRunner`] with the per-deployment
//! concerns: workspace resolution, at most one blocking process per deployment,
//! event publication, audit persistence and the success notification.

use launchpad_common::{
    DeploymentId, Event, EventKind, EventSink, LogEntry, LogLevel, OutputStream,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::runner::{ChunkCallback, CommandOutput, CommandRunner, ExecOptions};
use super::workspace::Workspaces;
use crate::audit::{AuditSender, AuditTrail};
use crate::errors::CommandError;

const AUDIT_SOURCE: &str = "command";
const AUDIT_FLUSH_LIMIT: Duration = Duration::from_secs(5);

/// Notified after a command exits zero.
///
/// Implementations must not block and must not fail the command; anything
/// slow belongs on a background task.
pub trait SuccessHook: Send + Sync {
    fn command_succeeded(&self, deployment_id: &DeploymentId, command: &str);
}

pub struct CommandService {
    runner: CommandRunner,
    workspaces: Arc<Workspaces>,
    events: Arc<dyn EventSink>,
    audit: AuditTrail,
    success_hook: Option<Arc<dyn SuccessHook>>,
    in_flight: Mutex<HashMap<DeploymentId, CancellationToken>>,
}

/// Clears the in-flight slot however `run` exits.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<DeploymentId, CancellationToken>>,
    deployment_id: DeploymentId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.deployment_id);
    }
}

impl CommandService {
    pub fn new(
        runner: CommandRunner,
        workspaces: Arc<Workspaces>,
        events: Arc<dyn EventSink>,
        audit: AuditTrail,
        success_hook: Option<Arc<dyn SuccessHook>>,
    ) -> Self {
        Self {
            runner,
            workspaces,
            events,
            audit,
            success_hook,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn workspaces(&self) -> &Arc<Workspaces> {
        &self.workspaces
    }

    pub async fn workspace(&self, deployment_id: &DeploymentId) -> std::io::Result<PathBuf> {
        self.workspaces.ensure(deployment_id).await
    }

    pub fn is_busy(&self, deployment_id: &DeploymentId) -> bool {
        self.in_flight
            .lock()
            .map(|m| m.contains_key(deployment_id))
            .unwrap_or(false)
    }

    /// Terminate the deployment's in-flight command, if any.
    pub fn cancel(&self, deployment_id: &DeploymentId) -> bool {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match in_flight.get(deployment_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run `command` in the deployment's workspace.
    ///
    /// Fails with [`CommandError::Busy`] while another command for the same
    /// deployment is running. A cancel token in `opts` is honoured alongside
    /// [`CommandService::cancel`].
    pub async fn run(
        &self,
        deployment_id: &DeploymentId,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandOutput, CommandError> {
        let token = match opts.cancel {
            Some(ref parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if in_flight.contains_key(deployment_id) {
                return Err(CommandError::Busy {
                    deployment_id: deployment_id.clone(),
                });
            }
            in_flight.insert(deployment_id.clone(), token.clone());
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            deployment_id: deployment_id.clone(),
        };

        let cwd = self
            .workspaces
            .ensure(deployment_id)
            .await
            .map_err(|source| CommandError::Io {
                command: command.to_string(),
                source,
            })?;

        self.events.publish(Event::new(
            deployment_id,
            EventKind::CommandStarted {
                command: command.to_string(),
                cwd: cwd.display().to_string(),
            },
        ));
        let writer = self.audit.writer();
        writer.send(LogEntry::new(
            deployment_id,
            LogLevel::Info,
            AUDIT_SOURCE,
            format!("$ {} (cwd: {})", command, cwd.display()),
        ));

        let exec_opts = ExecOptions {
            env: opts.env,
            timeout: opts.timeout,
            on_stdout: Some(self.forwarder(
                deployment_id,
                OutputStream::Stdout,
                opts.on_stdout,
                writer.sender(),
            )),
            on_stderr: Some(self.forwarder(
                deployment_id,
                OutputStream::Stderr,
                opts.on_stderr,
                writer.sender(),
            )),
            cancel: Some(token),
        };

        let result = self.runner.execute(&cwd, command, exec_opts).await;

        let (finished, end_entry) = match &result {
            Ok(output) => (
                EventKind::CommandFinished {
                    command: command.to_string(),
                    success: output.success,
                    exit_code: output.exit_code,
                    duration_ms: output.duration.as_millis() as u64,
                    timed_out: false,
                },
                LogEntry::new(
                    deployment_id,
                    if output.success {
                        LogLevel::Info
                    } else {
                        LogLevel::Error
                    },
                    AUDIT_SOURCE,
                    format!(
                        "exit {} after {}ms: {}",
                        output
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "signal".to_string()),
                        output.duration.as_millis(),
                        command
                    ),
                ),
            ),
            Err(e) => (
                EventKind::CommandFinished {
                    command: command.to_string(),
                    success: false,
                    exit_code: None,
                    duration_ms: 0,
                    timed_out: matches!(e, CommandError::Timeout { .. }),
                },
                LogEntry::new(
                    deployment_id,
                    LogLevel::Error,
                    AUDIT_SOURCE,
                    format!("{} [{}]", e, e.code()),
                ),
            ),
        };
        writer.send(end_entry);
        self.events
            .publish(Event::new(deployment_id, finished));
        writer.finish(AUDIT_FLUSH_LIMIT).await;

        if let Ok(ref output) = result
            && output.success
            && let Some(ref hook) = self.success_hook
        {
            hook.command_succeeded(deployment_id, command);
        }

        result
    }

    /// Wrap a caller's chunk callback with event publication and audit.
    fn forwarder(
        &self,
        deployment_id: &DeploymentId,
        stream: OutputStream,
        user: Option<ChunkCallback>,
        audit: AuditSender,
    ) -> ChunkCallback {
        let events = self.events.clone();
        let deployment_id = deployment_id.clone();
        let level = match stream {
            OutputStream::Stdout => LogLevel::Info,
            OutputStream::Stderr => LogLevel::Warn,
        };
        Arc::new(move |chunk: &str| {
            if let Some(ref user) = user {
                user(chunk);
            }
            events.publish(Event::new(
                &deployment_id,
                EventKind::CommandOutput {
                    stream,
                    chunk: chunk.to_string(),
                },
            ));
            audit.send(LogEntry::new(&deployment_id, level, AUDIT_SOURCE, chunk));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLogStore;
    use crate::events::EventBus;
    use crate::exec::{ShellEnvironment, ShellSettings, TimeoutPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    impl SuccessHook for CountingHook {
        fn command_succeeded(&self, _deployment_id: &DeploymentId, _command: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        service: Arc<CommandService>,
        bus: EventBus,
        trail: AuditTrail,
        hook: Arc<CountingHook>,
        _root: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let bus = EventBus::default();
        let trail = AuditTrail::new(Arc::new(MemoryLogStore::new()));
        let hook = Arc::new(CountingHook::default());
        let runner = CommandRunner::new(
            ShellEnvironment::resolve(&ShellSettings::default()).unwrap(),
            TimeoutPolicy {
                kill_grace: Duration::from_millis(200),
                drain: Duration::from_millis(200),
                ..TimeoutPolicy::default()
            },
        );
        let service = Arc::new(CommandService::new(
            runner,
            Arc::new(Workspaces::new(root.path())),
            Arc::new(bus.clone()),
            trail.clone(),
            Some(hook.clone() as Arc<dyn SuccessHook>),
        ));
        Fixture {
            service,
            bus,
            trail,
            hook,
            _root: root,
        }
    }

    #[tokio::test]
    async fn test_run_publishes_and_audits() {
        let fx = fixture();
        let mut rx = fx.bus.subscribe();
        let id = DeploymentId::new("dep-1");

        let output = fx
            .service
            .run(&id, "echo hello", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.kind.name());
        }
        assert_eq!(
            names,
            vec!["command_started", "command_output", "command_finished"]
        );

        let entries = fx.trail.entries(&id).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].message.starts_with("$ echo hello"));
        assert_eq!(entries[1].message, "hello\n");
        assert!(entries[2].message.starts_with("exit 0"));
        assert_eq!(fx.hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_command_skips_success_hook() {
        let fx = fixture();
        let id = DeploymentId::new("dep-1");
        let output = fx
            .service
            .run(&id, "exit 3", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(fx.hook.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_command_for_same_deployment_is_busy() {
        let fx = fixture();
        let id = DeploymentId::new("dep-1");

        let service = fx.service.clone();
        let first_id = id.clone();
        let first = tokio::spawn(async move {
            service
                .run(&first_id, "sleep 0.5", ExecOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = fx
            .service
            .run(&id, "echo second", ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Busy { .. }));

        assert!(first.await.unwrap().unwrap().success);
        assert!(!fx.service.is_busy(&id));
    }

    #[tokio::test]
    async fn test_different_deployments_run_concurrently() {
        let fx = fixture();
        let a = DeploymentId::new("a");
        let b = DeploymentId::new("b");
        let (ra, rb) = tokio::join!(
            fx.service.run(&a, "sleep 0.2; pwd", ExecOptions::default()),
            fx.service.run(&b, "sleep 0.2; pwd", ExecOptions::default()),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert_ne!(ra.stdout, rb.stdout);
    }

    #[tokio::test]
    async fn test_cancel_terminates_in_flight_command() {
        let fx = fixture();
        let id = DeploymentId::new("dep-1");
        let service = fx.service.clone();
        let run_id = id.clone();
        let handle =
            tokio::spawn(async move { service.run(&run_id, "sleep 30", ExecOptions::default()).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fx.service.cancel(&id));

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert!(!fx.service.cancel(&id));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_on_finished_event() {
        let fx = fixture();
        let mut rx = fx.bus.subscribe();
        let id = DeploymentId::new("dep-1");
        let err = fx
            .service
            .run(
                &id,
                "sleep 30",
                ExecOptions::default().with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");

        let mut timed_out = false;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::CommandFinished { timed_out: t, .. } = event.kind {
                timed_out = t;
            }
        }
        assert!(timed_out);
    }
}
