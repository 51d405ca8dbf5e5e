//! Low-level process runner.
//!
//! `CommandRunner::execute` spawns `<shell> -c <command>` in its own process
//! group, streams stdout/stderr chunks to callbacks as they arrive, and always
//! resolves: on exit, on timeout, or on cancellation. Timeouts escalate from
//! SIGTERM to SIGKILL after a grace period and abandon the readers after a
//! bounded drain, so a call with timeout `T` returns within
//! `T + kill_grace + drain` even when the child ignores SIGTERM.
//!
//! The runner holds no per-deployment state and is safe to call concurrently.

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::shell::ShellEnvironment;
use crate::errors::CommandError;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Receives one decoded output chunk.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Coarse command classes used to pick a default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    Probe,
    Install,
    Build,
    IacApply,
    General,
}

impl CommandCategory {
    pub fn classify(command: &str) -> Self {
        let lower = command.trim().to_lowercase();
        let tokens: Vec<&str> = lower.split_whitespace().collect();

        let is_probe = lower.starts_with("command -v ")
            || lower.starts_with("which ")
            || (tokens.len() == 2 && matches!(tokens[1], "--version" | "version" | "-v" | "info"));
        if is_probe {
            return CommandCategory::Probe;
        }

        let is_iac = tokens
            .iter()
            .any(|t| matches!(*t, "terraform" | "tofu" | "pulumi") || t.starts_with("-chdir="));
        if is_iac && tokens.iter().any(|t| matches!(*t, "apply" | "destroy" | "up")) {
            return CommandCategory::IacApply;
        }

        const INSTALL_PATTERNS: &[&str] = &[
            "npm install",
            "npm ci",
            "yarn install",
            "pnpm install",
            "pip install",
            "go mod download",
            "cargo fetch",
            "dependency:resolve",
            "bundle install",
        ];
        if INSTALL_PATTERNS.iter().any(|p| lower.contains(p)) {
            return CommandCategory::Install;
        }

        if tokens
            .iter()
            .any(|t| matches!(*t, "build" | "package" | "compileall"))
        {
            return CommandCategory::Build;
        }

        CommandCategory::General
    }
}

/// Default timeouts by category plus the termination escalation windows.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub probe: Duration,
    pub install: Duration,
    pub build: Duration,
    pub iac_apply: Duration,
    pub general: Duration,
    /// SIGTERM → SIGKILL grace period.
    pub kill_grace: Duration,
    /// How long readers may keep draining after the process is gone.
    pub drain: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            install: Duration::from_secs(600),
            build: Duration::from_secs(900),
            iac_apply: Duration::from_secs(1800),
            general: Duration::from_secs(300),
            kill_grace: Duration::from_secs(2),
            drain: Duration::from_secs(2),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_category(&self, category: CommandCategory) -> Duration {
        match category {
            CommandCategory::Probe => self.probe,
            CommandCategory::Install => self.install,
            CommandCategory::Build => self.build,
            CommandCategory::IacApply => self.iac_apply,
            CommandCategory::General => self.general,
        }
    }

    pub fn for_command(&self, command: &str) -> Duration {
        self.for_category(CommandCategory::classify(command))
    }
}

/// Per-invocation options.
#[derive(Clone, Default)]
pub struct ExecOptions {
    /// Environment overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Overrides the category default.
    pub timeout: Option<Duration>,
    pub on_stdout: Option<ChunkCallback>,
    pub on_stderr: Option<ChunkCallback>,
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn on_stdout(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Some(Arc::new(callback));
        self
    }

    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Arc::new(callback));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Result of a command that ran to exit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Turn an unsuccessful exit into a `CommandError` carrying stderr.
    pub fn into_result(self, command: &str) -> Result<CommandOutput, CommandError> {
        if self.success {
            return Ok(self);
        }
        match self.exit_code {
            Some(exit_code) => Err(CommandError::NonZeroExit {
                command: command.to_string(),
                exit_code,
                stderr: self.stderr,
            }),
            None => Err(CommandError::Signalled {
                command: command.to_string(),
                stderr: self.stderr,
            }),
        }
    }
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Spawns shell commands with streaming, timeout and cancellation.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: ShellEnvironment,
    policy: TimeoutPolicy,
}

impl CommandRunner {
    pub fn new(shell: ShellEnvironment, policy: TimeoutPolicy) -> Self {
        Self { shell, policy }
    }

    pub fn shell(&self) -> &ShellEnvironment {
        &self.shell
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Run `command` in `working_dir`.
    ///
    /// A non-zero exit is reported as `Ok` with `success == false`; use
    /// [`CommandOutput::into_result`] to convert it. Timeout and cancellation
    /// are always errors.
    pub async fn execute(
        &self,
        working_dir: &Path,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandOutput, CommandError> {
        let timeout = opts
            .timeout
            .unwrap_or_else(|| self.policy.for_command(command));

        let mut cmd = self.shell.command(command);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| CommandError::SpawnFailed {
            command: command.to_string(),
            source,
        })?;
        tracing::debug!(command, pid = ?child.id(), timeout_ms = timeout.as_millis() as u64, "spawned");

        let open = Arc::new(AtomicBool::new(true));
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stdout,
                opts.on_stdout.clone(),
                open.clone(),
                stdout_buf.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stderr,
                opts.on_stderr.clone(),
                open.clone(),
                stderr_buf.clone(),
            )));
        }

        let cancel = opts.cancel.clone().unwrap_or_else(CancellationToken::new);
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(source) => Outcome::WaitFailed(source),
            },
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            open.store(false, Ordering::SeqCst);
            terminate(&mut child, self.policy.kill_grace).await;
        }
        drain(readers, self.policy.drain).await;

        let stdout = take_string(&stdout_buf);
        let stderr = take_string(&stderr_buf);
        let duration = started.elapsed();

        match outcome {
            Outcome::Exited(status) => {
                tracing::debug!(command, code = ?status.code(), ?duration, "exited");
                Ok(CommandOutput {
                    success: status.success(),
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    duration,
                })
            }
            Outcome::TimedOut => {
                tracing::warn!(command, timeout_ms = timeout.as_millis() as u64, "command timed out");
                Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                    stdout,
                    stderr,
                })
            }
            Outcome::Cancelled => {
                tracing::info!(command, "command cancelled");
                Err(CommandError::Cancelled {
                    command: command.to_string(),
                })
            }
            Outcome::WaitFailed(source) => Err(CommandError::Io {
                command: command.to_string(),
                source,
            }),
        }
    }
}

fn take_string(buf: &Mutex<Vec<u8>>) -> String {
    match buf.lock() {
        Ok(mut bytes) => String::from_utf8_lossy(&std::mem::take(&mut *bytes)).into_owned(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
    }
}

/// Read `reader` to EOF, accumulating into `sink` and forwarding decoded
/// chunks to `callback` while `open` is set.
async fn pump<R>(
    mut reader: R,
    callback: Option<ChunkCallback>,
    open: Arc<AtomicBool>,
    sink: Arc<Mutex<Vec<u8>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut decoder = Utf8Chunker::default();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "output reader stopped");
                break;
            }
        };
        let chunk = &buf[..n];
        if let Ok(mut sink) = sink.lock() {
            sink.extend_from_slice(chunk);
        }
        if let Some(ref callback) = callback {
            let text = decoder.push(chunk);
            if !text.is_empty() && open.load(Ordering::SeqCst) {
                callback(&text);
            }
        }
    }
    if let Some(ref callback) = callback {
        let rest = decoder.finish();
        if !rest.is_empty() && open.load(Ordering::SeqCst) {
            callback(&rest);
        }
    }
}

/// Decodes a byte stream into UTF-8 text without splitting multi-byte characters
/// across chunk boundaries.
#[derive(Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end; hold it for the next chunk.
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, Signal::SIGTERM);
        let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
        // Kill the whole group either way so stragglers don't hold the pipes.
        signal_group(pid, Signal::SIGKILL);
        if exited {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "start_kill failed");
    }
    let _ = tokio::time::timeout(grace, child.wait()).await;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        tracing::debug!(pid, ?signal, error = %e, "signal to process group not delivered");
    }
}

/// Wait for the readers up to `limit`, then abandon them.
async fn drain(readers: Vec<JoinHandle<()>>, limit: Duration) {
    let aborts: Vec<_> = readers.iter().map(|h| h.abort_handle()).collect();
    let joined = tokio::time::timeout(limit, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if joined.is_err() {
        tracing::debug!("abandoning output readers after drain limit");
        for abort in aborts {
            abort.abort();
        }
    }
}
