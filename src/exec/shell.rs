//! Shell and PATH resolution for spawned commands.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::errors::CommandError;

/// Used when neither a configured shell nor a platform default exists.
pub const POSIX_FALLBACK_SHELL: &str = "/bin/sh";

/// Shell preferences from configuration.
#[derive(Debug, Clone, Default)]
pub struct ShellSettings {
    /// Probed before anything else.
    pub preferred: Option<PathBuf>,
    /// Run through a login shell (`-l`) so profile-installed tools resolve.
    pub login: bool,
    /// Extra PATH entries searched before the inherited PATH.
    pub extra_path: Vec<PathBuf>,
}

/// A resolved shell plus the PATH every child inherits.
#[derive(Debug, Clone)]
pub struct ShellEnvironment {
    shell: PathBuf,
    login: bool,
    path: OsString,
}

fn platform_default_shell() -> &'static str {
    if cfg!(target_os = "macos") {
        "/bin/zsh"
    } else {
        "/bin/bash"
    }
}

/// Ordered shell candidates: configured, `$SHELL`, platform default, POSIX fallback.
pub fn shell_candidates(settings: &ShellSettings) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(ref preferred) = settings.preferred {
        candidates.push(preferred.clone());
    }
    if let Some(env_shell) = std::env::var_os("SHELL")
        && !env_shell.is_empty()
    {
        candidates.push(PathBuf::from(env_shell));
    }
    candidates.push(PathBuf::from(platform_default_shell()));
    candidates.push(PathBuf::from(POSIX_FALLBACK_SHELL));

    let mut seen = Vec::new();
    candidates.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
    candidates
}

/// Directories where CLI tools commonly live but that a non-login PATH often lacks.
pub fn well_known_tool_dirs() -> Vec<PathBuf> {
    let mut tool_dirs = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/opt/homebrew/sbin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/bin"),
        PathBuf::from("/usr/sbin"),
        PathBuf::from("/snap/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        tool_dirs.push(home.join(".local/bin"));
        tool_dirs.push(home.join(".cargo/bin"));
        tool_dirs.push(home.join("go/bin"));
        tool_dirs.push(home.join(".npm-global/bin"));
    }
    tool_dirs
}

/// Merge `extra` into `inherited`, de-duplicated and order-preserving.
///
/// Inherited entries keep their positions; extras that are not already present
/// are appended in the order given.
pub fn merge_path(inherited: Option<&std::ffi::OsStr>, extra: &[PathBuf]) -> OsString {
    let mut entries: Vec<PathBuf> = Vec::new();
    if let Some(inherited) = inherited {
        for entry in std::env::split_paths(inherited) {
            if !entry.as_os_str().is_empty() && !entries.contains(&entry) {
                entries.push(entry);
            }
        }
    }
    for entry in extra {
        if !entries.contains(entry) {
            entries.push(entry.clone());
        }
    }
    // join_paths only fails on entries containing the separator; drop those.
    entries.retain(|e| std::env::join_paths([e]).is_ok());
    std::env::join_paths(entries).unwrap_or_default()
}

/// Put `dirs` in front of `path`, dropping their later duplicates.
pub fn prepend_path(path: &std::ffi::OsStr, dirs: &[PathBuf]) -> OsString {
    let rest: Vec<PathBuf> = std::env::split_paths(path).collect();
    let front = merge_path(None, dirs);
    merge_path(Some(front.as_os_str()), &rest)
}

impl ShellEnvironment {
    /// Probe the candidate shells and build the merged PATH.
    pub fn resolve(settings: &ShellSettings) -> Result<Self, CommandError> {
        let candidates = shell_candidates(settings);
        let shell = candidates
            .iter()
            .find(|c| c.is_file())
            .cloned()
            .ok_or_else(|| CommandError::NoShell {
                tried: candidates
                    .iter()
                    .map(|c| c.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        let inherited = merge_path(std::env::var_os("PATH").as_deref(), &well_known_tool_dirs());
        let path = prepend_path(&inherited, &settings.extra_path);

        tracing::debug!(shell = %shell.display(), "resolved shell");
        Ok(Self {
            shell,
            login: settings.login,
            path,
        })
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn path(&self) -> &std::ffi::OsStr {
        &self.path
    }

    /// Build a `<shell> [-l] -c <command>` invocation with the merged PATH.
    pub fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        if self.login {
            cmd.arg("-l");
        }
        cmd.arg("-c").arg(command).env("PATH", &self.path);
        cmd
    }

    /// Find a tool via `command -v`. Any failure, including a timeout, yields `None`.
    pub async fn locate_tool(&self, tool: &str, timeout: Duration) -> Option<PathBuf> {
        if tool.is_empty()
            || !tool
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return None;
        }

        let mut cmd = self.command(&format!("command -v {}", tool));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(tool, error = %e, "tool lookup failed to spawn");
                return None;
            }
            Err(_) => {
                tracing::debug!(tool, "tool lookup timed out");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }

        let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if found.is_empty() {
            None
        } else {
            Some(PathBuf::from(found))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_start_with_preferred_and_end_with_posix() {
        let settings = ShellSettings {
            preferred: Some(PathBuf::from("/opt/custom/fish")),
            ..Default::default()
        };
        let candidates = shell_candidates(&settings);
        assert_eq!(candidates[0], PathBuf::from("/opt/custom/fish"));
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from(POSIX_FALLBACK_SHELL)
        );
    }

    #[test]
    fn test_candidates_are_unique() {
        let settings = ShellSettings {
            preferred: Some(PathBuf::from(POSIX_FALLBACK_SHELL)),
            ..Default::default()
        };
        let candidates = shell_candidates(&settings);
        let fallback_count = candidates
            .iter()
            .filter(|c| c.as_path() == Path::new(POSIX_FALLBACK_SHELL))
            .count();
        assert_eq!(fallback_count, 1);
    }

    #[test]
    fn test_merge_path_dedups_and_preserves_order() {
        let inherited = std::env::join_paths(["/usr/bin", "/bin", "/usr/bin"]).unwrap();
        let merged = merge_path(
            Some(inherited.as_os_str()),
            &[PathBuf::from("/opt/tools"), PathBuf::from("/bin")],
        );
        let entries: Vec<PathBuf> = std::env::split_paths(&merged).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin"),
                PathBuf::from("/opt/tools"),
            ]
        );
    }

    #[test]
    fn test_merge_path_without_inherited() {
        let merged = merge_path(None, &[PathBuf::from("/a"), PathBuf::from("/b")]);
        let entries: Vec<PathBuf> = std::env::split_paths(&merged).collect();
        assert_eq!(entries, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_prepend_path_moves_configured_dirs_first() {
        let path = std::env::join_paths(["/usr/bin", "/opt/tools", "/bin"]).unwrap();
        let merged = prepend_path(&path, &[PathBuf::from("/opt/tools")]);
        let entries: Vec<PathBuf> = std::env::split_paths(&merged).collect();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/opt/tools"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin"),
            ]
        );
    }

    #[test]
    fn test_configured_dirs_shadow_inherited_tools() {
        let settings = ShellSettings {
            extra_path: vec![PathBuf::from("/opt/launchpad-test/shadow")],
            ..Default::default()
        };
        let env = ShellEnvironment::resolve(&settings).unwrap();
        assert_eq!(
            std::env::split_paths(env.path()).next(),
            Some(PathBuf::from("/opt/launchpad-test/shadow"))
        );
    }

    #[test]
    fn test_resolve_falls_back_when_preferred_missing() {
        let settings = ShellSettings {
            preferred: Some(PathBuf::from("/definitely/not/a/shell")),
            ..Default::default()
        };
        let env = ShellEnvironment::resolve(&settings).unwrap();
        assert_ne!(env.shell(), Path::new("/definitely/not/a/shell"));
        assert!(env.shell().is_file());
    }

    #[tokio::test]
    async fn test_locate_tool_finds_sh() {
        let env = ShellEnvironment::resolve(&ShellSettings::default()).unwrap();
        let found = env.locate_tool("sh", Duration::from_secs(5)).await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_locate_tool_missing_is_none() {
        let env = ShellEnvironment::resolve(&ShellSettings::default()).unwrap();
        let found = env
            .locate_tool("launchpad-no-such-tool-xyz", Duration::from_secs(5))
            .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_locate_tool_rejects_shell_metacharacters() {
        let env = ShellEnvironment::resolve(&ShellSettings::default()).unwrap();
        assert!(env.locate_tool("sh; rm -rf /", Duration::from_secs(5)).await.is_none());
    }
}
