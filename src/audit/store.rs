use anyhow::{Context, Result};
use async_trait::async_trait;
use launchpad_common::{DeploymentId, LogEntry, LogStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Keeps entries in memory. Used by tests and by `launchpad exec` without a state dir.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Mutex<HashMap<DeploymentId, Vec<LogEntry>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .await
            .entry(entry.deployment_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn entries(&self, deployment_id: &DeploymentId) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(deployment_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSON Lines file per deployment under `audit_dir`.
#[derive(Debug)]
pub struct JsonlLogStore {
    audit_dir: PathBuf,
    // Serializes appends so lines from concurrent writers never interleave.
    write_lock: Mutex<()>,
}

impl JsonlLogStore {
    pub fn new(audit_dir: &Path) -> Self {
        Self {
            audit_dir: audit_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn file_for(&self, deployment_id: &DeploymentId) -> PathBuf {
        self.audit_dir
            .join(format!("{}.jsonl", deployment_id.file_stem()))
    }
}

#[async_trait]
impl LogStore for JsonlLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize log entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.audit_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.audit_dir.display()))?;
        let path = self.file_for(&entry.deployment_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn entries(&self, deployment_id: &DeploymentId) -> Result<Vec<LogEntry>> {
        let path = self.file_for(deployment_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line from a crash shouldn't hide the rest of the trail.
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping unreadable audit line"
                ),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_common::LogLevel;
    use tempfile::tempdir;

    fn entry(id: &DeploymentId, message: &str) -> LogEntry {
        LogEntry::new(id, LogLevel::Info, "command", message)
    }

    #[tokio::test]
    async fn test_memory_store_keeps_order_per_deployment() {
        let store = MemoryLogStore::new();
        let a = DeploymentId::new("a");
        let b = DeploymentId::new("b");
        store.append(&entry(&a, "one")).await.unwrap();
        store.append(&entry(&b, "other")).await.unwrap();
        store.append(&entry(&a, "two")).await.unwrap();

        let messages: Vec<_> = store
            .entries(&a)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_and_reads_back() {
        let dir = tempdir().unwrap();
        let store = JsonlLogStore::new(&dir.path().join("audit"));
        let id = DeploymentId::new("dep-1");

        store.append(&entry(&id, "start")).await.unwrap();
        store.append(&entry(&id, "end")).await.unwrap();

        let entries = store.entries(&id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "start");
        assert_eq!(entries[1].message, "end");

        let raw = std::fs::read_to_string(store.file_for(&id)).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlLogStore::new(dir.path());
        assert!(store
            .entries(&DeploymentId::new("never"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_skips_torn_line() {
        let dir = tempdir().unwrap();
        let store = JsonlLogStore::new(dir.path());
        let id = DeploymentId::new("dep-2");
        store.append(&entry(&id, "kept")).await.unwrap();
        let mut raw = std::fs::read_to_string(store.file_for(&id)).unwrap();
        raw.push_str("{\"deployment_id\":\"dep-2\",\"lev");
        std::fs::write(store.file_for(&id), raw).unwrap();

        let entries = store.entries(&id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }
}
