use launchpad_common::{DeploymentId, LogEntry, LogLevel, LogStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Best-effort writer over a [`LogStore`].
///
/// Persistence failures are logged with `tracing::warn!` and never returned:
/// losing an audit line must not fail the operation being audited.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn LogStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: LogEntry) {
        if let Err(e) = self.store.append(&entry).await {
            tracing::warn!(
                deployment = %entry.deployment_id,
                source = %entry.source,
                error = %e,
                "failed to persist audit entry"
            );
        }
    }

    pub async fn info(&self, deployment_id: &DeploymentId, source: &str, message: impl Into<String>) {
        self.record(LogEntry::new(deployment_id, LogLevel::Info, source, message))
            .await;
    }

    pub async fn error(&self, deployment_id: &DeploymentId, source: &str, message: impl Into<String>) {
        self.record(LogEntry::new(deployment_id, LogLevel::Error, source, message))
            .await;
    }

    pub async fn entries(&self, deployment_id: &DeploymentId) -> anyhow::Result<Vec<LogEntry>> {
        self.store.entries(deployment_id).await
    }

    /// Start a background writer fed through a channel.
    ///
    /// Entries are appended in send order. Synchronous callers (output
    /// callbacks) can enqueue without awaiting the store.
    pub fn writer(&self) -> AuditWriter {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterMessage>();
        let trail = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    WriterMessage::Entry(entry) => trail.record(entry).await,
                    WriterMessage::Close => break,
                }
            }
        });
        AuditWriter {
            sender: AuditSender { tx },
            handle,
        }
    }
}

enum WriterMessage {
    Entry(LogEntry),
    Close,
}

/// Cloneable, synchronous handle for enqueueing entries.
#[derive(Clone)]
pub struct AuditSender {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl AuditSender {
    pub fn send(&self, entry: LogEntry) {
        if self.tx.send(WriterMessage::Entry(entry)).is_err() {
            tracing::debug!("audit writer closed; dropping entry");
        }
    }
}

/// Handle to a running audit writer task.
pub struct AuditWriter {
    sender: AuditSender,
    handle: JoinHandle<()>,
}

impl AuditWriter {
    pub fn sender(&self) -> AuditSender {
        self.sender.clone()
    }

    pub fn send(&self, entry: LogEntry) {
        self.sender.send(entry);
    }

    /// Flush everything sent so far, waiting at most `limit`.
    ///
    /// Entries sent through outstanding [`AuditSender`]s after this call are dropped.
    pub async fn finish(self, limit: Duration) {
        let AuditWriter { sender, handle } = self;
        let _ = sender.tx.send(WriterMessage::Close);
        let abort = handle.abort_handle();
        if tokio::time::timeout(limit, handle).await.is_err() {
            tracing::warn!("audit writer did not flush in time");
            abort.abort();
        }
    }
}
