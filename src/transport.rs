//! Delivery of metrics records.
//!
//! The agent hands every record to a [`MetricsTransport`] on a spawned task.
//! Failures are logged and the record is dropped; nothing is retried.

use crate::core::MetricsRecord;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Boxed future returned by [`MetricsTransport::deliver`].
pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Destination for metrics records.
pub trait MetricsTransport: Send + Sync {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a>;
}

/// Transport error types.
#[derive(Debug)]
pub enum TransportError {
    /// Local file error
    Io(String),
    /// JSON serialization error
    Serialization(String),
    /// Network/HTTP error
    Network(String),
    /// Remote end rejected the record
    Rejected { status: u16, message: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(msg) => write!(f, "Transport IO error: {msg}"),
            TransportError::Serialization(msg) => write!(f, "Transport serialization error: {msg}"),
            TransportError::Network(msg) => write!(f, "Transport network error: {msg}"),
            TransportError::Rejected { status, message } => {
                write!(f, "Record rejected ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Writes every record to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl MetricsTransport for LogTransport {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let json = serde_json::to_string(record)
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            info!(kind = record.kind(), record = %json, "metrics record");
            Ok(())
        })
    }
}

/// Appends records as JSON Lines to a file.
#[derive(Debug)]
pub struct JsonlTransport {
    path: PathBuf,
    // Serializes appends so concurrent deliveries never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// A transport writing to `metrics_<timestamp>.jsonl` inside `dir`.
    pub fn in_directory(dir: &Path) -> Self {
        let filename = format!("metrics_{}.jsonl", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        Self::new(dir.join(filename))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsTransport for JsonlTransport {
    fn deliver<'a>(&'a self, record: &'a MetricsRecord) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let mut line = serde_json::to_string(record)
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            line.push('\n');

            let _guard = self.write_lock.lock().await;
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransportError::Io(e.to_string()))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            file.flush()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            Ok(())
        })
    }
}
