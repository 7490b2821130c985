//! Append-only manifest of stored uploads.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::work::{QueueError, SerialStatus, SerialWorkQueue};

use super::types::IngestResult;

/// Writes one JSON line per stored upload, one write at a time.
///
/// A failed write stops the writer: lines still queued are dropped and
/// later calls to [`record`](Self::record) return `false`.
pub struct ManifestWriter {
    path: PathBuf,
    queue: SerialWorkQueue<String>,
}

impl ManifestWriter {
    /// Must be called from within a tokio runtime.
    pub fn new(path: PathBuf, depth: usize) -> Result<Self, QueueError> {
        let target = path.clone();
        let queue = SerialWorkQueue::new(depth, move |line: String| {
            let target = target.clone();
            async move {
                match append_line(&target, &line).await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        error!(path = %target.display(), error = %e, "Manifest write failed, closing manifest");
                        ControlFlow::Break(())
                    }
                }
            }
        })?;
        Ok(Self { path, queue })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a line for `result`. Returns `false` if the writer is closed.
    pub async fn record(&self, result: &IngestResult) -> bool {
        let line = match serde_json::to_string(result) {
            Ok(line) => line,
            Err(e) => {
                warn!(digest = %result.digest, error = %e, "Failed to serialize manifest entry");
                return false;
            }
        };
        self.queue.push(line).await
    }

    /// Waits until every queued line has been written.
    pub async fn flush(&self) {
        self.queue.drain().await;
    }

    pub fn close(&self) {
        self.queue.close();
    }

    pub fn status(&self) -> SerialStatus {
        self.queue.status()
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}
