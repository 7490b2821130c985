//! Admission-gated, single-pass ingest into a content-addressed store.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionQueue, Ticket};
use crate::metrics;
use crate::tee::{StreamTee, TeeConfig};
use crate::work::{ordered_map, QueueError, TaskResult};

use super::config::IngestConfig;
use super::error::IngestError;
use super::manifest::ManifestWriter;
use super::types::{IngestRequest, IngestResult, IngestStatus};
use super::validator::HeaderValidator;

#[derive(Debug, Default)]
struct IngestStats {
    in_progress: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
    bytes_stored: AtomicU64,
}

/// Ingests uploads: admit, validate the header, persist, digest, store by
/// digest.
///
/// Each upload is read from its source exactly once. At most
/// `admission_window` uploads stream at a time; the rest wait in FIFO order.
pub struct IngestPipeline {
    config: IngestConfig,
    tee_config: TeeConfig,
    validator: Arc<dyn HeaderValidator>,
    admission: AdmissionQueue,
    manifest: Option<ManifestWriter>,
    stats: IngestStats,
}

impl IngestPipeline {
    /// Creates a pipeline. Must be called from within a tokio runtime when
    /// the manifest is enabled.
    pub fn new(
        config: IngestConfig,
        tee_config: TeeConfig,
        validator: Arc<dyn HeaderValidator>,
    ) -> Result<Self, IngestError> {
        let admission = AdmissionQueue::new(config.admission_window)?;
        let manifest = if config.manifest {
            let writer = ManifestWriter::new(config.manifest_path(), config.manifest_depth)
                .map_err(|e| IngestError::InvalidConfig(e.to_string()))?;
            Some(writer)
        } else {
            None
        };

        info!(
            root = %config.storage_root.display(),
            window = config.admission_window,
            validator = validator.name(),
            algorithm = ?tee_config.digest,
            "Ingest pipeline ready"
        );

        Ok(Self {
            config,
            tee_config,
            validator,
            admission,
            manifest,
            stats: IngestStats::default(),
        })
    }

    pub fn admission(&self) -> &AdmissionQueue {
        &self.admission
    }

    pub fn manifest(&self) -> Option<&ManifestWriter> {
        self.manifest.as_ref()
    }

    /// Store location for content with the given digest.
    pub fn content_path(&self, digest: &str) -> PathBuf {
        let shard = digest.get(..2).unwrap_or(digest);
        self.config.storage_root.join(shard).join(digest)
    }

    /// Withdraws the upload queued or streaming under `session`.
    ///
    /// A waiting upload fails with [`IngestError::NotAdmitted`]; one already
    /// streaming keeps going but frees its slot.
    pub fn cancel_session(&self, session: &str) -> bool {
        self.admission.dequeue_key(session).is_some()
    }

    pub fn status(&self) -> IngestStatus {
        IngestStatus {
            admission: self.admission.snapshot(),
            in_progress: self.stats.in_progress.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            deduplicated: self.stats.deduplicated.load(Ordering::SeqCst),
            bytes_stored: self.stats.bytes_stored.load(Ordering::SeqCst),
        }
    }

    /// Ingests one upload. The admission ticket is always released, whatever
    /// the outcome.
    pub async fn ingest<R>(&self, request: IngestRequest<R>) -> Result<IngestResult, IngestError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let start = Instant::now();
        let name = request.name.clone();
        let ticket = self.admission.enqueue(request.session.clone());
        self.stats.in_progress.fetch_add(1, Ordering::SeqCst);

        let outcome = self.run(&ticket, request, start).await;

        self.admission.dequeue(ticket.id());
        self.stats.in_progress.fetch_sub(1, Ordering::SeqCst);
        let elapsed = start.elapsed().as_secs_f64();

        match &outcome {
            Ok(result) => {
                let label = if result.deduplicated {
                    self.stats.deduplicated.fetch_add(1, Ordering::SeqCst);
                    "deduplicated"
                } else {
                    self.stats.bytes_stored.fetch_add(result.bytes, Ordering::SeqCst);
                    "stored"
                };
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                metrics::INGEST_DURATION
                    .with_label_values(&[label])
                    .observe(elapsed);
                metrics::INGEST_BYTES.inc_by(result.bytes);

                info!(
                    name = %name,
                    digest = %result.digest,
                    bytes = result.bytes,
                    deduplicated = result.deduplicated,
                    "Upload ingested"
                );

                if let Some(manifest) = &self.manifest {
                    if !manifest.record(result).await {
                        warn!(digest = %result.digest, "Manifest closed, entry not recorded");
                    }
                }
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                metrics::INGEST_DURATION
                    .with_label_values(&["failed"])
                    .observe(elapsed);
                warn!(name = %name, ticket = %ticket.id(), reason = e.label(), error = %e, "Upload failed");
            }
        }

        outcome
    }

    /// Ingests `requests` with at most `limit` running at once and returns
    /// their outcomes in request order.
    ///
    /// The admission window still applies on top of `limit`.
    pub async fn ingest_all<R>(
        self: &Arc<Self>,
        requests: Vec<IngestRequest<R>>,
        limit: usize,
    ) -> Result<Vec<TaskResult<IngestResult, IngestError>>, QueueError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pipeline = Arc::clone(self);
        ordered_map(requests, limit, move |request| {
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.ingest(request).await }
        })
        .await
    }

    async fn run<R>(
        &self,
        ticket: &Ticket,
        request: IngestRequest<R>,
        start: Instant,
    ) -> Result<IngestResult, IngestError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let IngestRequest {
            name,
            source,
            expected_len,
            ..
        } = request;

        if !self.admission.wait(ticket).await {
            return Err(IngestError::NotAdmitted(ticket.id()));
        }
        debug!(ticket = %ticket.id(), name = %name, "Upload admitted");

        let tee = StreamTee::new(source, expected_len, self.tee_config.clone())?;

        // Dropping the tee on rejection cancels the read.
        let header = tee.header().await;
        let media_type = self.validator.validate(&header).await?;

        let partial_dir = self.config.partial_dir();
        ensure_dir(&partial_dir).await?;
        let partial = partial_dir.join(format!("{}.part", Uuid::new_v4()));

        let written = async {
            let bytes = tee.write_file(&partial).await?;
            let digest = tee.digest().await?;
            Ok::<_, IngestError>((bytes, digest))
        }
        .await;
        let (bytes, digest) = match written {
            Ok(written) => written,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        let destination = self.content_path(&digest);
        let deduplicated = match commit(&partial, &destination).await {
            Ok(deduplicated) => deduplicated,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };

        Ok(IngestResult {
            name,
            digest,
            algorithm: tee.algorithm(),
            bytes,
            path: destination,
            media_type,
            deduplicated,
            ingested_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("config", &self.config)
            .field("validator", &self.validator.name())
            .field("admission", &self.admission)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Moves `partial` to `destination`. Returns `true` if identical content was
/// already stored, in which case `partial` is removed instead.
async fn commit(partial: &Path, destination: &Path) -> Result<bool, IngestError> {
    if fs::try_exists(destination).await.unwrap_or(false) {
        debug!(path = %destination.display(), "Content already stored");
        discard(partial).await;
        return Ok(true);
    }

    if let Some(parent) = destination.parent() {
        ensure_dir(parent).await?;
    }

    let move_failed = |error: std::io::Error| IngestError::MoveFailed {
        source_path: partial.to_path_buf(),
        destination: destination.to_path_buf(),
        error,
    };

    if try_atomic_move(partial, destination)
        .await
        .map_err(move_failed)?
    {
        return Ok(false);
    }

    // Partial directory is on another filesystem.
    debug!(
        from = %partial.display(),
        to = %destination.display(),
        "Cross-device move, falling back to copy"
    );
    fs::copy(partial, destination).await.map_err(move_failed)?;
    discard(partial).await;
    Ok(false)
}

/// Attempts a rename. Returns `Ok(false)` if the paths are on different
/// filesystems.
async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(true),
        Err(e) => {
            // EXDEV is 18 on Linux
            if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) {
                Ok(false)
            } else {
                Err(e)
            }
        }
    }
}

async fn ensure_dir(path: &Path) -> Result<(), IngestError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| IngestError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source,
        })
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::validator::{AcceptAll, PrefixValidator};
    use crate::tee::DigestAlgorithm;
    use crate::testing::fixtures::{pattern, sha256_hex};
    use crate::testing::{MockSource, MockValidator};
    use std::time::Duration;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir, window: usize, validator: Arc<dyn HeaderValidator>) -> IngestPipeline {
        let config = IngestConfig::default()
            .with_admission_window(window)
            .with_storage_root(dir.path().to_path_buf())
            .with_manifest(false);
        IngestPipeline::new(config, TeeConfig::default(), validator).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_by_digest() {
        let dir = TempDir::new().unwrap();
        let validator = Arc::new(MockValidator::new());
        let pipeline = pipeline(&dir, 2, validator.clone());
        let data = pattern(2048);

        let result = pipeline
            .ingest(IngestRequest::new("a.bin", MockSource::new(data.clone()), 2048))
            .await
            .unwrap();

        assert_eq!(result.digest, sha256_hex(&data));
        assert_eq!(result.algorithm, DigestAlgorithm::Sha256);
        assert_eq!(result.bytes, 2048);
        assert!(!result.deduplicated);
        assert_eq!(result.path, dir.path().join(&result.digest[..2]).join(&result.digest));
        assert_eq!(fs::read(&result.path).await.unwrap(), data);

        let headers = validator.recorded_headers().await;
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0], data[..1024].to_vec());

        let status = pipeline.status();
        assert_eq!(status.completed, 1);
        assert_eq!(status.bytes_stored, 2048);
        assert_eq!(status.in_progress, 0);
        assert!(status.admission.order.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_content_deduplicated() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, 2, Arc::new(AcceptAll));
        let data = b"same bytes".to_vec();

        let first = pipeline
            .ingest(IngestRequest::new("one", MockSource::new(data.clone()), 0))
            .await
            .unwrap();
        let second = pipeline
            .ingest(IngestRequest::new("two", MockSource::new(data), 0))
            .await
            .unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.path, second.path);
        assert_eq!(pipeline.status().deduplicated, 1);

        let mut partials = fs::read_dir(dir.path().join(".partial")).await.unwrap();
        assert!(partials.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_header_stops_reading() {
        let dir = TempDir::new().unwrap();
        let validator = PrefixValidator::new().with_type(b"%PDF-".to_vec(), "application/pdf");
        let pipeline = pipeline(&dir, 1, Arc::new(validator));

        let source = MockSource::new(pattern(64 * 1024)).with_max_read(1024);
        let reads = source.read_counter();
        let err = pipeline
            .ingest(IngestRequest::new("evil.exe", source, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Rejected { .. }));
        assert!(reads.load(Ordering::SeqCst) < 64);
        assert_eq!(pipeline.status().failed, 1);
        assert!(pipeline.admission().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_removes_partial() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, 1, Arc::new(AcceptAll));

        let source = MockSource::new(pattern(4096)).fail_after(3000);
        let err = pipeline
            .ingest(IngestRequest::new("broken", source, 4096))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Stream(_)));
        let mut partials = fs::read_dir(dir.path().join(".partial")).await.unwrap();
        assert!(partials.next_entry().await.unwrap().is_none());
        assert!(pipeline.admission().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_session_not_admitted() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(pipeline(&dir, 1, Arc::new(AcceptAll)));

        let slow = MockSource::new(pattern(256))
            .with_max_read(16)
            .with_delay(Duration::from_millis(20));
        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .ingest(IngestRequest::new("slow", slow, 256).with_session("s1"))
                    .await
            })
        };
        let second = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .ingest(
                        IngestRequest::new("queued", MockSource::new(b"x".to_vec()), 1)
                            .with_session("s2"),
                    )
                    .await
            })
        };

        while pipeline.admission().find("s2").is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(pipeline.cancel_session("s2"));

        let second = second.await.unwrap();
        assert!(matches!(second, Err(IngestError::NotAdmitted(_))));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_ingest_all_preserves_order() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(pipeline(&dir, 4, Arc::new(AcceptAll)));

        let requests: Vec<_> = (0..4u8)
            .map(|i| {
                let delay = Duration::from_millis(40 - i as u64 * 10);
                let source = MockSource::new(vec![i; 100]).with_delay(delay);
                IngestRequest::new(format!("file-{i}"), source, 100)
            })
            .collect();

        let results = pipeline.ingest_all(requests, 4).await.unwrap();
        let names: Vec<_> = results
            .into_iter()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["file-0", "file-1", "file-2", "file-3"]);
    }

    #[tokio::test]
    async fn test_manifest_records_results() {
        let dir = TempDir::new().unwrap();
        let config = IngestConfig::default().with_storage_root(dir.path().to_path_buf());
        let pipeline = IngestPipeline::new(config, TeeConfig::default(), Arc::new(AcceptAll)).unwrap();

        let result = pipeline
            .ingest(IngestRequest::new("m", MockSource::new(b"manifest".to_vec()), 8))
            .await
            .unwrap();
        let manifest = pipeline.manifest().unwrap();
        manifest.flush().await;

        let content = fs::read_to_string(manifest.path()).await.unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains(&result.digest));
    }

    #[tokio::test]
    async fn test_content_path_sharding() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir, 1, Arc::new(AcceptAll));
        assert_eq!(
            pipeline.content_path("abcdef"),
            dir.path().join("ab").join("abcdef")
        );
    }
}
