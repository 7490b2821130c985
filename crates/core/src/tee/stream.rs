//! Single-pass stream tee.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::metrics;

use super::config::TeeConfig;
use super::digest::{DigestAlgorithm, StreamHasher};
use super::error::TeeError;
use super::output::TeeOutput;

type Source = Box<dyn AsyncRead + Send + Unpin>;
type DigestSlot = Option<Result<String, TeeError>>;

/// What the tee's callers currently want from the source.
///
/// Flags only ever go from `false` to `true`.
#[derive(Debug, Clone, Copy, Default)]
struct Demand {
    /// Read until the header is complete, then pause.
    header: bool,
    /// Read to the end.
    full: bool,
    /// The output stream has been handed out.
    output: bool,
}

/// Wraps one non-seekable source and reads it exactly once.
///
/// On that single pass the tee captures the first `header_size` bytes,
/// feeds every byte into a running digest, and forwards every byte to one
/// output stream. The three accessors may be used in any order and from
/// any number of tasks:
///
/// - [`header`](Self::header) reads only as far as the header and then
///   pauses the source until something else resumes it
/// - [`output`](Self::output) resumes reading and hands out the byte stream;
///   bytes read before it was taken are replayed first
/// - [`digest`](Self::digest) resumes reading and resolves once the source
///   ends, whether or not the output is being drained
///
/// A source error is forwarded to the output, resolves header waiters with
/// the partial header, and resolves digest waiters with the error. Dropping
/// the tee while the source is paused cancels the session.
pub struct StreamTee {
    config: TeeConfig,
    expected_len: u64,
    bytes_read: Arc<AtomicU64>,
    demand: watch::Sender<Demand>,
    header: watch::Receiver<Option<Bytes>>,
    digest: watch::Receiver<DigestSlot>,
    /// Present until the first operation starts the drive.
    driver: Mutex<Option<Driver>>,
    output: Mutex<Option<mpsc::Receiver<io::Result<Bytes>>>>,
}

impl StreamTee {
    /// Creates a tee over `source`.
    ///
    /// `expected_len` is only used for [`progress`](Self::progress); pass 0
    /// when unknown.
    pub fn new<R>(source: R, expected_len: u64, config: TeeConfig) -> Result<Self, TeeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if config.header_size == 0 {
            return Err(TeeError::InvalidConfig("header_size must be at least 1".to_string()));
        }
        if config.chunk_size == 0 {
            return Err(TeeError::InvalidConfig("chunk_size must be at least 1".to_string()));
        }

        let (demand_tx, demand_rx) = watch::channel(Demand::default());
        let (header_tx, header_rx) = watch::channel(None);
        let (digest_tx, digest_rx) = watch::channel(None);
        let (output_tx, output_rx) = mpsc::channel(config.output_buffer.max(1));
        let bytes_read = Arc::new(AtomicU64::new(0));

        let driver = Driver {
            source: Box::new(source),
            header_size: config.header_size,
            chunk_size: config.chunk_size,
            hasher: config.digest.hasher(),
            demand: demand_rx,
            header_tx,
            digest_tx,
            output: Some(output_tx),
            replay: VecDeque::new(),
            captured: BytesMut::with_capacity(config.header_size),
            header_sent: false,
            bytes_read: Arc::clone(&bytes_read),
        };

        Ok(Self {
            config,
            expected_len,
            bytes_read,
            demand: demand_tx,
            header: header_rx,
            digest: digest_rx,
            driver: Mutex::new(Some(driver)),
            output: Mutex::new(Some(output_rx)),
        })
    }

    /// Creates a tee with default configuration.
    pub fn with_defaults<R>(source: R, expected_len: u64) -> Result<Self, TeeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(source, expected_len, TeeConfig::default())
    }

    pub fn header_size(&self) -> usize {
        self.config.header_size
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.config.digest
    }

    /// Bytes read from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Fraction of the expected length read so far, if the length is known.
    pub fn progress(&self) -> Option<f64> {
        if self.expected_len == 0 {
            return None;
        }
        Some((self.bytes_read() as f64 / self.expected_len as f64).min(1.0))
    }

    /// Returns the first `header_size` bytes of the source.
    ///
    /// Fewer bytes are returned when the source ends or fails before the
    /// header is complete. Once known, the header is returned without
    /// touching the source again.
    pub async fn header(&self) -> Bytes {
        if let Some(header) = self.header.borrow().clone() {
            return header;
        }
        self.kick(|d| &mut d.header);

        let mut rx = self.header.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(header) => header.clone(),
            // Driver gone without publishing; only happens on runtime shutdown.
            Err(_) => None,
        };
        settled.unwrap_or_default()
    }

    /// Returns the hex digest of the entire source.
    ///
    /// Resolves only after the source has ended. A source failure or
    /// cancellation resolves with the error instead.
    pub async fn digest(&self) -> Result<String, TeeError> {
        if let Some(digest) = self.digest.borrow().clone() {
            return digest;
        }
        self.kick(|d| &mut d.full);

        let mut rx = self.digest.clone();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(digest) => digest.clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(TeeError::Cancelled))
    }

    /// Hands out the output stream and resumes reading.
    ///
    /// The stream replays every byte the source has produced or will
    /// produce. It can be taken once.
    pub fn output(&self) -> Result<TeeOutput, TeeError> {
        let rx = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TeeError::OutputTaken)?;

        self.demand.send_modify(|d| {
            d.output = true;
            d.full = true;
        });
        self.start();
        Ok(TeeOutput::new(rx))
    }

    /// Drains the output into a file at `path` and waits for completion.
    ///
    /// Returns the number of bytes written.
    pub async fn write_file(&self, path: impl AsRef<Path>) -> Result<u64, TeeError> {
        let path = path.as_ref();
        let mut output = self.output()?;
        let file = File::create(path)
            .await
            .map_err(|e| TeeError::write(path, e))?;
        let mut writer = BufWriter::new(file);

        let mut written = 0u64;
        while let Some(chunk) = output.chunk().await {
            let chunk = chunk.map_err(|e| TeeError::Source(Arc::new(e)))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TeeError::write(path, e))?;
            written += chunk.len() as u64;
        }

        writer.flush().await.map_err(|e| TeeError::write(path, e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| TeeError::write(path, e))?;

        debug!(path = %path.display(), written, "Tee output written to file");
        Ok(written)
    }

    /// Raises one demand flag and makes sure the driver is running.
    fn kick(&self, flag: impl FnOnce(&mut Demand) -> &mut bool) {
        self.demand.send_if_modified(|d| {
            let slot = flag(d);
            let raised = !*slot;
            *slot = true;
            raised
        });
        self.start();
    }

    /// Spawns the driver on first use; later calls are no-ops.
    fn start(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            debug!(expected_len = self.expected_len, "Starting stream tee");
            tokio::spawn(driver.run());
        }
    }
}

impl std::fmt::Debug for StreamTee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTee")
            .field("header_size", &self.config.header_size)
            .field("digest", &self.config.digest)
            .field("expected_len", &self.expected_len)
            .field("bytes_read", &self.bytes_read())
            .finish()
    }
}

/// The single reader of the source. Owns every piece of session state that
/// is mutated during the pass.
struct Driver {
    source: Source,
    header_size: usize,
    chunk_size: usize,
    hasher: StreamHasher,
    demand: watch::Receiver<Demand>,
    header_tx: watch::Sender<Option<Bytes>>,
    digest_tx: watch::Sender<DigestSlot>,
    /// `None` once the consumer dropped the output.
    output: Option<mpsc::Sender<io::Result<Bytes>>>,
    /// Chunks read but not yet handed to the output: everything before the
    /// output is taken, then whatever a slow consumer has no room for.
    replay: VecDeque<Bytes>,
    captured: BytesMut,
    header_sent: bool,
    bytes_read: Arc<AtomicU64>,
}

impl Driver {
    async fn run(mut self) {
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let header_sent = self.header_sent;
            let resumed = self
                .demand
                .wait_for(|d| d.full || (d.header && !header_sent))
                .await
                .is_ok();
            if !resumed {
                // The tee was dropped while the drive was paused.
                self.cancel();
                return;
            }

            match self.source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    self.absorb(&chunk);
                    self.forward(chunk);
                }
                Err(e) => {
                    self.fail(e).await;
                    return;
                }
            }
        }

        self.finish().await;
    }

    /// Updates counters, digest and header with one chunk.
    fn absorb(&mut self, chunk: &Bytes) {
        self.hasher.update(chunk);
        self.bytes_read
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        metrics::TEE_BYTES.inc_by(chunk.len() as u64);

        if !self.header_sent {
            let take = (self.header_size - self.captured.len()).min(chunk.len());
            self.captured.extend_from_slice(&chunk[..take]);
            if self.captured.len() == self.header_size {
                self.publish_header();
            }
        }
    }

    fn publish_header(&mut self) {
        if !self.header_sent {
            self.header_sent = true;
            let header = self.captured.split().freeze();
            debug!(len = header.len(), "Tee header captured");
            self.header_tx.send_replace(Some(header));
        }
    }

    /// Queues a chunk for the output and hands over whatever fits.
    ///
    /// Never waits on the consumer: chunks the output has no room for stay
    /// parked until a later chunk or the end of the source.
    fn forward(&mut self, chunk: Bytes) {
        let taken = self.demand.borrow().output;
        if taken && self.output.is_none() {
            return;
        }
        self.replay.push_back(chunk);
        if taken {
            self.pump();
        }
    }

    /// Moves parked chunks into the output while it has capacity.
    fn pump(&mut self) {
        let Some(tx) = &self.output else {
            self.replay.clear();
            return;
        };
        while let Some(chunk) = self.replay.pop_front() {
            match tx.try_send(Ok(chunk)) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    if let Ok(chunk) = item {
                        self.replay.push_front(chunk);
                    }
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Tee output dropped, continuing without forwarding");
                    self.output = None;
                    self.replay.clear();
                    return;
                }
            }
        }
    }

    async fn flush_replay(&mut self) {
        while let Some(chunk) = self.replay.pop_front() {
            self.send(Ok(chunk)).await;
            if self.output.is_none() {
                self.replay.clear();
            }
        }
    }

    async fn send(&mut self, item: io::Result<Bytes>) {
        if let Some(tx) = &self.output {
            if tx.send(item).await.is_err() {
                debug!("Tee output dropped, continuing without forwarding");
                self.output = None;
            }
        }
    }

    /// Waits for the output to be taken when there is something left to
    /// replay. Returns `false` if the tee was dropped first.
    async fn await_output(&mut self) -> bool {
        self.demand.wait_for(|d| d.output).await.is_ok()
    }

    async fn finish(mut self) {
        self.publish_header();
        let hasher = std::mem::replace(&mut self.hasher, DigestAlgorithm::Sha256.hasher());
        let digest = hasher.finalize_hex();
        debug!(
            bytes = self.bytes_read.load(Ordering::Relaxed),
            %digest,
            "Tee source ended"
        );
        self.digest_tx.send_replace(Some(Ok(digest)));
        metrics::TEE_SESSIONS.with_label_values(&["completed"]).inc();

        if !self.replay.is_empty() && self.await_output().await {
            self.flush_replay().await;
        }
        // Dropping the sender ends the output stream.
    }

    async fn fail(mut self, error: io::Error) {
        warn!(
            error = %error,
            bytes = self.bytes_read.load(Ordering::Relaxed),
            "Tee source failed"
        );
        let error = TeeError::Source(Arc::new(error));
        self.publish_header();
        self.digest_tx.send_replace(Some(Err(error.clone())));
        metrics::TEE_SESSIONS.with_label_values(&["failed"]).inc();

        if self.await_output().await {
            self.flush_replay().await;
            self.send(Err(error.to_io())).await;
        }
    }

    fn cancel(mut self) {
        debug!("Tee dropped before the source ended");
        self.publish_header();
        self.digest_tx.send_replace(Some(Err(TeeError::Cancelled)));
        metrics::TEE_SESSIONS.with_label_values(&["cancelled"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSource;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn small_config() -> TeeConfig {
        TeeConfig::default().with_header_size(8).with_chunk_size(3)
    }

    #[tokio::test]
    async fn test_zero_sizes_rejected() {
        let config = TeeConfig::default().with_header_size(0);
        assert!(matches!(
            StreamTee::new(tokio::io::empty(), 0, config),
            Err(TeeError::InvalidConfig(_))
        ));
        let config = TeeConfig::default().with_chunk_size(0);
        assert!(StreamTee::new(tokio::io::empty(), 0, config).is_err());
    }

    #[tokio::test]
    async fn test_header_pauses_source() {
        let data = sample(30);
        let source = MockSource::new(data.clone());
        let reads = source.read_counter();
        let tee = StreamTee::new(source, 30, small_config()).unwrap();

        let header = tee.header().await;
        assert_eq!(&header[..], &data[..8]);

        // Chunks of 3 bytes: the header completes on the third read.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(tee.bytes_read(), 9);
        assert_eq!(reads.load(Ordering::SeqCst), 3);

        // Cached, no further reads.
        assert_eq!(tee.header().await, header);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_header_then_output_replays_everything() {
        let data = sample(50);
        let tee = StreamTee::new(MockSource::new(data.clone()), 50, small_config()).unwrap();

        let header = tee.header().await;
        let output = tee.output().unwrap().read_all().await.unwrap();
        let digest = tee.digest().await.unwrap();

        assert_eq!(&header[..], &data[..8]);
        assert_eq!(output, data);
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(&data));
        assert_eq!(tee.progress(), Some(1.0));
    }

    #[tokio::test]
    async fn test_digest_before_output_is_decoupled() {
        let data = sample(100);
        let source = MockSource::new(data.clone());
        let reads = source.read_counter();
        let tee = StreamTee::new(source, 0, small_config()).unwrap();

        // Nobody drains the output yet; the digest still resolves.
        let digest = tee.digest().await.unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(&data));
        let reads_after_digest = reads.load(Ordering::SeqCst);

        let output = tee.output().unwrap().read_all().await.unwrap();
        assert_eq!(output, data);
        assert_eq!(&tee.header().await[..], &data[..8]);
        assert_eq!(reads.load(Ordering::SeqCst), reads_after_digest);
        assert_eq!(tee.progress(), None);
    }

    #[tokio::test]
    async fn test_undrained_output_does_not_stall_digest() {
        let data = sample(4096);
        let config = TeeConfig::default()
            .with_header_size(1024)
            .with_chunk_size(64)
            .with_output_buffer(2);
        let tee = StreamTee::new(MockSource::new(data.clone()), 4096, config).unwrap();

        // Output taken first and left unread while waiting on the digest.
        let output = tee.output().unwrap();
        let digest = tokio::time::timeout(std::time::Duration::from_secs(2), tee.digest())
            .await
            .expect("digest waited on the output consumer")
            .unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(&data));
        assert_eq!(tee.bytes_read(), 4096);

        assert_eq!(output.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_undrained_output_does_not_stall_header() {
        let data = sample(4096);
        let config = TeeConfig::default()
            .with_header_size(1024)
            .with_chunk_size(64)
            .with_output_buffer(2);
        let tee = StreamTee::new(MockSource::new(data.clone()), 4096, config).unwrap();

        let mut output = tee.output().unwrap();
        let header = tokio::time::timeout(std::time::Duration::from_secs(2), tee.header())
            .await
            .expect("header waited on the output consumer");
        assert_eq!(&header[..], &data[..1024]);

        let mut replayed = Vec::new();
        while let Some(chunk) = output.chunk().await {
            replayed.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(replayed, data);
        assert_eq!(tee.digest().await.unwrap(), DigestAlgorithm::Sha256.digest(&data));
    }

    #[tokio::test]
    async fn test_short_source_yields_short_header() {
        let tee = StreamTee::new(MockSource::new(b"abc".to_vec()), 3, small_config()).unwrap();
        assert_eq!(&tee.header().await[..], b"abc");
        assert_eq!(tee.digest().await.unwrap(), DigestAlgorithm::Sha256.digest(b"abc"));
    }

    #[tokio::test]
    async fn test_output_taken_once() {
        let tee = StreamTee::with_defaults(tokio::io::empty(), 0).unwrap();
        let _output = tee.output().unwrap();
        assert!(matches!(tee.output(), Err(TeeError::OutputTaken)));
    }

    #[tokio::test]
    async fn test_source_error_settles_waiters() {
        let data = sample(5);
        let source = MockSource::new(data.clone()).fail_after(5);
        let tee = StreamTee::new(source, 0, small_config()).unwrap();

        let header = tee.header().await;
        assert_eq!(&header[..], &data[..]);

        let err = tee.digest().await.unwrap_err();
        assert!(matches!(err, TeeError::Source(_)));

        let mut output = tee.output().unwrap();
        let mut received = Vec::new();
        let mut failed = false;
        while let Some(chunk) = output.chunk().await {
            match chunk {
                Ok(bytes) => received.extend_from_slice(&bytes),
                Err(_) => failed = true,
            }
        }
        assert_eq!(received, data);
        assert!(failed);
    }

    #[tokio::test]
    async fn test_dropped_output_does_not_block_digest() {
        let data = sample(200);
        let config = small_config().with_output_buffer(1);
        let tee = StreamTee::new(MockSource::new(data.clone()), 0, config).unwrap();

        drop(tee.output().unwrap());
        assert_eq!(tee.digest().await.unwrap(), DigestAlgorithm::Sha256.digest(&data));
    }

    #[tokio::test]
    async fn test_dropping_paused_tee_cancels() {
        let tee = StreamTee::new(MockSource::new(sample(40)), 0, small_config()).unwrap();
        let mut digest_rx = tee.digest.clone();
        tee.header().await;
        drop(tee);

        let settled = digest_rx.wait_for(Option::is_some).await.unwrap().clone();
        assert!(matches!(settled, Some(Err(TeeError::Cancelled))));
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_result() {
        let data = sample(64);
        let tee = Arc::new(StreamTee::new(MockSource::new(data.clone()), 0, small_config()).unwrap());

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let tee = tee.clone();
            waiters.push(tokio::spawn(async move { (tee.header().await, tee.digest().await) }));
        }
        let expected = DigestAlgorithm::Sha256.digest(&data);
        for waiter in waiters {
            let (header, digest) = waiter.await.unwrap();
            assert_eq!(&header[..], &data[..8]);
            assert_eq!(digest.unwrap(), expected);
        }
        assert_eq!(tee.output().unwrap().read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let data = sample(5000);
        let tee = StreamTee::new(MockSource::new(data.clone()), 5000, TeeConfig::default()).unwrap();

        let written = tee.write_file(&path).await.unwrap();
        assert_eq!(written, 5000);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), data);
        assert_eq!(tee.digest().await.unwrap(), DigestAlgorithm::Sha256.digest(&data));
    }

    #[tokio::test]
    async fn test_md5_digest() {
        let config = small_config().with_digest(DigestAlgorithm::Md5);
        let tee = StreamTee::new(MockSource::new(b"abc".to_vec()), 0, config).unwrap();
        assert_eq!(tee.digest().await.unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }
}
