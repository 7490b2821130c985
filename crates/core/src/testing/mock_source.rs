//! Mock byte source for testing.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

/// In-memory [`AsyncRead`] with controllable pacing and failure.
///
/// Provides controllable behavior for testing:
/// - Cap the bytes delivered per read
/// - Delay every read
/// - Fail with `ConnectionReset` after a given number of bytes
/// - Count reads that delivered data
///
/// # Example
///
/// ```rust,ignore
/// use intake_core::testing::MockSource;
///
/// let source = MockSource::new(vec![0u8; 4096])
///     .with_max_read(100)
///     .fail_after(1000);
/// let reads = source.read_counter();
/// ```
#[derive(Debug)]
pub struct MockSource {
    data: Vec<u8>,
    pos: usize,
    max_read: Option<usize>,
    fail_at: Option<usize>,
    delay: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
    reads: Arc<AtomicUsize>,
}

impl MockSource {
    /// Create a source that yields `data` and then ends.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            max_read: None,
            fail_at: None,
            delay: None,
            sleep: None,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver at most `max` bytes per read.
    pub fn with_max_read(mut self, max: usize) -> Self {
        self.max_read = Some(max.max(1));
        self
    }

    /// Sleep before every read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail once `offset` bytes (or all data, if shorter) have been delivered.
    pub fn fail_after(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Shared counter of reads that delivered at least one byte.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl AsyncRead for MockSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Some(delay) = this.delay {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
        }

        if let Some(fail_at) = this.fail_at {
            if this.pos >= fail_at.min(this.data.len()) {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "mock source failure",
                )));
            }
        }

        let mut end = this.data.len().min(this.pos + buf.remaining());
        if let Some(max) = this.max_read {
            end = end.min(this.pos + max);
        }
        if let Some(fail_at) = this.fail_at {
            end = end.min(fail_at);
        }

        if end > this.pos {
            buf.put_slice(&this.data[this.pos..end]);
            this.reads.fetch_add(1, Ordering::SeqCst);
            this.pos = end;
        }
        Poll::Ready(Ok(()))
    }
}
