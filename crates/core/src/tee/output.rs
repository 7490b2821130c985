//! Output side of a stream tee.

use bytes::{Buf, Bytes};
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Replays every byte read from the tee's source, in order.
///
/// Usable either as a [`Stream`] of chunks or as an [`AsyncRead`]. A source
/// failure arrives as an `Err` item (or read error) after the bytes that were
/// read before it. Dropping the output does not stop the tee; header and
/// digest still complete.
#[derive(Debug)]
pub struct TeeOutput {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    /// Unread remainder of the last chunk handed to `poll_read`.
    leftover: Bytes,
}

impl TeeOutput {
    pub(crate) fn new(rx: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            rx,
            leftover: Bytes::new(),
        }
    }

    /// Receives the next chunk; `None` once the source has ended.
    pub async fn chunk(&mut self) -> Option<io::Result<Bytes>> {
        if !self.leftover.is_empty() {
            return Some(Ok(std::mem::take(&mut self.leftover)));
        }
        self.rx.recv().await
    }

    /// Collects the remaining output into one buffer.
    pub async fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.chunk().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

impl Stream for TeeOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.leftover.is_empty() {
            return Poll::Ready(Some(Ok(std::mem::take(&mut self.leftover))));
        }
        self.rx.poll_recv(cx)
    }
}

impl AsyncRead for TeeOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        while self.leftover.is_empty() {
            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => self.leftover = chunk,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = self.leftover.len().min(buf.remaining());
        buf.put_slice(&self.leftover[..n]);
        self.leftover.advance(n);
        Poll::Ready(Ok(()))
    }
}
