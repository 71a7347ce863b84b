//! Peekable stream wrapper.
//!
//! Reads issued through [`PeekableStream::fill`] land in an internal buffer
//! instead of being handed to the caller. The buffered bytes stay visible via
//! [`PeekableStream::peeked`] and are replayed, in order, by the `AsyncRead`
//! impl before any new data is read from the inner stream. Writes pass
//! straight through.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// A stream that supports non-consuming look-ahead.
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S> PeekableStream<S> {
    /// Wrap a stream with an empty look-ahead buffer.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pos: 0,
        }
    }

    /// Bytes read ahead but not yet consumed.
    pub fn peeked(&self) -> &[u8] {
        &self.buffer[self.pos..]
    }
}

impl<S: AsyncRead + Unpin> PeekableStream<S> {
    /// Read once from the inner stream into the look-ahead buffer.
    ///
    /// Returns the number of new bytes buffered; `0` means the peer closed
    /// its side. At most `max` bytes are read. Cancel-safe: if the future is
    /// dropped before completing, the buffer is left unchanged.
    pub async fn fill(&mut self, max: usize) -> io::Result<usize> {
        let mut chunk = vec![0u8; max];
        let n = self.inner.read(&mut chunk).await?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pos < this.buffer.len() && buf.remaining() > 0 {
            let n = (this.buffer.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.buffer[this.pos..this.pos + n]);
            this.pos += n;

            if this.pos == this.buffer.len() {
                this.buffer = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
