//! Destinations for message data received via DATA or BDAT.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::AsyncWrite;

/// Where the session writes the trace header and message body.
///
/// Hooks may hand the session their own sink (a spool file, a pipe to a
/// filter); otherwise the message is collected in a [`MemorySink`].
pub trait MessageSink: AsyncWrite + Send + Sync + Unpin {
    /// The bytes written so far, for sinks that keep them in memory.
    fn contents(&self) -> Option<&[u8]> {
        None
    }
}

/// Collects the message in a growable buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
}

impl MemorySink {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.buffer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.buffer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.buffer).poll_shutdown(cx)
    }
}

impl MessageSink for MemorySink {
    fn contents(&self) -> Option<&[u8]> {
        Some(&self.buffer)
    }
}

/// Swallows whatever is written to it, keeping count.
///
/// Used to drain chunks that would take a message over the size limit, so the
/// command stream stays in sync.
#[derive(Debug, Default)]
pub struct DiscardSink {
    discarded: usize,
}

impl DiscardSink {
    #[must_use]
    pub const fn discarded(&self) -> usize {
        self.discarded
    }
}

impl AsyncWrite for DiscardSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.discarded += buf.len();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MessageSink for DiscardSink {}
