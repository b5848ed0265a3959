//! # Byte Pipe
//!
//! In-memory, flow-controlled byte channel between transport I/O and the
//! codec.
//!
//! ```text
//! transport ──pump──► PipeWriter ══ buffer ══ PipeReader ──► PacketStream
//! ```
//!
//! A pipe is one direction of a `tokio::io::duplex` pair. The writer half
//! implements `AsyncWrite` and the reader half `AsyncRead`. With
//! [`PipeCapacity::Bounded`] a write that finds the buffer full suspends
//! until the reader drains it, which is how a slow consumer pushes back on
//! the network reader. [`PipeCapacity::Unbounded`] never suspends the
//! writer.
//!
//! Dropping or shutting down the writer is end-of-stream for the reader once
//! buffered bytes are consumed. Dropping the reader makes further writes
//! fail with `BrokenPipe`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DEFAULT_PIPE_CAPACITY;
use crate::error::{ProtocolError, Result};

/// Capacity policy of a pipe
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PipeCapacity {
    /// The writer never waits; memory grows with the backlog
    Unbounded,
    /// The writer waits once `bytes` are buffered
    Bounded { bytes: usize },
}

impl PipeCapacity {
    /// Buffer size handed to the duplex pair
    fn max_buffered(&self) -> usize {
        match self {
            PipeCapacity::Unbounded => usize::MAX,
            PipeCapacity::Bounded { bytes } => (*bytes).max(1),
        }
    }
}

impl Default for PipeCapacity {
    fn default() -> Self {
        PipeCapacity::Bounded {
            bytes: DEFAULT_PIPE_CAPACITY,
        }
    }
}

/// Create a connected pipe pair with the given capacity policy
pub fn pipe(capacity: PipeCapacity) -> (PipeWriter, PipeReader) {
    let (writer, reader) = tokio::io::duplex(capacity.max_buffered());
    (PipeWriter(writer), PipeReader(reader))
}

/// Producer half of a [`pipe`]
pub struct PipeWriter(DuplexStream);

impl AsyncWrite for PipeWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Consumer half of a [`pipe`]
pub struct PipeReader(DuplexStream);

impl AsyncRead for PipeReader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, out: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, out)
    }
}

/// Copy `source` into `sink` in chunks until `source` ends, then shut `sink`
/// down.
///
/// Used both as the pump (transport into the inbound pipe) and the drain
/// (outbound pipe onto the transport). Each chunk is flushed before the next
/// read, so a bounded pipe on either side suspends the copy. Returns the
/// number of bytes copied.
///
/// # Errors
/// `Cancelled` when `cancel` fires, otherwise any I/O error of either side.
pub async fn pump<R, W>(mut source: R, mut sink: W, chunk_size: usize, cancel: CancellationToken) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
            read = source.read(&mut chunk) => read?,
        };

        if n == 0 {
            sink.shutdown().await?;
            debug!(total, "Copy source finished");
            return Ok(total);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
            written = async {
                sink.write_all(&chunk[..n]).await?;
                sink.flush().await
            } => written?,
        }
        total += n as u64;
    }
}
