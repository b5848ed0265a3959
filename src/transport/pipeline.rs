//! # Pipelined Reader and Writer
//!
//! Decode and encode stages decoupled from raw transport I/O.
//!
//! [`PacketStream`] turns any byte feed (normally the read half of an
//! inbound [`pipe`](crate::transport::pipe)) into a lazy `Stream` of
//! packets. It runs an explicit three-state loop:
//!
//! ```text
//!            bytes read                     no complete frame
//! Accumulate ──────────► Drain ──(packet)──► ... ──────────► Accumulate
//!     │                    │
//!     └── EOF / cancel ────┴── error ──► Done
//! ```
//!
//! Every read is appended to one accumulation buffer, and `Drain` hands out
//! one packet per poll until no complete frame is left. Packets therefore
//! come out in wire order, however the bytes were split in transit, and a
//! threshold switch made after receiving a packet applies to the very next
//! frame.
//!
//! [`PipelineWriter`] stages encoded frames in memory without touching the
//! sink; [`PipelineWriter::flush`] hands everything staged to the sink in
//! one write.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{FusedStream, Stream};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::io::poll_read_buf;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace};

use crate::config::DEFAULT_READ_CHUNK_SIZE;
use crate::core::codec::{CompressionThreshold, PacketCodec};
use crate::core::packet::{OutgoingPacket, Packet};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for more bytes from the feed
    Accumulate,
    /// Extracting complete frames from the buffer
    Drain,
    /// Terminated by EOF, error or cancellation
    Done,
}

/// Lazy packet sequence decoded from a byte feed
pub struct PacketStream<R> {
    src: R,
    codec: PacketCodec,
    buf: BytesMut,
    state: ReadState,
    read_chunk: usize,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<R: AsyncRead + Unpin> PacketStream<R> {
    pub fn new(src: R, codec: PacketCodec, cancel: CancellationToken) -> Self {
        Self::with_read_chunk(src, codec, cancel, DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_read_chunk(src: R, codec: PacketCodec, cancel: CancellationToken, read_chunk: usize) -> Self {
        Self {
            src,
            codec,
            buf: BytesMut::with_capacity(read_chunk),
            state: ReadState::Accumulate,
            read_chunk: read_chunk.max(1),
            cancelled: Box::pin(cancel.cancelled_owned()),
        }
    }

    /// Threshold handle of the decode side
    pub fn threshold(&self) -> &CompressionThreshold {
        self.codec.threshold()
    }

    /// Bytes received but not yet decoded
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    fn terminate(&mut self) {
        self.state = ReadState::Done;
        self.buf.clear();
    }
}

impl<R: AsyncRead + Unpin> Stream for PacketStream<R> {
    type Item = Result<Packet>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.state == ReadState::Done {
                return Poll::Ready(None);
            }
            if this.cancelled.as_mut().poll(cx).is_ready() {
                debug!(discarded = this.buf.len(), "Packet stream cancelled");
                this.terminate();
                return Poll::Ready(None);
            }

            match this.state {
                ReadState::Drain => match this.codec.decode(&mut this.buf) {
                    Ok(Some(packet)) => return Poll::Ready(Some(Ok(packet))),
                    Ok(None) => this.state = ReadState::Accumulate,
                    Err(e) => {
                        this.terminate();
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                ReadState::Accumulate => {
                    this.buf.reserve(this.read_chunk);
                    match poll_read_buf(Pin::new(&mut this.src), cx, &mut this.buf) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(0)) => {
                            let leftover = this.buf.len();
                            this.terminate();
                            if leftover > 0 {
                                return Poll::Ready(Some(Err(ProtocolError::UnexpectedEndOfStream)));
                            }
                            debug!("Packet stream reached end of feed");
                            return Poll::Ready(None);
                        }
                        Poll::Ready(Ok(n)) => {
                            trace!(read = n, buffered = this.buf.len(), "Accumulated bytes");
                            this.state = ReadState::Drain;
                        }
                        Poll::Ready(Err(e)) => {
                            this.terminate();
                            return Poll::Ready(Some(Err(e.into())));
                        }
                    }
                }
                ReadState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl<R: AsyncRead + Unpin> FusedStream for PacketStream<R> {
    fn is_terminated(&self) -> bool {
        self.state == ReadState::Done
    }
}

/// Stages encoded frames and hands them to `W` on flush
pub struct PipelineWriter<W> {
    sink: W,
    codec: PacketCodec,
    staged: BytesMut,
}

impl<W: AsyncWrite + Unpin> PipelineWriter<W> {
    pub fn new(sink: W, codec: PacketCodec) -> Self {
        Self {
            sink,
            codec,
            staged: BytesMut::with_capacity(DEFAULT_READ_CHUNK_SIZE),
        }
    }

    /// Threshold handle of the encode side
    pub fn threshold(&self) -> &CompressionThreshold {
        self.codec.threshold()
    }

    /// Encode `packet` into the staging buffer. No I/O happens here.
    pub fn write_packet(&mut self, packet: OutgoingPacket) -> Result<()> {
        self.codec.encode(packet, &mut self.staged)
    }

    /// Frame a pre-serialized body (`[id][payload]`) into the staging buffer.
    pub fn write_raw(&mut self, body: Bytes) -> Result<()> {
        self.codec.encode(body, &mut self.staged)
    }

    /// Bytes staged since the last flush
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Hand all staged bytes to the sink and flush it.
    ///
    /// Returns the number of bytes handed over.
    pub async fn flush(&mut self) -> Result<usize> {
        let len = self.staged.len();
        if len > 0 {
            self.sink.write_all(&self.staged).await?;
            self.staged.clear();
        }
        self.sink.flush().await?;
        trace!(bytes = len, "Flushed staged frames");
        Ok(len)
    }

    /// Flush, then shut the sink down.
    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.sink.shutdown().await?;
        Ok(())
    }
}
