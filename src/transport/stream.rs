//! # Streaming Reader and Sender
//!
//! Pull-based packet I/O bound directly to one byte source or sink.
//!
//! [`PacketReader`] reads exactly one frame per call: the length prefix
//! byte-by-byte, then the body into a pooled buffer sized to the frame. It
//! fits request/response style flows (login, status pings) where a full
//! pipeline would be overkill.
//!
//! [`PacketSender`] is the write-side counterpart and encodes each packet
//! straight onto the sink.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::core::codec::{CompressionStage, CompressionThreshold};
use crate::core::packet::{OutgoingPacket, Packet};
use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Reads one packet at a time from `R`
pub struct PacketReader<R> {
    src: R,
    stage: CompressionStage,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(src: R, stage: CompressionStage) -> Self {
        Self { src, stage }
    }

    /// Threshold handle for this reader
    pub fn threshold(&self) -> &CompressionThreshold {
        self.stage.threshold()
    }

    /// Switch the reader's compression threshold for subsequent frames.
    pub fn switch_compression(&self, threshold: i32) {
        self.stage.threshold().set(threshold);
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }

    pub fn into_inner(self) -> R {
        self.src
    }

    /// Read and decode the next packet.
    ///
    /// The frame body is read into a pooled buffer that either moves into
    /// the returned packet or is released before an error propagates.
    ///
    /// # Errors
    /// - `ConnectionClosed` when the source ends cleanly between frames
    /// - `UnexpectedEndOfStream` when it ends inside a frame
    /// - any frame or decompression error from the compression stage
    pub async fn read_next_packet(&mut self) -> Result<Packet> {
        let result = self.read_frame().await;
        if let Err(ref e) = result {
            if !matches!(e, ProtocolError::ConnectionClosed) {
                global_metrics().decode_error();
                warn!(error = %e, "Failed to read packet");
            }
        }
        result
    }

    async fn read_frame(&mut self) -> Result<Packet> {
        let length = match varint::read_varint_async(&mut self.src).await? {
            Some(length) => length,
            None => return Err(ProtocolError::ConnectionClosed),
        };

        if length < 0 {
            return Err(ProtocolError::InvalidFrame(constants::ERR_NEGATIVE_LENGTH));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidFrame(constants::ERR_ZERO_LENGTH_FRAME));
        }
        let length = length as usize;
        if length > self.stage.max_frame_length() {
            return Err(ProtocolError::OversizedPacket(length));
        }

        let mut frame = self.stage.pool().acquire(length)?;
        self.src.read_exact(&mut frame).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEndOfStream,
            _ => ProtocolError::Io(e),
        })?;

        self.stage.decode_pooled(frame)
    }
}

/// Writes packets one at a time to `W`
pub struct PacketSender<W> {
    sink: W,
    stage: CompressionStage,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketSender<W> {
    pub fn new(sink: W, stage: CompressionStage) -> Self {
        Self {
            sink,
            stage,
            scratch: BytesMut::new(),
        }
    }

    pub fn threshold(&self) -> &CompressionThreshold {
        self.stage.threshold()
    }

    /// Switch the sender's compression threshold for subsequent packets.
    pub fn switch_compression(&self, threshold: i32) {
        self.stage.threshold().set(threshold);
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Encode `packet` and write the frame to the sink.
    pub async fn send_packet(&mut self, packet: &OutgoingPacket) -> Result<()> {
        self.scratch.clear();
        if let Err(e) = self.stage.encode_packet(packet, &mut self.scratch) {
            global_metrics().encode_error();
            return Err(e);
        }
        self.sink.write_all(&self.scratch).await?;
        Ok(())
    }

    /// Frame a pre-serialized body (`[id][payload]`) and write it.
    pub async fn send_raw(&mut self, body: Bytes) -> Result<()> {
        self.scratch.clear();
        let compressed = match self.stage.encode_body(&body, &mut self.scratch) {
            Ok(compressed) => compressed,
            Err(e) => {
                global_metrics().encode_error();
                return Err(e);
            }
        };
        global_metrics().packet_encoded(body.len() as u64, compressed);
        self.sink.write_all(&self.scratch).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await?;
        Ok(())
    }

    /// Flush and shut the sink down.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.flush().await?;
        self.sink.shutdown().await?;
        debug!("Packet sender closed");
        Ok(())
    }
}
