//! # Packet Codec
//!
//! Turns frame bodies into packets and packets into frames under the active
//! compression threshold.
//!
//! ## Wire Format
//! ```text
//! threshold < 0:   [len][id][payload]
//! threshold >= 0:  [len][0][id][payload]                      body shorter than threshold
//!                  [len][uncompressed size][compressed body]  body at or above threshold
//! ```
//!
//! The threshold is compared against the uncompressed body, i.e. the encoded
//! id plus the payload. Whether the size prefix exists at all is decided by
//! the threshold, never per frame.
//!
//! [`PacketCodec`] plugs the stage into `tokio_util::codec`, so it can be used
//! with `Framed`/`FramedRead` as well as by the pipelined reader.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::config::{CodecConfig, COMPRESSION_DISABLED, MAX_FRAME_LENGTH, MAX_UNCOMPRESSED_LENGTH};
use crate::core::frame::FrameDecoder;
use crate::core::packet::{OutgoingPacket, Packet};
use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::buffer_pool::{BufferPool, PooledBuffer};
use crate::utils::compression::{self, CompressionKind, DecompressStatus};
use crate::utils::metrics::{global_metrics, Timer};

/// Runtime-switchable compression threshold.
///
/// Clones share the same value, so a connection can hand one clone to its
/// decode loop and keep another to switch compression on when the peer
/// requests it. Reader and writer each get their own instance.
#[derive(Debug, Clone)]
pub struct CompressionThreshold(Arc<AtomicI32>);

impl CompressionThreshold {
    pub fn new(threshold: i32) -> Self {
        Self(Arc::new(AtomicI32::new(threshold)))
    }

    pub fn disabled() -> Self {
        Self::new(COMPRESSION_DISABLED)
    }

    #[inline]
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    /// Switch the threshold; negative values disable compression.
    pub fn set(&self, threshold: i32) {
        self.0.store(threshold, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.get() >= 0
    }
}

impl Default for CompressionThreshold {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Where the packet bytes sit inside a frame body
enum BodyLayout {
    Raw { start: usize },
    Compressed { start: usize, size: usize },
}

/// Threshold-driven compression stage shared by every reader and writer
#[derive(Debug, Clone)]
pub struct CompressionStage {
    threshold: CompressionThreshold,
    kind: CompressionKind,
    level: u32,
    max_frame_length: usize,
    max_uncompressed_length: usize,
    pool: BufferPool,
}

impl CompressionStage {
    /// Zlib stage with default limits
    pub fn new(threshold: CompressionThreshold, pool: BufferPool) -> Self {
        Self {
            threshold,
            kind: CompressionKind::Zlib,
            level: 6,
            max_frame_length: MAX_FRAME_LENGTH,
            max_uncompressed_length: MAX_UNCOMPRESSED_LENGTH,
            pool,
        }
    }

    pub fn from_config(config: &CodecConfig, threshold: CompressionThreshold, pool: BufferPool) -> Self {
        Self {
            threshold,
            kind: config.compression,
            level: config.compression_level,
            max_frame_length: config.max_frame_length,
            max_uncompressed_length: config.max_uncompressed_length,
            pool,
        }
    }

    pub fn threshold(&self) -> &CompressionThreshold {
        &self.threshold
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn layout(&self, body: &[u8]) -> Result<BodyLayout> {
        let threshold = self.threshold.get();
        if threshold < 0 {
            return Ok(BodyLayout::Raw { start: 0 });
        }

        let (size, prefix_len) = match varint::decode_i32(body) {
            Ok(decoded) => decoded,
            Err(ProtocolError::UnexpectedEndOfStream) => {
                return Err(ProtocolError::InvalidFrame(constants::ERR_TRUNCATED_SIZE_PREFIX))
            }
            Err(e) => return Err(e),
        };

        if size < 0 {
            return Err(ProtocolError::DecompressionError(
                constants::ERR_NEGATIVE_UNCOMPRESSED_SIZE,
            ));
        }
        if size == 0 {
            return Ok(BodyLayout::Raw { start: prefix_len });
        }

        // Peers only compress bodies at or above the threshold.
        if size < threshold {
            return Err(ProtocolError::InvalidFrame(constants::ERR_COMPRESSED_BELOW_THRESHOLD));
        }

        let size = size as usize;
        if size > self.max_uncompressed_length {
            return Err(ProtocolError::OversizedPacket(size));
        }
        Ok(BodyLayout::Compressed {
            start: prefix_len,
            size,
        })
    }

    /// Decompress into a fresh pooled buffer of exactly `size` bytes.
    fn inflate(&self, compressed: &[u8], size: usize) -> Result<Packet> {
        let _timer = Timer::start("inflate");
        let mut out = self.pool.acquire(size)?;

        match compression::decompress_into(compressed, self.kind, &mut out) {
            (DecompressStatus::Done, written) if written == size => Packet::from_pooled(out, 0),
            (DecompressStatus::Done, _) | (DecompressStatus::OutputFull, _) => {
                Err(ProtocolError::DecompressionError(constants::ERR_SIZE_MISMATCH))
            }
            (DecompressStatus::Corrupt, _) => {
                Err(ProtocolError::DecompressionError(constants::ERR_DECOMPRESSOR_STATUS))
            }
        }
    }

    /// Decode a frame body held in shared memory.
    ///
    /// Uncompressed packets keep pointing into `body`; compressed packets
    /// are inflated into a pooled buffer.
    pub fn decode_body(&self, body: Bytes) -> Result<Packet> {
        let frame_len = body.len() as u64;
        let (packet, compressed) = match self.layout(&body)? {
            BodyLayout::Raw { start } => (Packet::from_shared(body.slice(start..))?, false),
            BodyLayout::Compressed { start, size } => (self.inflate(&body[start..], size)?, true),
        };
        global_metrics().packet_decoded(frame_len, compressed);
        trace!(id = packet.id(), frame_len, compressed, "Decoded packet");
        Ok(packet)
    }

    /// Decode a frame body the caller read into its own pooled buffer.
    ///
    /// Ownership of `frame` moves into the returned packet, or it is
    /// released here when the body was compressed or turned out invalid.
    pub fn decode_pooled(&self, frame: PooledBuffer) -> Result<Packet> {
        let frame_len = frame.len() as u64;
        let (packet, compressed) = match self.layout(&frame)? {
            BodyLayout::Raw { start } => (Packet::from_pooled(frame, start)?, false),
            BodyLayout::Compressed { start, size } => {
                let packet = self.inflate(&frame[start..], size)?;
                frame.release();
                (packet, true)
            }
        };
        global_metrics().packet_decoded(frame_len, compressed);
        trace!(id = packet.id(), frame_len, compressed, "Decoded packet");
        Ok(packet)
    }

    fn check_frame_len(&self, frame_len: usize) -> Result<()> {
        if frame_len > self.max_frame_length {
            return Err(ProtocolError::OversizedPacket(frame_len));
        }
        Ok(())
    }

    /// Append one frame carrying `body` (`[id][payload]`) to `dst`.
    ///
    /// Nothing is written when an error is returned. Returns whether the
    /// body went out compressed.
    ///
    /// # Errors
    /// - `InvalidFrame` for an empty body, which has no packet id
    /// - `OversizedPacket` when the frame or body exceeds the limits
    pub fn encode_body(&self, body: &[u8], dst: &mut BytesMut) -> Result<bool> {
        if body.is_empty() {
            return Err(ProtocolError::InvalidFrame(constants::ERR_MISSING_PACKET_ID));
        }
        let threshold = self.threshold.get();

        if threshold < 0 {
            self.check_frame_len(body.len())?;
            dst.reserve(varint::MAX_VARINT_LEN + body.len());
            varint::put_varint(dst, body.len() as i32);
            dst.put_slice(body);
            return Ok(false);
        }

        if body.len() < threshold as usize {
            let frame_len = body.len() + 1;
            self.check_frame_len(frame_len)?;
            dst.reserve(varint::MAX_VARINT_LEN + frame_len);
            varint::put_varint(dst, frame_len as i32);
            dst.put_u8(0);
            dst.put_slice(body);
            return Ok(false);
        }

        if body.len() > self.max_uncompressed_length {
            return Err(ProtocolError::OversizedPacket(body.len()));
        }
        let compressed = compression::compress(body, self.kind, self.level)?;
        let frame_len = varint::varint_len(body.len() as i32) + compressed.len();
        self.check_frame_len(frame_len)?;

        dst.reserve(varint::MAX_VARINT_LEN + frame_len);
        varint::put_varint(dst, frame_len as i32);
        varint::put_varint(dst, body.len() as i32);
        dst.put_slice(&compressed);
        Ok(true)
    }

    /// Append one frame carrying `packet` to `dst`.
    pub fn encode_packet(&self, packet: &OutgoingPacket, dst: &mut BytesMut) -> Result<()> {
        let body_len = packet.body_len();
        let threshold = self.threshold.get();

        let compressed = if threshold < 0 || body_len < threshold as usize {
            // Uncompressed frames are written straight into `dst`.
            let marker = usize::from(threshold >= 0);
            let frame_len = body_len + marker;
            self.check_frame_len(frame_len)?;
            dst.reserve(varint::MAX_VARINT_LEN + frame_len);
            varint::put_varint(dst, frame_len as i32);
            if marker == 1 {
                dst.put_u8(0);
            }
            packet.write_body(dst);
            false
        } else {
            let mut body = BytesMut::with_capacity(body_len);
            packet.write_body(&mut body);
            self.encode_body(&body, dst)?
        };

        global_metrics().packet_encoded(body_len as u64, compressed);
        trace!(id = packet.id, body_len, compressed, "Encoded packet");
        Ok(())
    }
}

/// Tokio codec combining frame detection with the compression stage
#[derive(Debug, Clone)]
pub struct PacketCodec {
    frames: FrameDecoder,
    stage: CompressionStage,
}

impl PacketCodec {
    /// Codec with its own pool and the given initial threshold
    pub fn new(threshold: i32) -> Self {
        Self::with_stage(CompressionStage::new(
            CompressionThreshold::new(threshold),
            BufferPool::default(),
        ))
    }

    /// Codec over an explicit stage; the frame limit follows the stage's
    pub fn with_stage(stage: CompressionStage) -> Self {
        Self {
            frames: FrameDecoder::new(stage.max_frame_length()),
            stage,
        }
    }

    pub fn from_config(config: &CodecConfig, threshold: CompressionThreshold, pool: BufferPool) -> Self {
        Self::with_stage(CompressionStage::from_config(config, threshold, pool))
    }

    pub fn threshold(&self) -> &CompressionThreshold {
        self.stage.threshold()
    }

    pub fn stage(&self) -> &CompressionStage {
        &self.stage
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(COMPRESSION_DISABLED)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let decoded = match self.frames.try_extract(src) {
            Ok(Some(body)) => self.stage.decode_body(body).map(Some),
            other => other.map(|_| None),
        };

        if let Err(ref e) = decoded {
            global_metrics().decode_error();
            warn!(error = %e, buffered = src.len(), "Fatal frame decode error");
        }
        decoded
    }
}

impl Encoder<OutgoingPacket> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: OutgoingPacket, dst: &mut BytesMut) -> Result<()> {
        self.stage.encode_packet(&packet, dst).inspect_err(|_| {
            global_metrics().encode_error();
        })
    }
}

/// Pre-serialized bodies (`[id][payload]`) are framed as-is.
impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        match self.stage.encode_body(&body, dst) {
            Ok(compressed) => {
                global_metrics().packet_encoded(body.len() as u64, compressed);
                Ok(())
            }
            Err(e) => {
                global_metrics().encode_error();
                Err(e)
            }
        }
    }
}
