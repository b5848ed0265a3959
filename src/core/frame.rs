//! # Frame Decoder
//!
//! Detects and extracts one length-prefixed frame from the front of an
//! accumulation buffer.
//!
//! ```text
//! [VarInt length][length bytes of body]
//! ```
//!
//! Network reads are appended to a single `BytesMut`, so frames that arrive
//! split across many reads become contiguous before extraction. A complete
//! frame is split off the front of the buffer and frozen into `Bytes`, which
//! shares the allocation instead of copying it. The handed-out slice stays
//! valid for as long as it is held, independent of later reads.

use bytes::{Buf, Bytes, BytesMut};

use crate::config::MAX_FRAME_LENGTH;
use crate::core::varint::{self, VarIntStatus};
use crate::error::{constants, ProtocolError, Result};

/// Stateless frame boundary detector
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_length: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_LENGTH)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Extract the frame body at the start of `src`, if it is complete.
    ///
    /// Returns `Ok(None)` without consuming anything when the length prefix
    /// or the body is still incomplete. On success the prefix and body are
    /// removed from `src`.
    ///
    /// # Errors
    /// - `MalformedVarInt` for a length prefix longer than 5 bytes
    /// - `InvalidFrame` for a zero or negative length
    /// - `OversizedPacket` for a length above the configured maximum
    pub fn try_extract(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let (length, prefix_len) = match varint::try_decode_i32(&src[..]) {
            VarIntStatus::Success { value, len } => (value, len),
            VarIntStatus::NeedMoreData => return Ok(None),
            VarIntStatus::Invalid => return Err(ProtocolError::MalformedVarInt),
        };

        if length < 0 {
            return Err(ProtocolError::InvalidFrame(constants::ERR_NEGATIVE_LENGTH));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidFrame(constants::ERR_ZERO_LENGTH_FRAME));
        }

        let length = length as usize;
        if length > self.max_frame_length {
            return Err(ProtocolError::OversizedPacket(length));
        }

        let total = prefix_len + length;
        if src.len() < total {
            // Reserve once so the rest of the frame lands without reallocating.
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        Ok(Some(src.split_to(length).freeze()))
    }
}
