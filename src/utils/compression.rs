//! # Compression Primitives
//!
//! Pure compress/decompress functions behind the packet compression stage.
//!
//! Decompression always targets a caller-sized output buffer, because the
//! wire format declares the uncompressed size up front. Instead of failing
//! on "not enough output space" the decoders report a [`DecompressStatus`]
//! together with the number of bytes written, and the caller decides what a
//! mismatch means.
//!
//! `Zlib` is the format spoken by vanilla peers. `Lz4` and `Zstd` are only
//! meaningful when both ends are configured for them.

use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::error::{ProtocolError, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Zlib,
    Lz4,
    Zstd,
}

impl CompressionKind {
    /// Inclusive range of levels accepted by this algorithm
    pub fn level_range(&self) -> (u32, u32) {
        match self {
            CompressionKind::Zlib => (0, 9),
            CompressionKind::Lz4 => (0, 12),
            CompressionKind::Zstd => (1, 22),
        }
    }
}

/// Result of decompressing into a fixed-size buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecompressStatus {
    /// The stream ended cleanly.
    Done,
    /// The output buffer filled before the stream ended.
    OutputFull,
    /// The input is not a valid stream for this algorithm.
    Corrupt,
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind, level: u32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(
                Vec::with_capacity(data.len() / 2 + 16),
                Compression::new(level.min(9)),
            );
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            encoder
                .finish()
                .map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Lz4 => Ok(lz4_flex::block::compress(data)),
        CompressionKind::Zstd => zstd::bulk::compress(data, level.clamp(1, 22) as i32)
            .map_err(|_| ProtocolError::CompressionFailure),
    }
}

/// Decompress `data` into `out`, returning the stream status and the number
/// of bytes written.
///
/// Never allocates beyond `out`, so a hostile stream cannot inflate past the
/// size the caller already validated.
pub fn decompress_into(data: &[u8], kind: CompressionKind, out: &mut [u8]) -> (DecompressStatus, usize) {
    match kind {
        CompressionKind::Zlib => zlib_decompress_into(data, out),
        CompressionKind::Lz4 => match lz4_flex::block::decompress_into(data, out) {
            Ok(written) => (DecompressStatus::Done, written),
            Err(lz4_flex::block::DecompressError::OutputTooSmall { .. }) => {
                (DecompressStatus::OutputFull, out.len())
            }
            Err(_) => (DecompressStatus::Corrupt, 0),
        },
        CompressionKind::Zstd => match zstd::bulk::decompress_to_buffer(data, out) {
            Ok(written) => (DecompressStatus::Done, written),
            Err(_) => (DecompressStatus::Corrupt, 0),
        },
    }
}

fn zlib_decompress_into(data: &[u8], out: &mut [u8]) -> (DecompressStatus, usize) {
    let mut inflater = Decompress::new(true);
    let status = inflater.decompress(data, out, FlushDecompress::Finish);
    let written = inflater.total_out() as usize;

    match status {
        Ok(Status::StreamEnd) => (DecompressStatus::Done, written),
        // A failed single-shot inflate leaves the inflater unusable, so the
        // stream is re-run to tell a short buffer from a broken stream.
        Ok(_) if written == out.len() => match zlib_inflates_past(data, out.len()) {
            Some(true) => (DecompressStatus::OutputFull, written),
            Some(false) | None => (DecompressStatus::Corrupt, written),
        },
        Ok(_) | Err(_) => (DecompressStatus::Corrupt, written),
    }
}

/// Whether `data` inflates to more than `limit` bytes.
///
/// Output goes to a fixed scratch buffer and stops once `limit` is passed.
/// `None` when the stream is corrupt or ends early.
fn zlib_inflates_past(data: &[u8], limit: usize) -> Option<bool> {
    let mut inflater = Decompress::new(true);
    let mut scratch = [0u8; 4096];

    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let input = data.get(consumed..).unwrap_or_default();
        let status = inflater
            .decompress(input, &mut scratch, FlushDecompress::None)
            .ok()?;

        if inflater.total_out() as usize > limit {
            return Some(true);
        }
        if status == Status::StreamEnd {
            return Some(false);
        }
        if inflater.total_out() == produced && inflater.total_in() as usize == consumed {
            return None;
        }
    }
}
