//! # VarInt Codec
//!
//! Variable-length integers as used by every length, id and size prefix on
//! the wire: 7-bit groups, least significant group first, with the
//! continuation bit (`0x80`) set on every byte but the last.
//!
//! ```text
//! 300 = 0b1_0010_1100  ->  [0xAC, 0x02]
//! ```
//!
//! Negative values are encoded through their two's-complement bit pattern and
//! always take the maximum number of groups (5 for `i32`, 10 for `i64`).
//!
//! Two decoding flavours exist:
//! - [`try_decode_i32`] never fails and reports [`VarIntStatus::NeedMoreData`]
//!   when the input ends early. The frame detector uses it on partial buffers.
//! - [`decode_i32`] treats a truncated input as [`ProtocolError::UnexpectedEndOfStream`].

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};

/// Maximum encoded length of a 32-bit VarInt
pub const MAX_VARINT_LEN: usize = 5;

/// Maximum encoded length of a 64-bit VarLong
pub const MAX_VARLONG_LEN: usize = 10;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Outcome of a non-failing decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntStatus<T> {
    /// A complete value was read using `len` bytes.
    Success { value: T, len: usize },
    /// The input ended before the terminating byte.
    NeedMoreData,
    /// The encoding is longer than the integer width allows.
    Invalid,
}

#[inline]
fn try_decode_raw(src: &[u8], max_len: usize) -> VarIntStatus<u64> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().enumerate() {
        if i >= max_len {
            return VarIntStatus::Invalid;
        }
        value |= u64::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return VarIntStatus::Success { value, len: i + 1 };
        }
    }
    if src.len() >= max_len {
        VarIntStatus::Invalid
    } else {
        VarIntStatus::NeedMoreData
    }
}

#[inline]
fn put_raw<B: BufMut>(dst: &mut B, mut value: u64) {
    loop {
        if value & !u64::from(SEGMENT_BITS) == 0 {
            dst.put_u8(value as u8);
            return;
        }
        dst.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

#[inline]
fn raw_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Number of bytes `value` occupies when encoded as a VarInt.
#[inline]
pub fn varint_len(value: i32) -> usize {
    raw_len(u64::from(value as u32))
}

/// Number of bytes `value` occupies when encoded as a VarLong.
#[inline]
pub fn varlong_len(value: i64) -> usize {
    raw_len(value as u64)
}

/// Append the VarInt encoding of `value` to `dst`.
#[inline]
pub fn put_varint<B: BufMut>(dst: &mut B, value: i32) {
    put_raw(dst, u64::from(value as u32));
}

/// Append the VarLong encoding of `value` to `dst`.
#[inline]
pub fn put_varlong<B: BufMut>(dst: &mut B, value: i64) {
    put_raw(dst, value as u64);
}

/// Encode `value` as a standalone VarInt.
pub fn encode_i32(value: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(varint_len(value));
    put_varint(&mut out, value);
    out
}

/// Encode `value` as a standalone VarLong.
pub fn encode_i64(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(varlong_len(value));
    put_varlong(&mut out, value);
    out
}

/// Attempt to decode a VarInt from the start of `src` without failing.
#[inline]
pub fn try_decode_i32(src: &[u8]) -> VarIntStatus<i32> {
    match try_decode_raw(src, MAX_VARINT_LEN) {
        VarIntStatus::Success { value, len } => VarIntStatus::Success {
            value: value as u32 as i32,
            len,
        },
        VarIntStatus::NeedMoreData => VarIntStatus::NeedMoreData,
        VarIntStatus::Invalid => VarIntStatus::Invalid,
    }
}

/// Attempt to decode a VarLong from the start of `src` without failing.
#[inline]
pub fn try_decode_i64(src: &[u8]) -> VarIntStatus<i64> {
    match try_decode_raw(src, MAX_VARLONG_LEN) {
        VarIntStatus::Success { value, len } => VarIntStatus::Success {
            value: value as i64,
            len,
        },
        VarIntStatus::NeedMoreData => VarIntStatus::NeedMoreData,
        VarIntStatus::Invalid => VarIntStatus::Invalid,
    }
}

/// Decode a VarInt from a complete slice, returning the value and the number
/// of bytes consumed.
///
/// # Errors
/// - `MalformedVarInt` if more than 5 groups are present
/// - `UnexpectedEndOfStream` if `src` ends before the terminating byte
pub fn decode_i32(src: &[u8]) -> Result<(i32, usize)> {
    match try_decode_i32(src) {
        VarIntStatus::Success { value, len } => Ok((value, len)),
        VarIntStatus::NeedMoreData => Err(ProtocolError::UnexpectedEndOfStream),
        VarIntStatus::Invalid => Err(ProtocolError::MalformedVarInt),
    }
}

/// Decode a VarLong from a complete slice.
///
/// # Errors
/// Same as [`decode_i32`] with a 10 group limit.
pub fn decode_i64(src: &[u8]) -> Result<(i64, usize)> {
    match try_decode_i64(src) {
        VarIntStatus::Success { value, len } => Ok((value, len)),
        VarIntStatus::NeedMoreData => Err(ProtocolError::UnexpectedEndOfStream),
        VarIntStatus::Invalid => Err(ProtocolError::MalformedVarInt),
    }
}

/// Read one VarInt from an async source, consuming exactly its bytes.
///
/// Returns `Ok(None)` when the source is exhausted before the first byte,
/// which callers treat as a clean end of stream.
///
/// # Errors
/// - `UnexpectedEndOfStream` if the source ends after the first byte
/// - `MalformedVarInt` if the encoding exceeds 5 bytes
pub async fn read_varint_async<R>(src: &mut R) -> Result<Option<i32>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = match src.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return if i == 0 {
                    Ok(None)
                } else {
                    Err(ProtocolError::UnexpectedEndOfStream)
                };
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        };
        value |= u32::from(byte & SEGMENT_BITS) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some(value as i32));
        }
    }
    Err(ProtocolError::MalformedVarInt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (255, &[0xFF, 0x01]),
            (300, &[0xAC, 0x02]),
            (25565, &[0xDD, 0xC7, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (i32::MAX, &[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
            (i32::MIN, &[0x80, 0x80, 0x80, 0x80, 0x08]),
        ];

        for &(value, bytes) in cases {
            assert_eq!(encode_i32(value), bytes, "encoding {value}");
            assert_eq!(varint_len(value), bytes.len());
            assert_eq!(decode_i32(bytes).unwrap(), (value, bytes.len()));
        }
    }

    #[test]
    fn test_varlong_extremes() {
        assert_eq!(encode_i64(-1).len(), MAX_VARLONG_LEN);
        assert_eq!(decode_i64(&encode_i64(i64::MIN)).unwrap().0, i64::MIN);
        assert_eq!(decode_i64(&encode_i64(i64::MAX)).unwrap().0, i64::MAX);
    }

    #[test]
    fn test_need_more_data_vs_invalid() {
        assert_eq!(try_decode_i32(&[]), VarIntStatus::NeedMoreData);
        assert_eq!(try_decode_i32(&[0x80, 0x80]), VarIntStatus::NeedMoreData);
        assert_eq!(
            try_decode_i32(&[0x80, 0x80, 0x80, 0x80, 0x80]),
            VarIntStatus::Invalid
        );
        assert_eq!(
            try_decode_i32(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            VarIntStatus::Invalid
        );
        assert!(matches!(
            decode_i32(&[0x80]),
            Err(ProtocolError::UnexpectedEndOfStream)
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        assert_eq!(decode_i32(&[0x03, 0xAA, 0xBB]).unwrap(), (3, 1));
    }

    #[tokio::test]
    async fn test_read_varint_async() {
        let data = [0xAC, 0x02, 0x05];
        let mut src = &data[..];
        assert_eq!(read_varint_async(&mut src).await.unwrap(), Some(300));
        assert_eq!(read_varint_async(&mut src).await.unwrap(), Some(5));
        assert_eq!(read_varint_async(&mut src).await.unwrap(), None);

        let mut truncated = &[0x80u8][..];
        assert!(matches!(
            read_varint_async(&mut truncated).await,
            Err(ProtocolError::UnexpectedEndOfStream)
        ));

        let mut oversized = &[0xFFu8; 6][..];
        assert!(matches!(
            read_varint_async(&mut oversized).await,
            Err(ProtocolError::MalformedVarInt)
        ));
    }
}
