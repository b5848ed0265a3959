//! # Error Types
//!
//! Error handling for the framing engine.
//!
//! This module defines every error that can terminate a read or write loop,
//! from low-level I/O failures to corrupt frames and decompression mismatches.
//!
//! ## Error Categories
//! - **I/O Errors**: transport failures and premature end of stream
//! - **Framing Errors**: malformed VarInts, impossible frame lengths, oversized frames
//! - **Compression Errors**: compressor failures, declared/actual size mismatches
//! - **Resource Errors**: buffer pool exhaustion
//! - **Lifecycle Errors**: cancellation and closed connections
//!
//! "Need more data" is deliberately absent: it is an expected condition in
//! streaming contexts and is expressed as `Ok(None)` or
//! [`VarIntStatus::NeedMoreData`](crate::core::varint::VarIntStatus) instead.
//!
//! ## Example Usage
//! ```rust
//! use gamewire::core::varint;
//! use gamewire::error::{ProtocolError, Result};
//!
//! fn frame_length(bytes: &[u8]) -> Result<i32> {
//!     let (len, _) = varint::decode_i32(bytes)?;
//!     Ok(len)
//! }
//!
//! assert!(matches!(
//!     frame_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
//!     Err(ProtocolError::MalformedVarInt)
//! ));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_ZERO_LENGTH_FRAME: &str = "Frame length must be at least 1 (packet id)";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_MISSING_PACKET_ID: &str = "Frame body does not contain a packet id";
    pub const ERR_TRUNCATED_SIZE_PREFIX: &str = "Frame body ends inside the uncompressed size prefix";
    pub const ERR_COMPRESSED_BELOW_THRESHOLD: &str = "Compressed frame declares a size below the threshold";

    /// Compression errors
    pub const ERR_SIZE_MISMATCH: &str = "Decompressed size differs from declared size";
    pub const ERR_DECOMPRESSOR_STATUS: &str = "Decompressor reported failure";
    pub const ERR_NEGATIVE_UNCOMPRESSED_SIZE: &str = "Negative uncompressed size";
}

/// ProtocolError is the primary error type for all framing operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed VarInt: too many continuation bytes")]
    MalformedVarInt,

    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed: {0}")]
    DecompressionError(&'static str),

    #[error("Buffer pool exhausted: {0} buffers outstanding")]
    PoolExhausted(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No decoder for packet 0x{id:02X} at protocol {protocol_version}")]
    UnknownPacket { id: i32, protocol_version: i32 },
}

impl ProtocolError {
    /// Whether this error must tear down the connection.
    ///
    /// Every per-frame error is fatal: no resynchronisation is attempted
    /// after a corrupt frame. Configuration errors and unknown packet ids
    /// sit above the framing layer and leave the connection intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::ConfigError(_) | ProtocolError::UnknownPacket { .. }
        )
    }

    /// Rebuild an equivalent error for reporting to a second observer.
    ///
    /// `io::Error` is not `Clone`, so its kind and message are carried over.
    pub(crate) fn duplicate(&self) -> ProtocolError {
        match self {
            ProtocolError::Io(e) => ProtocolError::Io(io::Error::new(e.kind(), e.to_string())),
            ProtocolError::MalformedVarInt => ProtocolError::MalformedVarInt,
            ProtocolError::UnexpectedEndOfStream => ProtocolError::UnexpectedEndOfStream,
            ProtocolError::InvalidFrame(m) => ProtocolError::InvalidFrame(m),
            ProtocolError::OversizedPacket(n) => ProtocolError::OversizedPacket(*n),
            ProtocolError::CompressionFailure => ProtocolError::CompressionFailure,
            ProtocolError::DecompressionError(m) => ProtocolError::DecompressionError(m),
            ProtocolError::PoolExhausted(n) => ProtocolError::PoolExhausted(*n),
            ProtocolError::ConnectionClosed => ProtocolError::ConnectionClosed,
            ProtocolError::Cancelled => ProtocolError::Cancelled,
            ProtocolError::ConfigError(m) => ProtocolError::ConfigError(m.clone()),
            ProtocolError::UnknownPacket { id, protocol_version } => ProtocolError::UnknownPacket {
                id: *id,
                protocol_version: *protocol_version,
            },
        }
    }
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => e,
            ProtocolError::UnexpectedEndOfStream => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
