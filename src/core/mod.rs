//! # Core Framing Components
//!
//! VarInt coding, frame detection, packet views and the compression codec.
//!
//! ## Components
//! - **VarInt**: 7-bit group integer coding used for lengths, sizes and ids
//! - **Frame**: zero-copy extraction of length-prefixed frames
//! - **Packet**: decoded packet views and outgoing packets
//! - **Codec**: threshold-driven compression stage and tokio codec
//!
//! ## Wire Format
//! ```text
//! Frame     := VarInt(len) Body
//! Body      := [VarInt(uncompressed size)] (RawPacket | Compressed)
//! RawPacket := VarInt(id) payload
//! ```
//!
//! ## Limits
//! - Frame length: 2 097 151 bytes by default (3-byte VarInt)
//! - Declared uncompressed size: 8 MiB by default
//! - Both are checked before any buffer is allocated

pub mod codec;
pub mod frame;
pub mod packet;
pub mod varint;
