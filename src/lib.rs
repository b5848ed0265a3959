//! # gamewire
//!
//! Packet framing, compression and buffering for game network clients.
//!
//! Packets travel as VarInt length-prefixed frames. Once the server
//! announces a compression threshold, every frame body also carries the
//! uncompressed size, and bodies at or above the threshold are compressed.
//!
//! ## Layers
//! - [`core`]: VarInt codec, frame decoder, compression stage, tokio codec
//! - [`transport`]: streaming reader/sender, pipelined stream/writer,
//!   flow-controlled pipe, connection tasks, cipher seam
//! - [`utils`]: buffer pool, compression primitives, logging, metrics
//! - [`protocol`]: versioned packet registry
//!
//! ## Example
//! ```rust
//! use bytes::BytesMut;
//! use gamewire::core::codec::PacketCodec;
//! use gamewire::core::packet::OutgoingPacket;
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = PacketCodec::new(64);
//! let mut wire = BytesMut::new();
//! codec.encode(OutgoingPacket::new(3, vec![1u8; 10]), &mut wire).unwrap();
//!
//! let packet = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(packet.id(), 3);
//! assert_eq!(packet.payload(), &[1u8; 10]);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::WireConfig;
pub use crate::core::codec::{CompressionThreshold, PacketCodec};
pub use crate::core::packet::{OutgoingPacket, Packet};
pub use error::{ProtocolError, Result};
pub use transport::connection::Connection;
