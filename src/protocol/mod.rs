//! # Protocol Glue
//!
//! Mapping of decoded packets to typed messages. Nothing here takes part in
//! framing; packet layouts are supplied by the caller.

pub mod registry;

pub use registry::PacketRegistry;
