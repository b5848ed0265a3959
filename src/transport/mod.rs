//! # Transports
//!
//! Packet I/O on top of any tokio byte stream.
//!
//! - [`stream`]: one-frame-at-a-time reader and sender
//! - [`pipe`]: flow-controlled in-memory byte channel and copy task
//! - [`pipeline`]: lazy packet stream and staging writer over a byte feed
//! - [`connection`]: pump, writer and drain tasks tied to one transport
//! - [`cipher`]: stream transform seam applied beneath framing

pub mod cipher;
pub mod connection;
pub mod pipe;
pub mod pipeline;
pub mod stream;
