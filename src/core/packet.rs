//! # Packets
//!
//! A [`Packet`] is the logical unit surfaced to callers: a VarInt id followed
//! by an opaque payload. Its bytes live either in a reference-counted slice of
//! the receive buffer (frames that were not compressed) or in a
//! [`PooledBuffer`] it exclusively owns (decompressed frames and frames read
//! by the streaming reader).
//!
//! Dropping a packet releases its backing storage; a released packet cannot
//! be read because ownership has moved into the drop.
//!
//! [`OutgoingPacket`] is the mirror used on the write side.

use bytes::{BufMut, Bytes};

use crate::core::varint;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::buffer_pool::PooledBuffer;

enum PacketBody {
    Shared(Bytes),
    Pooled(PooledBuffer),
}

impl PacketBody {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            PacketBody::Shared(bytes) => bytes,
            PacketBody::Pooled(buf) => buf.as_ref(),
        }
    }
}

/// A decoded inbound packet
pub struct Packet {
    id: i32,
    body: PacketBody,
    /// Offset of the packet id within `body`
    start: usize,
    /// Offset of the payload within `body`
    payload_start: usize,
}

impl Packet {
    fn parse(body: PacketBody, start: usize) -> Result<Self> {
        let bytes = body.as_slice().get(start..).unwrap_or_default();
        if bytes.is_empty() {
            return Err(ProtocolError::InvalidFrame(constants::ERR_MISSING_PACKET_ID));
        }

        let (id, id_len) = match varint::decode_i32(bytes) {
            Ok(decoded) => decoded,
            Err(ProtocolError::UnexpectedEndOfStream) => {
                return Err(ProtocolError::InvalidFrame(constants::ERR_MISSING_PACKET_ID))
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            id,
            body,
            start,
            payload_start: start + id_len,
        })
    }

    /// Build a packet over a shared slice holding `[id][payload]`.
    pub fn from_shared(body: Bytes) -> Result<Self> {
        Self::parse(PacketBody::Shared(body), 0)
    }

    /// Build a packet that takes ownership of `buffer`, whose packet bytes
    /// begin at `start`.
    ///
    /// On error the buffer is dropped, which returns it to its pool.
    pub fn from_pooled(buffer: PooledBuffer, start: usize) -> Result<Self> {
        Self::parse(PacketBody::Pooled(buffer), start)
    }

    /// Packet id
    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Payload bytes following the id
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.body.as_slice()[self.payload_start..]
    }

    /// Uncompressed packet bytes: id followed by payload
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body.as_slice()[self.start..]
    }

    /// Whether the packet owns a pooled buffer rather than a shared slice
    pub fn is_pooled(&self) -> bool {
        matches!(self.body, PacketBody::Pooled(_))
    }

    /// Detach the payload as `Bytes`.
    ///
    /// Shared packets are sliced without copying; pooled packets copy the
    /// payload and release their buffer.
    pub fn into_payload(self) -> Bytes {
        match self.body {
            PacketBody::Shared(bytes) => bytes.slice(self.payload_start..),
            PacketBody::Pooled(buf) => Bytes::copy_from_slice(&buf[self.payload_start..]),
        }
    }

    /// Release the backing storage.
    pub fn release(self) {}
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("payload_len", &self.payload().len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// A packet queued for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPacket {
    pub id: i32,
    pub payload: Bytes,
}

impl OutgoingPacket {
    pub fn new(id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Length of `[id][payload]`, the size compared against the threshold
    #[inline]
    pub fn body_len(&self) -> usize {
        varint::varint_len(self.id) + self.payload.len()
    }

    /// Append `[id][payload]` to `dst`
    #[inline]
    pub fn write_body<B: BufMut>(&self, dst: &mut B) {
        varint::put_varint(dst, self.id);
        dst.put_slice(&self.payload);
    }
}
