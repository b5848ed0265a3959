use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, PoisonError, RwLock};

type DecodeFn<M> = dyn Fn(&[u8]) -> Result<M> + Send + Sync + 'static;

struct Entry<M> {
    versions: RangeInclusive<i32>,
    decode: Box<DecodeFn<M>>,
}

/// Packet decoders keyed by packet id, each valid for a range of protocol
/// versions.
///
/// Packet ids and payload layouts change between protocol versions, so one
/// id may carry several decoders over disjoint version ranges. The registry
/// sits above the framing engine: it only ever sees a decoded [`Packet`].
pub struct PacketRegistry<M> {
    decoders: Arc<RwLock<HashMap<i32, Vec<Entry<M>>>>>,
}

impl<M> Default for PacketRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for PacketRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
        }
    }
}

impl<M> PacketRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `decode` for packet `id` across `versions`.
    ///
    /// Fails with `ConfigError` when the range is empty or overlaps a range
    /// already registered for the same id.
    pub fn register<F>(&self, id: i32, versions: RangeInclusive<i32>, decode: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        if versions.is_empty() {
            return Err(ProtocolError::ConfigError(format!(
                "Empty protocol range {versions:?} for packet 0x{id:02X}"
            )));
        }

        let mut decoders = self.decoders.write().unwrap_or_else(PoisonError::into_inner);
        let entries = decoders.entry(id).or_default();
        if let Some(existing) = entries
            .iter()
            .find(|e| e.versions.start() <= versions.end() && versions.start() <= e.versions.end())
        {
            return Err(ProtocolError::ConfigError(format!(
                "Protocol range {versions:?} for packet 0x{id:02X} overlaps {:?}",
                existing.versions
            )));
        }

        entries.push(Entry {
            versions,
            decode: Box::new(decode),
        });
        Ok(())
    }

    /// Whether a decoder exists for `id` at `protocol_version`
    pub fn contains(&self, id: i32, protocol_version: i32) -> bool {
        let decoders = self.decoders.read().unwrap_or_else(PoisonError::into_inner);
        decoders
            .get(&id)
            .is_some_and(|entries| entries.iter().any(|e| e.versions.contains(&protocol_version)))
    }

    /// Decode the payload of `packet` for `protocol_version`.
    pub fn decode(&self, packet: &Packet, protocol_version: i32) -> Result<M> {
        let decoders = self.decoders.read().unwrap_or_else(PoisonError::into_inner);

        decoders
            .get(&packet.id())
            .and_then(|entries| entries.iter().find(|e| e.versions.contains(&protocol_version)))
            .ok_or(ProtocolError::UnknownPacket {
                id: packet.id(),
                protocol_version,
            })
            .and_then(|entry| (entry.decode)(packet.payload()))
    }
}
