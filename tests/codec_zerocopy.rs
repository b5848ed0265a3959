//! Integration tests for zero-copy codec operations
//!
//! Uncompressed frames must be handed out as slices of the receive buffer,
//! and only decompressed frames may own a separate pooled buffer.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use gamewire::core::codec::{CompressionStage, CompressionThreshold, PacketCodec};
use gamewire::core::packet::OutgoingPacket;
use gamewire::utils::buffer_pool::BufferPool;
use tokio_util::codec::{Decoder, Encoder};

fn encode(codec: &mut PacketCodec, packets: &[OutgoingPacket]) -> BytesMut {
    let mut wire = BytesMut::new();
    for packet in packets {
        codec.encode(packet.clone(), &mut wire).expect("encode");
    }
    wire
}

#[test]
fn test_uncompressed_payload_points_into_receive_buffer() {
    let mut codec = PacketCodec::new(-1);
    let mut buffer = encode(&mut codec, &[OutgoingPacket::new(5, vec![1u8, 2, 3, 4, 5])]);
    let start = buffer.as_ptr() as usize;
    let end = start + buffer.len();

    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    let payload_ptr = packet.payload().as_ptr() as usize;

    assert!(!packet.is_pooled());
    assert!(payload_ptr >= start && payload_ptr < end);
    assert_eq!(buffer.len(), 0);
}

#[test]
fn test_zero_marker_frame_is_still_zero_copy() {
    let mut codec = PacketCodec::new(256);
    let mut buffer = encode(&mut codec, &[OutgoingPacket::new(1, vec![7u8; 40])]);
    let start = buffer.as_ptr() as usize;

    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    assert!(!packet.is_pooled());
    // Length prefix, zero marker and id precede the payload.
    assert_eq!(packet.payload().as_ptr() as usize, start + 3);
}

#[test]
fn test_into_payload_shares_memory() {
    let mut codec = PacketCodec::new(-1);
    let mut buffer = encode(&mut codec, &[OutgoingPacket::new(2, vec![9u8; 32])]);

    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    let before = packet.payload().as_ptr();
    let payload: Bytes = packet.into_payload();
    assert_eq!(payload.as_ptr(), before);
    assert_eq!(payload.len(), 32);
}

#[test]
fn test_partial_decode_preserves_buffer() {
    let mut codec = PacketCodec::new(-1);

    // Length prefix says 10 bytes, only 3 present.
    let mut buffer = BytesMut::from(&[0x0A, 0x01, 0x02, 0x03][..]);
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(&buffer[..], &[0x0A, 0x01, 0x02, 0x03]);
    assert!(buffer.capacity() >= 11);
}

#[test]
fn test_back_to_back_frames_keep_order_and_remainder() {
    let mut codec = PacketCodec::new(-1);
    let packets: Vec<_> = (0..10).map(|i| OutgoingPacket::new(i, vec![i as u8; i as usize])).collect();
    let mut buffer = encode(&mut codec, &packets);
    buffer.extend_from_slice(&[0x05, 0x01]);

    for expected in &packets {
        let packet = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(packet.id(), expected.id);
        assert_eq!(packet.payload(), &expected.payload[..]);
    }
    assert!(codec.decode(&mut buffer).unwrap().is_none());
    assert_eq!(&buffer[..], &[0x05, 0x01]);
}

#[test]
fn test_decoded_packets_outlive_later_reads() {
    let mut codec = PacketCodec::new(-1);
    let mut buffer = encode(&mut codec, &[OutgoingPacket::new(1, vec![0xAA; 16])]);

    let held = codec.decode(&mut buffer).unwrap().unwrap();
    // More network reads land in the same buffer.
    buffer.extend_from_slice(&encode(&mut codec, &[OutgoingPacket::new(2, vec![0xBB; 16])]));
    let next = codec.decode(&mut buffer).unwrap().unwrap();

    assert_eq!(held.payload(), &[0xAA; 16]);
    assert_eq!(next.payload(), &[0xBB; 16]);
}

#[test]
fn test_compressed_frame_owns_pooled_buffer() {
    let pool = BufferPool::new(4);
    let stage = CompressionStage::new(CompressionThreshold::new(64), pool.clone());
    let mut codec = PacketCodec::with_stage(stage);

    let mut buffer = encode(&mut codec, &[OutgoingPacket::new(3, vec![1u8; 4096])]);
    assert!(buffer.len() < 4096);

    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    assert!(packet.is_pooled());
    assert_eq!(packet.payload().len(), 4096);
    assert_eq!(pool.outstanding(), 1);

    packet.release();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_encode_appends_without_clearing() {
    let mut codec = PacketCodec::new(-1);
    let mut buffer = BytesMut::from(&b"prefix"[..]);

    codec.encode(OutgoingPacket::new(1, vec![2u8]), &mut buffer).unwrap();
    codec.encode(Bytes::from_static(&[0x03, 0x04]), &mut buffer).unwrap();

    assert_eq!(&buffer[..6], b"prefix");
    assert_eq!(&buffer[6..], &[0x02, 0x01, 0x02, 0x02, 0x03, 0x04]);
}
