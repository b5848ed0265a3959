#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the framing engine
//! Boundary thresholds, crafted malformed frames, size limits and buffer accounting

use bytes::{BufMut, Bytes, BytesMut};
use gamewire::config::{CodecConfig, MAX_FRAME_LENGTH};
use gamewire::core::codec::{CompressionStage, CompressionThreshold, PacketCodec};
use gamewire::core::packet::OutgoingPacket;
use gamewire::core::varint;
use gamewire::error::{constants, ProtocolError};
use gamewire::transport::stream::{PacketReader, PacketSender};
use gamewire::utils::buffer_pool::BufferPool;
use gamewire::utils::compression::{compress, CompressionKind};
use tokio_util::codec::{Decoder, Encoder};

fn stage(threshold: i32, pool: &BufferPool) -> CompressionStage {
    CompressionStage::new(CompressionThreshold::new(threshold), pool.clone())
}

/// Frame with a compressed body that declares `declared` uncompressed bytes
fn crafted_compressed_frame(actual: &[u8], declared: i32) -> BytesMut {
    let compressed = compress(actual, CompressionKind::Zlib, 6).unwrap();
    let mut body = BytesMut::new();
    varint::put_varint(&mut body, declared);
    body.put_slice(&compressed);

    let mut frame = BytesMut::new();
    varint::put_varint(&mut frame, body.len() as i32);
    frame.put_slice(&body);
    frame
}

// ============================================================================
// WIRE SCENARIOS
// ============================================================================

#[test]
fn test_disabled_compression_frame_layout() {
    let mut codec = PacketCodec::new(-1);
    let mut wire = BytesMut::new();
    let payload = [10u8, 20, 30, 40, 50, 60, 70];
    codec.encode(OutgoingPacket::new(3, payload.to_vec()), &mut wire).unwrap();

    let mut expected = varint::encode_i32(8);
    expected.extend(varint::encode_i32(3));
    expected.extend_from_slice(&payload);
    assert_eq!(&wire[..], expected.as_slice());

    let packet = codec.decode(&mut wire).unwrap().unwrap();
    assert_eq!(packet.id(), 3);
    assert_eq!(packet.payload(), &payload);
}

#[test]
fn test_below_threshold_frame_layout() {
    let mut codec = PacketCodec::new(64);
    let mut wire = BytesMut::new();
    let payload = vec![0x42u8; 10];
    codec.encode(OutgoingPacket::new(0x1F, payload.clone()), &mut wire).unwrap();

    // [len][VarInt(0)][VarInt(id)][payload]
    assert_eq!(wire[0] as usize, wire.len() - 1);
    assert_eq!(wire[1], 0x00);
    assert_eq!(wire[2], 0x1F);
    assert_eq!(&wire[3..], payload.as_slice());

    let packet = codec.decode(&mut wire).unwrap().unwrap();
    assert_eq!(packet.id(), 0x1F);
    assert_eq!(packet.payload(), payload.as_slice());
}

// ============================================================================
// THRESHOLD BOUNDARIES
// ============================================================================

#[test]
fn test_threshold_minus_one_is_uncompressed() {
    let threshold = 256;
    let mut codec = PacketCodec::new(threshold);
    let mut wire = BytesMut::new();
    // One id byte plus 254 payload bytes: body length threshold - 1.
    codec.encode(OutgoingPacket::new(1, vec![0u8; 254]), &mut wire).unwrap();

    let (frame_len, prefix) = varint::decode_i32(&wire).unwrap();
    assert_eq!(frame_len as usize, 256);
    assert_eq!(wire[prefix], 0x00);
}

#[test]
fn test_threshold_exact_is_compressed() {
    let threshold = 256;
    let mut codec = PacketCodec::new(threshold);
    let mut wire = BytesMut::new();
    codec.encode(OutgoingPacket::new(1, vec![0u8; 255]), &mut wire).unwrap();

    let (_, prefix) = varint::decode_i32(&wire).unwrap();
    let (declared, _) = varint::decode_i32(&wire[prefix..]).unwrap();
    assert_eq!(declared, 256);

    let packet = codec.decode(&mut wire).unwrap().unwrap();
    assert_eq!(packet.payload().len(), 255);
}

#[test]
fn test_zero_threshold_compresses_everything() {
    let mut codec = PacketCodec::new(0);
    let mut wire = BytesMut::new();
    codec.encode(OutgoingPacket::new(0, vec![]), &mut wire).unwrap();

    let (_, prefix) = varint::decode_i32(&wire).unwrap();
    assert_eq!(wire[prefix], 1, "declared size of a lone id byte");
    assert_eq!(codec.decode(&mut wire).unwrap().unwrap().id(), 0);
}

#[test]
fn test_reader_and_writer_thresholds_are_independent() {
    let mut writer = PacketCodec::new(-1);
    let mut reader = PacketCodec::new(-1);
    let mut wire = BytesMut::new();

    writer.threshold().set(16);
    writer.encode(OutgoingPacket::new(2, vec![1u8; 4]), &mut wire).unwrap();
    assert_eq!(reader.threshold().get(), -1);

    // The reader still expects no size prefix and reads the zero marker as the id.
    let misread = reader.decode(&mut wire).unwrap().unwrap();
    assert_eq!(misread.id(), 0);
}

// ============================================================================
// MALFORMED FRAMES
// ============================================================================

#[test]
fn test_declared_size_too_small() {
    let mut codec = PacketCodec::new(0);
    let mut frame = crafted_compressed_frame(&[7u8; 100], 99);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::DecompressionError(constants::ERR_SIZE_MISMATCH))
    ));
}

#[test]
fn test_declared_size_too_large() {
    let mut codec = PacketCodec::new(0);
    let mut frame = crafted_compressed_frame(&[7u8; 100], 101);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::DecompressionError(_))
    ));
}

#[test]
fn test_negative_declared_size() {
    let mut codec = PacketCodec::new(0);
    let mut frame = crafted_compressed_frame(&[7u8; 10], -5);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::DecompressionError(_))
    ));
}

#[test]
fn test_declared_size_above_limit() {
    let config = CodecConfig {
        max_uncompressed_length: 1024,
        ..CodecConfig::default()
    };
    let mut codec = PacketCodec::from_config(&config, CompressionThreshold::new(0), BufferPool::new(0));
    let mut frame = crafted_compressed_frame(&[1u8; 10], 4096);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::OversizedPacket(4096))
    ));
}

#[test]
fn test_compressed_frame_below_threshold_rejected() {
    let mut codec = PacketCodec::new(64);
    let mut frame = crafted_compressed_frame(&[9u8; 10], 10);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::InvalidFrame(constants::ERR_COMPRESSED_BELOW_THRESHOLD))
    ));
}

#[test]
fn test_truncated_size_prefix() {
    let mut codec = PacketCodec::new(0);
    // One-byte body holding an unfinished VarInt.
    let mut frame = BytesMut::from(&[0x01, 0x80][..]);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::InvalidFrame(_))
    ));
}

#[test]
fn test_raw_marker_without_packet_id() {
    let mut codec = PacketCodec::new(0);
    let mut frame = BytesMut::from(&[0x01, 0x00][..]);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::InvalidFrame(_))
    ));
}

#[test]
fn test_wrong_algorithm_is_corruption() {
    let config = CodecConfig {
        compression: CompressionKind::Zstd,
        compression_level: 3,
        ..CodecConfig::default()
    };
    let mut codec = PacketCodec::from_config(&config, CompressionThreshold::new(0), BufferPool::new(0));
    let mut frame = crafted_compressed_frame(&[3u8; 64], 64);
    assert!(matches!(
        codec.decode(&mut frame),
        Err(ProtocolError::DecompressionError(_))
    ));
}

#[test]
fn test_frame_limit_boundary() {
    let decoder_limit = MAX_FRAME_LENGTH;
    let mut codec = PacketCodec::new(-1);

    let mut at_limit = BytesMut::new();
    varint::put_varint(&mut at_limit, decoder_limit as i32);
    assert!(codec.decode(&mut at_limit).unwrap().is_none());

    let mut over = BytesMut::new();
    varint::put_varint(&mut over, decoder_limit as i32 + 1);
    assert!(matches!(
        codec.decode(&mut over),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_encode_rejects_frame_over_limit() {
    let mut codec = PacketCodec::new(-1);
    let mut wire = BytesMut::new();
    let result = codec.encode(Bytes::from(vec![0u8; MAX_FRAME_LENGTH + 1]), &mut wire);
    assert!(matches!(result, Err(ProtocolError::OversizedPacket(_))));
    assert!(wire.is_empty());
}

#[test]
fn test_empty_body_is_never_framed() {
    let mut codec = PacketCodec::new(64);
    let mut wire = BytesMut::new();
    assert!(matches!(
        codec.encode(Bytes::new(), &mut wire),
        Err(ProtocolError::InvalidFrame(constants::ERR_MISSING_PACKET_ID))
    ));
    assert!(wire.is_empty());
}

#[tokio::test]
async fn test_empty_raw_body_is_not_sent() {
    let mut sender = PacketSender::new(Vec::new(), stage(-1, &BufferPool::new(0)));
    assert!(matches!(
        sender.send_raw(Bytes::new()).await,
        Err(ProtocolError::InvalidFrame(_))
    ));

    sender.send_raw(Bytes::from_static(&[0x05])).await.unwrap();
    assert_eq!(sender.into_inner(), vec![0x01, 0x05]);
}

// ============================================================================
// BUFFER ACCOUNTING
// ============================================================================

#[test]
fn test_outstanding_returns_to_zero_after_mixed_outcomes() {
    let pool = BufferPool::new(8);
    let mut codec = PacketCodec::with_stage(stage(32, &pool));
    let mut held = Vec::new();

    for i in 0..20 {
        let mut wire = BytesMut::new();
        codec.encode(OutgoingPacket::new(i, vec![i as u8; 200]), &mut wire).unwrap();
        held.push(codec.decode(&mut wire).unwrap().unwrap());

        let mut bad = crafted_compressed_frame(&[1u8; 50], 49);
        assert!(codec.decode(&mut bad).is_err());
    }

    assert_eq!(pool.outstanding(), 20);
    held.clear();
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn test_pool_exhaustion_is_surfaced() {
    let pool = BufferPool::with_limits(0, 1024, 1);
    let mut codec = PacketCodec::with_stage(stage(0, &pool));

    let mut wire = BytesMut::new();
    codec.encode(OutgoingPacket::new(1, vec![5u8; 64]), &mut wire).unwrap();
    codec.encode(OutgoingPacket::new(2, vec![5u8; 64]), &mut wire).unwrap();

    let first = codec.decode(&mut wire).unwrap().unwrap();
    assert!(matches!(
        codec.decode(&mut wire),
        Err(ProtocolError::PoolExhausted(1))
    ));
    drop(first);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn test_streaming_reader_releases_on_every_failure() {
    let pool = BufferPool::new(4);

    let frames: Vec<Vec<u8>> = vec![
        crafted_compressed_frame(&[1u8; 30], 31).to_vec(),
        crafted_compressed_frame(&[1u8; 30], -1).to_vec(),
        vec![0x03, 0x80],
        vec![0x06, 0x20, 0x01],
    ];

    for bytes in frames {
        let mut reader = PacketReader::new(bytes.as_slice(), stage(0, &pool));
        assert!(reader.read_next_packet().await.is_err());
        assert_eq!(pool.outstanding(), 0);
    }
}
