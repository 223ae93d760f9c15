//! Frame-level round-trip tests: an outgoing message split into frames
//! and fed back through incoming reassembly must reproduce its properties
//! and body exactly, at any frame size, raw or compressed.

use blip_core::{CodecError, Deflater, EngineError, Inflater, MessageBuf, MessageIn, MessageOut};
use blip_proto::{Crc32, FrameHeader, MessageType, checksum::TRAILER_LEN};
use bytes::{Bytes, BytesMut};
use flate2::Compression;

/// Split `out` into frames of at most `frame_size` bytes (header
/// included) and return them.
fn frames_of(out: &mut MessageOut, frame_size: usize, codec: &mut Deflater) -> Vec<Bytes> {
    let mut frames = Vec::new();
    let mut frame = BytesMut::new();
    while !out.finished() {
        out.next_frame(&mut frame, frame_size, codec).unwrap();
        assert!(frame.len() <= frame_size);
        frames.push(Bytes::copy_from_slice(&frame));
    }
    frames
}

/// Feed raw frames into a fresh incoming message.
fn reassemble(
    incoming: &mut MessageIn,
    frames: &[Bytes],
    codec: &mut Inflater,
) -> Result<(), EngineError> {
    let mut decode_buf = BytesMut::new();
    for wire in frames {
        let mut wire = wire.clone();
        let header = FrameHeader::decode(&mut wire)?;
        incoming.add_frame(header.flags, wire, &mut decode_buf, codec)?;
    }
    Ok(())
}

#[test]
fn two_frame_request_wire_bytes() {
    let buf = MessageBuf::request()
        .profile("Insult")
        .property("Language", "French")
        .body(b"Your mother was a hamster");
    let mut out = MessageOut::new(1, &buf);
    let mut codec = Deflater::new(Compression::default());

    // Two-byte header plus a 42-byte payload budget per frame.
    let frames = frames_of(&mut out, 44, &mut codec);
    assert_eq!(frames.len(), 2);

    let mut crc = Crc32::new();

    // number 1, flags REQ|MORE, varint 31, properties, "Your m", checksum
    let mut expected = hex::decode(concat!(
        "01401f",
        "50726f66696c6500496e73756c7400",      // Profile\0Insult\0
        "4c616e6775616765004672656e636800",    // Language\0French\0
        "596f7572206d",                        // "Your m"
    ))
    .unwrap();
    crc.update(&expected[2..]);
    expected.extend_from_slice(&crc.digest().to_be_bytes());
    assert_eq!(frames[0], expected);

    // number 1, flags REQ, "other was a hamster", checksum
    let mut expected = hex::decode(concat!(
        "0100",
        "6f746865722077617320612068616d73746572",
    ))
    .unwrap();
    crc.update(&expected[2..]);
    expected.extend_from_slice(&crc.digest().to_be_bytes());
    assert_eq!(frames[1], expected);

    // Feeding both frames back yields the original message.
    let mut incoming = MessageIn::new(1, MessageType::Request);
    reassemble(&mut incoming, &frames, &mut Inflater::new()).unwrap();
    assert!(incoming.is_complete());
    assert_eq!(incoming.property("Profile"), Some("Insult"));
    assert_eq!(incoming.property("Language"), Some("French"));
    assert_eq!(incoming.property("Horse"), None);
    assert_eq!(incoming.property_or("Horse", "coconuts"), "coconuts");
    assert_eq!(incoming.int_property("Language", -1), -1);
    assert_eq!(incoming.body(), b"Your mother was a hamster");
}

#[test]
fn reassembly_at_every_frame_size() {
    let body = "Your mother was a hamster.".repeat(100);
    let pairs = [("Profile", "Taunt"), ("Language", "French"), ("Repeat", "100")];

    for frame_size in 8..body.len() + 100 {
        let mut buf = MessageBuf::request().body(body.as_bytes());
        for (k, v) in pairs {
            buf = buf.property(k, v);
        }
        let mut out = MessageOut::new(1, &buf);
        let frames =
            frames_of(&mut out, frame_size, &mut Deflater::new(Compression::default()));

        let mut incoming = MessageIn::new(1, MessageType::Request);
        reassemble(&mut incoming, &frames, &mut Inflater::new())
            .unwrap_or_else(|e| panic!("frame size {frame_size}: {e}"));
        assert!(incoming.is_complete(), "frame size {frame_size}");
        assert_eq!(incoming.body(), body.as_bytes(), "frame size {frame_size}");
        let decoded: Vec<_> = incoming.properties().collect();
        assert_eq!(decoded, pairs, "frame size {frame_size}");
    }
}

#[test]
fn compressed_large_body_round_trip() {
    let body = "A hamster, and your father smelt of elderberries! ".repeat(56);
    assert!(body.len() > 2500);

    for frame_size in [100, 257, 1024, 4096, 32_768] {
        let buf = MessageBuf::request()
            .profile("Taunt")
            .compressed(true)
            .body(body.as_bytes());
        let mut out = MessageOut::new(1, &buf);
        let frames = frames_of(&mut out, frame_size, &mut Deflater::new(Compression::default()));

        let wire_bytes: usize = frames.iter().map(Bytes::len).sum();
        assert!(
            wire_bytes < body.len(),
            "frame size {frame_size}: {wire_bytes} wire bytes for {} plain",
            body.len()
        );

        let mut incoming = MessageIn::new(1, MessageType::Request);
        reassemble(&mut incoming, &frames, &mut Inflater::new())
            .unwrap_or_else(|e| panic!("frame size {frame_size}: {e}"));
        assert!(incoming.is_complete());
        assert_eq!(incoming.body(), body.as_bytes(), "frame size {frame_size}");
        assert_eq!(incoming.profile(), Some("Taunt"));
    }
}

#[test]
fn any_payload_bit_flip_is_detected() {
    let buf = MessageBuf::request().profile("Echo").body(b"some body text worth protecting");
    let mut out = MessageOut::new(1, &buf);
    let frames = frames_of(&mut out, 4096, &mut Deflater::new(Compression::default()));
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];

    let mut checksum_failures = 0;
    // Flip every bit of the payload (header excluded) and expect every
    // corruption to be caught.
    for byte in 2..frame.len() {
        for bit in 0..8 {
            let mut corrupt = frame.to_vec();
            corrupt[byte] ^= 1 << bit;

            let mut incoming = MessageIn::new(1, MessageType::Request);
            let result = reassemble(
                &mut incoming,
                &[Bytes::from(corrupt)],
                &mut Inflater::new(),
            );
            let err = result.expect_err("corruption must not go unnoticed");
            if matches!(err, EngineError::Codec(CodecError::ChecksumMismatch { .. })) {
                checksum_failures += 1;
            }
        }
    }
    // Most flips land in body bytes or the trailer and fail the checksum
    // itself; the rest corrupt the property framing first.
    assert!(checksum_failures > 0);
}

#[test]
fn empty_message_round_trip() {
    let mut out = MessageOut::new(1, &MessageBuf::request());
    let frames = frames_of(&mut out, 4096, &mut Deflater::new(Compression::default()));
    assert_eq!(frames.len(), 1);
    // number, flags, varint 0, checksum
    assert_eq!(frames[0].len(), 3 + TRAILER_LEN);

    let mut incoming = MessageIn::new(1, MessageType::Request);
    reassemble(&mut incoming, &frames, &mut Inflater::new()).unwrap();
    assert!(incoming.is_complete());
    assert_eq!(incoming.properties().count(), 0);
    assert!(incoming.body().is_empty());
}
