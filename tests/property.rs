//! Property-based tests for the frame codec, masking, handshake, and
//! reassembly.

use proptest::prelude::*;
use tether::protocol::{
    apply_mask, compute_accept_key, Frame, MessageReassembler, OpCode, Utf8Validator,
};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)]
}

fn control_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Close), Just(OpCode::Ping), Just(OpCode::Pong)]
}

proptest! {
    // Roundtrip: parse(write(frame)) == frame, unmasked.
    #[test]
    fn prop_roundtrip_unmasked(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000)
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let mut buf = vec![0u8; frame.wire_size(false)];
        let written = frame.write(&mut buf, None).unwrap();

        let (parsed, consumed) = Frame::parse(&buf[..written]).unwrap();
        prop_assert_eq!(consumed, written);
        prop_assert_eq!(parsed, frame);
    }

    // Roundtrip with masking: the parser unmasks back to the original.
    #[test]
    fn prop_roundtrip_masked(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..500),
        key in any::<[u8; 4]>()
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let mut buf = vec![0u8; frame.wire_size(true)];
        let written = frame.write(&mut buf, Some(key)).unwrap();

        let (parsed, consumed) = Frame::parse(&buf[..written]).unwrap();
        prop_assert_eq!(consumed, written);
        prop_assert_eq!(parsed.payload, frame.payload);
        prop_assert_eq!(parsed.fin, frame.fin);
        prop_assert_eq!(parsed.opcode, frame.opcode);
    }

    // Mask symmetry: unmask(mask(p, k), k) == p.
    #[test]
    fn prop_mask_involution(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        key in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, key);
        apply_mask(&mut masked, key);
        prop_assert_eq!(masked, data);
    }

    // Length encoding is transparent across the 7/16/64-bit boundaries.
    #[test]
    fn prop_length_encoding(payload in prop::collection::vec(any::<u8>(), 0..70000)) {
        let frame = Frame::binary(payload.clone());
        let mut buf = vec![0u8; frame.wire_size(false)];
        let written = frame.write(&mut buf, None).unwrap();

        let (parsed, consumed) = Frame::parse(&buf[..written]).unwrap();
        prop_assert_eq!(consumed, written);
        prop_assert_eq!(parsed.payload.len(), payload.len());
    }

    // Control frames: <=125 passes validation, >125 fails.
    #[test]
    fn prop_control_frame_size_rule(
        opcode in control_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let within = payload.len() <= 125;
        let frame = Frame::new(true, opcode, payload);
        prop_assert_eq!(frame.validate_control().is_ok(), within);
    }

    // wire_size always matches the bytes actually produced.
    #[test]
    fn prop_wire_size_accuracy(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..10000),
        masked in any::<bool>()
    ) {
        let frame = Frame::new(fin, opcode, payload);
        let expected = frame.wire_size(masked);

        let key = masked.then_some([0x12, 0x34, 0x56, 0x78]);
        let mut buf = vec![0u8; expected + 16];
        let written = frame.write(&mut buf, key).unwrap();
        prop_assert_eq!(expected, written);
    }

    // Truncated frames never parse.
    #[test]
    fn prop_truncation_detected(
        payload in prop::collection::vec(any::<u8>(), 1..500),
        cut in 1..50usize
    ) {
        let frame = Frame::binary(payload);
        let mut buf = vec![0u8; frame.wire_size(false)];
        let written = frame.write(&mut buf, None).unwrap();

        let truncated = written.saturating_sub(cut).max(1);
        if truncated < written {
            prop_assert!(Frame::parse(&buf[..truncated]).is_err());
        }
    }

    // Back-to-back frames parse sequentially with nothing left over.
    #[test]
    fn prop_sequential_parsing(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..100), 1..5)
    ) {
        let frames: Vec<_> = payloads
            .iter()
            .map(|p| Frame::binary(p.clone()))
            .collect();

        let mut wire = Vec::new();
        for frame in &frames {
            let mut buf = vec![0u8; frame.wire_size(false)];
            let written = frame.write(&mut buf, None).unwrap();
            wire.extend_from_slice(&buf[..written]);
        }

        let mut offset = 0;
        for frame in &frames {
            let (parsed, consumed) = Frame::parse(&wire[offset..]).unwrap();
            prop_assert_eq!(&parsed.payload, &frame.payload);
            offset += consumed;
        }
        prop_assert_eq!(offset, wire.len());
    }

    // Accept hash is deterministic, 28 base64 chars, and key-sensitive.
    #[test]
    fn prop_accept_key_shape(key in "[A-Za-z0-9+/]{22}==") {
        let accept = compute_accept_key(&key);
        prop_assert_eq!(accept.len(), 28);
        prop_assert!(accept.ends_with('='));
        prop_assert_eq!(compute_accept_key(&key), accept);
    }

    // Any fragmentation of a payload reassembles to the original bytes.
    #[test]
    fn prop_reassembly_is_concatenation(
        payload in prop::collection::vec(any::<u8>(), 1..2000),
        boundaries in prop::collection::vec(any::<prop::sample::Index>(), 0..6)
    ) {
        let mut cuts: Vec<usize> = boundaries
            .iter()
            .map(|idx| idx.index(payload.len()))
            .collect();
        cuts.push(0);
        cuts.push(payload.len());
        cuts.sort_unstable();
        cuts.dedup();

        let mut reassembler = MessageReassembler::new(1 << 20, false);
        let mut result = None;

        for (i, window) in cuts.windows(2).enumerate() {
            let chunk = payload[window[0]..window[1]].to_vec();
            let fin = window[1] == payload.len();
            let opcode = if i == 0 { OpCode::Binary } else { OpCode::Continuation };
            let out = reassembler.push(Frame::new(fin, opcode, chunk)).unwrap();
            if fin {
                result = out;
            } else {
                prop_assert!(out.is_none());
            }
        }

        let message = result.expect("final fragment completes the message");
        prop_assert_eq!(message.payload, payload);
        prop_assert_eq!(message.opcode, OpCode::Binary);
    }

    // A valid UTF-8 string accepted no matter how it is fragmented.
    #[test]
    fn prop_utf8_fragmentation_insensitive(
        text in "\\PC{0,200}",
        split in any::<prop::sample::Index>()
    ) {
        let bytes = text.as_bytes();
        let cut = split.index(bytes.len().max(1)).min(bytes.len());

        let mut validator = Utf8Validator::new();
        validator.feed(&bytes[..cut], false).unwrap();
        validator.feed(&bytes[cut..], true).unwrap();
    }
}

mod boundaries {
    use super::*;

    #[test]
    fn test_length_encoding_boundaries() {
        for len in [0, 1, 125, 126, 127, 255, 256, 65534, 65535, 65536] {
            let frame = Frame::binary(vec![0xa5; len]);
            let mut buf = vec![0u8; frame.wire_size(false)];
            let written = frame.write(&mut buf, None).unwrap();

            let (parsed, consumed) = Frame::parse(&buf[..written]).unwrap();
            assert_eq!(consumed, written, "length {}", len);
            assert_eq!(parsed.payload.len(), len);
        }
    }

    #[test]
    fn test_degenerate_masks() {
        for key in [[0u8; 4], [0xff; 4]] {
            let frame = Frame::text(b"mask edge case".to_vec());
            let mut buf = vec![0u8; frame.wire_size(true)];
            let written = frame.write(&mut buf, Some(key)).unwrap();

            let (parsed, _) = Frame::parse(&buf[..written]).unwrap();
            assert_eq!(parsed.payload, b"mask edge case");
        }
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
