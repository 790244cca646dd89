//! Message reassembly from data frames (RFC 6455 Section 5.4).
//!
//! Collates a non-continuation data frame plus its continuation frames into
//! one message, enforcing the size cap and (for uncompressed text) UTF-8 as
//! fragments arrive. Compressed messages are accumulated verbatim and
//! validated after the extension pipeline inflates them.

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// A complete, extension-encoded message as read off the wire.
#[derive(Debug)]
pub struct AssembledMessage {
    /// Text or Binary.
    pub opcode: OpCode,
    /// Concatenated fragment payloads.
    pub payload: Vec<u8>,
    /// RSV1 was set on the first frame; the payload still needs the
    /// pipeline's decode pass.
    pub compressed: bool,
}

/// Collates fragments into whole messages.
pub struct MessageReassembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    compressed: bool,
    utf8: Option<Utf8Validator>,
    validate_utf8: bool,
    max_message_size: usize,
}

impl MessageReassembler {
    /// Create a reassembler with the given message size cap.
    #[must_use]
    pub fn new(max_message_size: usize, validate_utf8: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            compressed: false,
            utf8: None,
            validate_utf8,
            max_message_size,
        }
    }

    /// Feed the next data frame. Returns the completed message on a
    /// `fin=true` frame, `None` while the sequence is still open.
    ///
    /// Control frames must be routed to the state machine instead; they are
    /// ignored here so an interleaved control frame cannot corrupt an open
    /// sequence.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation without an open
    ///   sequence, a non-continuation mid-sequence, or RSV1 set on a
    ///   continuation frame
    /// - `Error::MessageTooLarge` when the running total exceeds the cap
    /// - `Error::InvalidUtf8` for invalid text (uncompressed, validation on)
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        if frame.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
            if frame.rsv1 {
                return Err(Error::ProtocolViolation(
                    "RSV1 set on continuation frame".into(),
                ));
            }
        } else {
            if self.opcode.is_some() {
                return Err(Error::ProtocolViolation(
                    "expected continuation frame".into(),
                ));
            }
            self.opcode = Some(frame.opcode);
            self.compressed = frame.rsv1;
            if self.validate_utf8 && frame.opcode == OpCode::Text && !self.compressed {
                self.utf8 = Some(Utf8Validator::new());
            }
        }

        let new_size = self.buffer.len() + frame.payload.len();
        if new_size > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: new_size,
                max: self.max_message_size,
            });
        }

        if let Some(ref mut validator) = self.utf8 {
            validator.feed(&frame.payload, frame.fin)?;
        }

        self.buffer.extend_from_slice(&frame.payload);

        if frame.fin {
            let payload = self.buffer.split().to_vec();
            let opcode = self.opcode.take().expect("sequence opcode recorded");
            let compressed = self.compressed;
            self.compressed = false;
            self.utf8 = None;
            Ok(Some(AssembledMessage {
                opcode,
                payload,
                compressed,
            }))
        } else {
            Ok(None)
        }
    }

    /// Whether a fragment sequence is open.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler() -> MessageReassembler {
        MessageReassembler::new(1024, true)
    }

    #[test]
    fn test_single_frame_message() {
        let mut r = reassembler();
        let msg = r.push(Frame::text(b"Hello".to_vec())).unwrap().unwrap();
        assert_eq!(msg.opcode, OpCode::Text);
        assert_eq!(msg.payload, b"Hello");
        assert!(!msg.compressed);
        assert!(!r.in_progress());
    }

    #[test]
    fn test_two_fragment_message() {
        let mut r = reassembler();
        assert!(r
            .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap()
            .is_none());
        assert!(r.in_progress());

        let msg = r
            .push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"Hello");
    }

    #[test]
    fn test_many_fragments_concatenate() {
        let mut r = reassembler();
        assert!(r
            .push(Frame::new(false, OpCode::Binary, vec![1, 2]))
            .unwrap()
            .is_none());
        assert!(r
            .push(Frame::new(false, OpCode::Continuation, vec![3, 4]))
            .unwrap()
            .is_none());
        let msg = r
            .push(Frame::new(true, OpCode::Continuation, vec![5, 6]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.opcode, OpCode::Binary);
        assert_eq!(msg.payload, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_control_frame_does_not_disturb_sequence() {
        let mut r = reassembler();
        assert!(r
            .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap()
            .is_none());

        assert!(r.push(Frame::ping(b"probe".to_vec())).unwrap().is_none());
        assert!(r.in_progress());

        let msg = r
            .push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"Hello");
    }

    #[test]
    fn test_continuation_without_sequence_fails() {
        let mut r = reassembler();
        let result = r.push(Frame::new(true, OpCode::Continuation, b"x".to_vec()));
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_non_continuation_mid_sequence_fails() {
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Text, b"a".to_vec()))
            .unwrap();
        let result = r.push(Frame::new(true, OpCode::Text, b"b".to_vec()));
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_rsv1_on_continuation_fails() {
        let mut r = reassembler();
        let mut first = Frame::new(false, OpCode::Text, b"a".to_vec());
        first.rsv1 = true;
        r.push(first).unwrap();

        let mut cont = Frame::new(true, OpCode::Continuation, b"b".to_vec());
        cont.rsv1 = true;
        let result = r.push(cont);
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_size_cap_enforced() {
        let mut r = MessageReassembler::new(8, false);
        assert!(r
            .push(Frame::new(false, OpCode::Binary, vec![0u8; 6]))
            .unwrap()
            .is_none());
        let result = r.push(Frame::new(true, OpCode::Continuation, vec![0u8; 3]));
        assert!(matches!(
            result,
            Err(Error::MessageTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_utf8_enforced_across_fragments() {
        let mut r = reassembler();
        // 🎉 split across fragments
        assert!(r
            .push(Frame::new(false, OpCode::Text, vec![0xf0, 0x9f]))
            .unwrap()
            .is_none());
        let msg = r
            .push(Frame::new(true, OpCode::Continuation, vec![0x8e, 0x89]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "🎉".as_bytes());
    }

    #[test]
    fn test_invalid_utf8_rejected_when_enabled() {
        let mut r = reassembler();
        let result = r.push(Frame::new(true, OpCode::Text, vec![0x80, 0x81]));
        assert!(matches!(result, Err(Error::InvalidUtf8)));
    }

    #[test]
    fn test_invalid_utf8_passes_when_disabled() {
        let mut r = MessageReassembler::new(1024, false);
        let msg = r
            .push(Frame::new(true, OpCode::Text, vec![0x80, 0x81]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, vec![0x80, 0x81]);
    }

    #[test]
    fn test_binary_skips_utf8() {
        let mut r = reassembler();
        let msg = r
            .push(Frame::new(true, OpCode::Binary, vec![0x80, 0x81, 0xff]))
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, vec![0x80, 0x81, 0xff]);
    }

    #[test]
    fn test_compressed_message_skips_incremental_utf8() {
        // Compressed bytes are not UTF-8; validation happens post-inflate.
        let mut r = reassembler();
        let mut first = Frame::new(true, OpCode::Text, vec![0xf3, 0x48, 0xcd]);
        first.rsv1 = true;
        let msg = r.push(first).unwrap().unwrap();
        assert!(msg.compressed);
        assert_eq!(msg.opcode, OpCode::Text);
    }

    #[test]
    fn test_reassembler_reusable_after_message() {
        let mut r = reassembler();
        r.push(Frame::text(b"one".to_vec())).unwrap().unwrap();
        let msg = r.push(Frame::text(b"two".to_vec())).unwrap().unwrap();
        assert_eq!(msg.payload, b"two");
    }
}
