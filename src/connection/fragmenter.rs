//! Outbound message fragmentation (RFC 6455 Section 5.4).
//!
//! Fragmentation happens after extension encoding, so a compressed message
//! is split along its already-compressed bytes. The first fragment carries
//! the message opcode and any RSV bits the pipeline set; the rest are
//! continuation frames with clear RSV.

use crate::protocol::{Frame, OpCode};

/// Splits one encoded whole-message frame into wire frames.
pub struct Fragmenter {
    opcode: OpCode,
    rsv1: bool,
    payload: Vec<u8>,
    max_fragment: usize,
    offset: usize,
    emitted_first: bool,
}

impl Fragmenter {
    /// Fragment `frame` into payloads of at most `max_fragment` bytes.
    #[must_use]
    pub fn new(frame: Frame, max_fragment: usize) -> Self {
        Self {
            opcode: frame.opcode,
            rsv1: frame.rsv1,
            payload: frame.payload,
            max_fragment: max_fragment.max(1),
            offset: 0,
            emitted_first: false,
        }
    }

    /// Whether the payload needs more than one frame.
    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.payload.len() > self.max_fragment
    }
}

impl Iterator for Fragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.offset >= self.payload.len() {
            if !self.emitted_first {
                // Empty message still produces one final frame.
                self.emitted_first = true;
                let mut frame = Frame::new(true, self.opcode, Vec::new());
                frame.rsv1 = self.rsv1;
                return Some(frame);
            }
            return None;
        }

        let remaining = self.payload.len() - self.offset;
        let take = remaining.min(self.max_fragment);
        let chunk = self.payload[self.offset..self.offset + take].to_vec();
        self.offset += take;
        let fin = self.offset >= self.payload.len();

        let mut frame = if self.emitted_first {
            Frame::new(fin, OpCode::Continuation, chunk)
        } else {
            self.emitted_first = true;
            let mut first = Frame::new(fin, self.opcode, chunk);
            first.rsv1 = self.rsv1;
            first
        };
        frame.fin = fin;
        Some(frame)
    }
}
