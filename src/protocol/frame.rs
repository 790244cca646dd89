//! Frame parsing and serialization (RFC 6455 Section 5.2).
//!
//! `Frame::parse` is a pure function over a byte slice: it either yields a
//! complete frame plus the number of bytes consumed, or
//! `Error::IncompleteFrame` telling the caller how many more bytes to
//! buffer. The caller's read buffer is the resumable state carrier, so no
//! partial-parse state lives here.

use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask;
use crate::protocol::OpCode;

/// Maximum payload size for control frames (RFC 6455 Section 5.5).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub(crate) fin: bool,
    pub(crate) rsv1: bool,
    pub(crate) rsv2: bool,
    pub(crate) rsv3: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload_len: usize,
    pub(crate) header_len: usize,
}

/// Decode the frame header, or report how many bytes are missing.
pub(crate) fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = byte0 & 0x80 != 0;
    let rsv1 = byte0 & 0x40 != 0;
    let rsv2 = byte0 & 0x20 != 0;
    let rsv3 = byte0 & 0x10 != 0;
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;

    let masked = byte1 & 0x80 != 0;
    let len7 = byte1 & 0x7F;

    let (payload_len, length_end) = match len7 {
        0..=125 => (len7 as usize, 2),
        126 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let len = u64::from_be_bytes([
                buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
            ]);
            // The most significant bit of a 64-bit length must be 0
            // (RFC 6455 Section 5.2).
            if len & (1 << 63) != 0 {
                return Err(Error::ProtocolViolation(
                    "64-bit payload length with high bit set".into(),
                ));
            }
            let len = usize::try_from(len).map_err(|_| {
                Error::ProtocolViolation("payload length exceeds addressable memory".into())
            })?;
            (len, 10)
        }
        _ => unreachable!(),
    };

    let header_len = if masked { length_end + 4 } else { length_end };
    if buf.len() < header_len {
        return Err(Error::IncompleteFrame {
            needed: header_len - buf.len(),
        });
    }

    let mask = masked.then(|| [
        buf[length_end],
        buf[length_end + 1],
        buf[length_end + 2],
        buf[length_end + 3],
    ]);

    Ok(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload_len,
        header_len,
    })
}

/// A single WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                Masking key (if MASK set)                      |
/// +---------------------------------------------------------------+
/// |                        Payload data                           |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of its message.
    pub fin: bool,
    /// Reserved bit 1, claimed by permessage-deflate.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame kind.
    pub opcode: OpCode,
    /// Payload, unmasked.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// A final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// A final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// A ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// A pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// A close frame with a pre-encoded payload.
    #[must_use]
    pub fn close(payload: Vec<u8>) -> Self {
        Self::new(true, OpCode::Close, payload)
    }

    /// Whether any reserved bit is set.
    #[must_use]
    pub const fn has_rsv(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }

    /// Parse one frame from `buf`, unmasking the payload if a key is
    /// present. Returns the frame and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` when more bytes are needed
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode`
    /// - `Error::ProtocolViolation` for a 64-bit length with the top bit set
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;

        let total = header
            .header_len
            .checked_add(header.payload_len)
            .ok_or_else(|| {
                Error::ProtocolViolation("payload length exceeds addressable memory".into())
            })?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key);
        }

        Ok((
            Frame {
                fin: header.fin,
                rsv1: header.rsv1,
                rsv2: header.rsv2,
                rsv3: header.rsv3,
                opcode: header.opcode,
                payload,
            },
            total,
        ))
    }

    /// Validate control-frame constraints (RFC 6455 Section 5.5): a control
    /// frame must be final and carry at most 125 payload bytes.
    ///
    /// # Errors
    ///
    /// `Error::FragmentedControlFrame` or `Error::ControlFrameTooLarge`.
    pub fn validate_control(&self) -> Result<()> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Serialize into `buf`, masking with `mask` when given. Returns the
    /// number of bytes written.
    ///
    /// # Errors
    ///
    /// `Error::ProtocolViolation` if `buf` is smaller than
    /// [`wire_size`](Self::wire_size).
    pub fn write(&self, buf: &mut [u8], mask: Option<[u8; 4]>) -> Result<usize> {
        let payload_len = self.payload.len();

        let (len7, ext_len) = if payload_len <= 125 {
            (payload_len as u8, 0)
        } else if payload_len <= u16::MAX as usize {
            (126, 2)
        } else {
            (127, 8)
        };

        let mask_len = if mask.is_some() { 4 } else { 0 };
        let total = 2 + ext_len + mask_len + payload_len;
        if buf.len() < total {
            return Err(Error::ProtocolViolation(format!(
                "write buffer too small: need {}, have {}",
                total,
                buf.len()
            )));
        }

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf[0] = byte0;
        buf[1] = if mask.is_some() { len7 | 0x80 } else { len7 };

        let mut offset = 2;
        match ext_len {
            2 => {
                buf[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
                offset = 4;
            }
            8 => {
                buf[2..10].copy_from_slice(&(payload_len as u64).to_be_bytes());
                offset = 10;
            }
            _ => {}
        }

        if let Some(key) = mask {
            buf[offset..offset + 4].copy_from_slice(&key);
            offset += 4;
        }

        buf[offset..offset + payload_len].copy_from_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask(&mut buf[offset..offset + payload_len], key);
        }

        Ok(total)
    }

    /// Bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let ext_len = if payload_len <= 125 {
            0
        } else if payload_len <= u16::MAX as usize {
            2
        } else {
            8
        };
        2 + ext_len + if masked { 4 } else { 0 } + payload_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unmasked_text_frame() {
        // FIN=1, opcode=1 (text), unmasked, payload="Hello"
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert!(!frame.has_rsv());
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame() {
        // Masked "Hello", key 37 fa 21 3d
        let data = &[
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_parse_fragment_and_continuation() {
        let data = &[0x01, 0x03, 0x48, 0x65, 0x6c];
        let (frame, _) = Frame::parse(data).unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);

        let data = &[0x80, 0x02, 0x6c, 0x6f];
        let (frame, _) = Frame::parse(data).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Continuation);
        assert_eq!(frame.payload, b"lo");
    }

    #[test]
    fn test_parse_extended_length_16() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00];
        data.extend(vec![0xab; 256]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 4 + 256);
        assert_eq!(frame.payload.len(), 256);
    }

    #[test]
    fn test_parse_extended_length_64() {
        let mut data = vec![0x82, 0x7f];
        data.extend(66000u64.to_be_bytes());
        data.extend(vec![0xcd; 66000]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 10 + 66000);
        assert_eq!(frame.payload.len(), 66000);
    }

    #[test]
    fn test_parse_length_high_bit_rejected() {
        let mut data = vec![0x82, 0x7f];
        data.extend((u64::MAX).to_be_bytes());

        let result = Frame::parse(&data);
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert!(matches!(
            Frame::parse(&[0x83, 0x00]),
            Err(Error::ReservedOpcode(0x03))
        ));
        assert!(matches!(
            Frame::parse(&[0x8b, 0x00]),
            Err(Error::ReservedOpcode(0x0B))
        ));
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(matches!(
            Frame::parse(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
        // len=5 but only 3 payload bytes
        assert!(matches!(
            Frame::parse(&[0x81, 0x05, 0x48, 0x65, 0x6c]),
            Err(Error::IncompleteFrame { needed: 2 })
        ));
        // 16-bit length cut short
        assert!(matches!(
            Frame::parse(&[0x82, 0x7e, 0x01]),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
        // mask key cut short
        assert!(matches!(
            Frame::parse(&[0x81, 0x85, 0x37, 0xfa]),
            Err(Error::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_validate_control_constraints() {
        let mut ping = Frame::ping(b"probe".to_vec());
        assert!(ping.validate_control().is_ok());

        ping.fin = false;
        assert!(matches!(
            ping.validate_control(),
            Err(Error::FragmentedControlFrame)
        ));

        let oversized = Frame::ping(vec![0u8; 126]);
        assert!(matches!(
            oversized.validate_control(),
            Err(Error::ControlFrameTooLarge(126))
        ));

        let at_limit = Frame::ping(vec![0u8; 125]);
        assert!(at_limit.validate_control().is_ok());

        // Data frames are exempt
        let mut text = Frame::text(vec![0u8; 200]);
        text.fin = false;
        assert!(text.validate_control().is_ok());
    }

    #[test]
    fn test_write_unmasked() {
        let frame = Frame::text(b"Hello".to_vec());
        let mut buf = vec![0u8; 32];
        let len = frame.write(&mut buf, None).unwrap();
        assert_eq!(len, 7);
        assert_eq!(&buf[..7], &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_write_masked() {
        let frame = Frame::text(b"Hello".to_vec());
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut buf = vec![0u8; 32];
        let len = frame.write(&mut buf, Some(key)).unwrap();
        assert_eq!(len, 11);
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x85);
        assert_eq!(&buf[2..6], &key);
        assert_eq!(&buf[6..11], &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_write_rsv1() {
        let mut frame = Frame::binary(vec![0x01]);
        frame.rsv1 = true;
        let mut buf = vec![0u8; 8];
        frame.write(&mut buf, None).unwrap();
        assert_eq!(buf[0], 0xc2); // FIN | RSV1 | binary
    }

    #[test]
    fn test_write_length_encodings() {
        for (len, header) in [(125usize, 2usize), (126, 4), (65535, 4), (65536, 10)] {
            let frame = Frame::binary(vec![0u8; len]);
            assert_eq!(frame.wire_size(false), header + len);
            assert_eq!(frame.wire_size(true), header + 4 + len);

            let mut buf = vec![0u8; header + len];
            let written = frame.write(&mut buf, None).unwrap();
            assert_eq!(written, header + len);

            let (parsed, consumed) = Frame::parse(&buf).unwrap();
            assert_eq!(consumed, written);
            assert_eq!(parsed.payload.len(), len);
        }
    }

    #[test]
    fn test_write_buffer_too_small() {
        let frame = Frame::text(b"Hello".to_vec());
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            frame.write(&mut buf, None),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_roundtrip_masked() {
        let original = Frame::text(b"Masked roundtrip".to_vec());
        let key = [0x12, 0x34, 0x56, 0x78];
        let mut buf = vec![0u8; original.wire_size(true)];

        let written = original.write(&mut buf, Some(key)).unwrap();
        let (parsed, consumed) = Frame::parse(&buf[..written]).unwrap();

        assert_eq!(consumed, written);
        assert_eq!(parsed.fin, original.fin);
        assert_eq!(parsed.opcode, original.opcode);
        assert_eq!(parsed.payload, original.payload);
    }

    #[test]
    fn test_parse_rsv_bits_surface() {
        // 0xc1 = FIN | RSV1 | text; codec-level policy decides acceptance
        let (frame, _) = Frame::parse(&[0xc1, 0x00]).unwrap();
        assert!(frame.rsv1);
        assert!(!frame.rsv2);
        assert!(!frame.rsv3);
        assert!(frame.has_rsv());
    }
}
