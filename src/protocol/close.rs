//! Close frame payload codec (RFC 6455 Section 5.5.1).
//!
//! The payload is a 2-byte big-endian status code followed by an optional
//! UTF-8 reason. An empty payload is legal and decodes to `None`; the
//! connection reports it as code 1005 (no status received), which is
//! observed only and never emitted.

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};

/// Encode a close frame payload.
///
/// # Errors
///
/// Returns `Error::InvalidCloseCode` for codes that must not appear on the
/// wire, and `Error::ControlFrameTooLarge` if the reason would push the
/// payload past the 125-byte control limit.
pub fn encode_close(frame: &CloseFrame) -> Result<Vec<u8>> {
    if !frame.code.is_sendable() {
        return Err(Error::InvalidCloseCode(frame.code.as_u16()));
    }

    let reason = frame.reason.as_deref().unwrap_or("");
    let len = 2 + reason.len();
    if len > crate::protocol::frame::MAX_CONTROL_PAYLOAD {
        return Err(Error::ControlFrameTooLarge(len));
    }

    let mut payload = Vec::with_capacity(len);
    payload.extend_from_slice(&frame.code.as_u16().to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    Ok(payload)
}

/// Decode a close frame payload.
///
/// Returns `None` for an empty payload (peer sent no status).
///
/// # Errors
///
/// `Error::InvalidCloseFrame` for a 1-byte payload or a reason that is not
/// valid UTF-8.
pub fn decode_close(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(Error::InvalidCloseFrame),
        _ => {
            let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
            let reason = if payload.len() > 2 {
                let text =
                    std::str::from_utf8(&payload[2..]).map_err(|_| Error::InvalidCloseFrame)?;
                Some(text.to_owned())
            } else {
                None
            };
            Ok(Some(CloseFrame { code, reason }))
        }
    }
}
