//! Error types for the WebSocket client.
//!
//! Variants are grouped by the taxonomy the close path cares about:
//! protocol violations map to close code 1002, data errors to 1007/1009,
//! extension failures to 1010, timeouts to 1011. Handshake and proxy
//! errors surface from `connect` before any frame is exchanged.

use crate::message::CloseCode;
use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved opcode used (0x3-0x7, 0xB-0xF).
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Received a masked frame from the server.
    #[error("Server frame must not be masked")]
    MaskedFrameFromServer,

    /// Reserved bits set without a negotiated extension owning them.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data; parsing can resume once more bytes arrive.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Close frame payload of one byte, or reason that is not UTF-8.
    #[error("Invalid close frame payload")]
    InvalidCloseFrame,

    /// Close code that must not appear on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame size exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Extension failed to transform a frame (e.g. inflate failure).
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid extension configuration or negotiation.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Decompressed message exceeds the configured maximum.
    #[error("Decompressed message too large: {size} bytes (max: {max})")]
    DecompressedTooLarge {
        /// Size reached before aborting.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Peer closed the transport, optionally after a close frame.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(String),

    /// No pong arrived within a full ping period.
    #[error("Ping timed out waiting for pong")]
    PingTimeout,

    /// Invalid or unsupported WebSocket URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Server declined the upgrade (non-101, bad accept hash, bad headers).
    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Handshake head exceeded the read cap.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes buffered before aborting.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Header value would corrupt the request head.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Proxy demanded authentication (407).
    #[error("Proxy authentication required")]
    ProxyAuthenticationRequired,

    /// Proxy answered CONNECT with a non-2xx head.
    #[error("Invalid proxy response head: status {0}")]
    InvalidProxyResponseHead(u16),

    /// Proxy sent body bytes before the tunnel was established.
    #[error("Invalid proxy response: unexpected body")]
    InvalidProxyResponse,

    /// Proxy handshake deadline expired.
    #[error("Proxy handshake timed out")]
    ProxyHandshakeTimeout,

    /// Proxy closed the connection before the tunnel was established.
    #[error("Remote closed connection during proxy handshake")]
    RemoteConnectionClosed,
}

impl Error {
    /// The close code the connection sends to the peer when this error is
    /// raised locally while the connection is open.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::DecompressedTooLarge { .. } => CloseCode::MessageTooBig,
            Error::Extension(_) | Error::InvalidExtension(_) => CloseCode::ExtensionFailure,
            Error::PingTimeout => CloseCode::InternalError,
            _ => CloseCode::ProtocolError,
        }
    }

    /// Whether this error ends the connection without a close frame
    /// (transport already unusable).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000,
            max: 16_384,
        };
        assert_eq!(err.to_string(), "Frame too large: 20000 bytes (max: 16384)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
    }

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(Error::InvalidUtf8.close_code(), CloseCode::InvalidPayload);
        assert_eq!(
            Error::MessageTooLarge { size: 2, max: 1 }.close_code(),
            CloseCode::MessageTooBig
        );
        assert_eq!(
            Error::Extension("inflate".into()).close_code(),
            CloseCode::ExtensionFailure
        );
        assert_eq!(Error::PingTimeout.close_code(), CloseCode::InternalError);
        assert_eq!(Error::ReservedBitsSet.close_code(), CloseCode::ProtocolError);
        assert_eq!(
            Error::FragmentedControlFrame.close_code(),
            CloseCode::ProtocolError
        );
    }

    #[test]
    fn test_transport_errors() {
        assert!(Error::Io("reset".into()).is_transport());
        assert!(Error::ConnectionClosed(None).is_transport());
        assert!(!Error::InvalidUtf8.is_transport());
    }
}
