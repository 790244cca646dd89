//! User-visible message types and close codes (RFC 6455 Section 7.4).

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection completed its purpose.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is leaving (shutdown, navigation).
    GoingAway,
    /// Protocol error (1002). Malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). Endpoint cannot accept the data type.
    UnsupportedData,
    /// No status received (1005). Observed when the peer's close frame
    /// carried no payload; never sent on the wire.
    NoStatus,
    /// Invalid payload (1007). Data inconsistent with the message type,
    /// e.g. non-UTF-8 bytes in a text message.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Extension failure (1010). Negotiated extension could not process
    /// the message, or an expected extension was not negotiated.
    ExtensionFailure,
    /// Internal error (1011). Unexpected condition at the endpoint.
    InternalError,
    /// Any other code (registered 1012-1014, application 3000-4999, ...).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::ExtensionFailure,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::ExtensionFailure => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check whether this code may be placed in an outgoing close frame.
    ///
    /// Codes below 1000 and the reserved codes 1004-1006 and 1015 MUST NOT
    /// be sent (RFC 6455 Section 7.4.1). They can still be observed as the
    /// result of decoding a peer's close frame or a missing payload.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        let code = self.as_u16();
        code >= 1000 && !matches!(code, 1004..=1006 | 1015)
    }
}

/// Close frame contents: status code plus optional human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Reason for closing (UTF-8, fits in the 125-byte control payload).
    pub reason: Option<String>,
}

impl CloseFrame {
    /// Create a close frame with the given code and no reason.
    #[must_use]
    pub const fn new(code: CloseCode) -> Self {
        Self { code, reason: None }
    }

    /// Create a close frame with the given code and reason.
    #[must_use]
    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    /// Close frame for a normal closure with no reason.
    #[must_use]
    pub const fn normal() -> Self {
        Self::new(CloseCode::Normal)
    }
}

/// A complete WebSocket data message.
///
/// Control frames (ping, pong, close) are handled by the connection and
/// never surface here; the inbound stream yields only data messages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Returns `true` if this is a text message.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` if this is a binary message.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// The message payload as bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Consume and return the text content, if this is a text message.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }

    /// Consume and return the binary content, if this is a binary message.
    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Message::Binary(data) => Some(data),
            Message::Text(_) => None,
        }
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            Message::Binary(_) => None,
        }
    }
}
