//! Client upgrade handshake (RFC 6455 Section 4).
//!
//! Produces the GET upgrade request and validates the server's 101
//! response, including the `Sec-WebSocket-Accept` hash and the selected
//! extensions.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::error::{Error, Result};
use crate::extensions::ExtensionOffer;

/// GUID concatenated with the client key for the accept hash (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Read cap for an HTTP response head.
pub const MAX_HEAD_SIZE: usize = 8192;

/// Handshake headers the caller may not override.
const RESERVED_HEADERS: [&str; 6] = [
    "host",
    "origin",
    "connection",
    "upgrade",
    "sec-websocket-version",
    "sec-websocket-key",
];

/// Compute `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`:
/// Base64(SHA-1(key + GUID)).
///
/// ```
/// use tether::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a `Sec-WebSocket-Key`: base64 of 16 CSPRNG bytes.
///
/// # Errors
///
/// Returns `Error::Io` if the platform entropy source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| Error::Io(format!("entropy source failed: {}", e)))?;
    Ok(BASE64.encode(nonce))
}

fn check_header_value(name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Parse header lines into a lowercase-keyed map.
fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// The client's upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target: path plus query string.
    pub path: String,
    /// `Host` header value: host, plus `:port` when the URL carries one.
    pub host: String,
    /// `Origin` header value: scheme://host, without port.
    pub origin: String,
    /// The `Sec-WebSocket-Key` value.
    pub key: String,
    /// `Sec-WebSocket-Extensions` offers, one header line each.
    pub extension_offers: Vec<String>,
    /// User-supplied headers, appended after the required set.
    pub additional_headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Build a request for `url` with a freshly generated key.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` for non-ws(s) schemes or URLs without a host,
    /// `Error::InvalidHeaderValue` when an additional header is reserved or
    /// would corrupt the head.
    pub fn from_url(
        url: &Url,
        extension_offers: Vec<String>,
        additional_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        let key = generate_key()?;
        Self::with_key(url, key, extension_offers, additional_headers)
    }

    /// Build a request with an explicit key (deterministic handshakes).
    ///
    /// # Errors
    ///
    /// See [`from_url`](Self::from_url).
    pub fn with_key(
        url: &Url,
        key: String,
        extension_offers: Vec<String>,
        additional_headers: Vec<(String, String)>,
    ) -> Result<Self> {
        let scheme = url.scheme();
        if scheme != "ws" && scheme != "wss" {
            return Err(Error::InvalidUrl(format!("unsupported scheme: {}", scheme)));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl("missing host".into()))?;

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let origin = format!("{}://{}", scheme, host);

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        for (name, value) in &additional_headers {
            if RESERVED_HEADERS.contains(&name.to_lowercase().as_str()) {
                return Err(Error::InvalidHeaderValue {
                    header: name.clone(),
                    reason: "reserved handshake header".to_string(),
                });
            }
            check_header_value(name, value)?;
        }
        for offer in &extension_offers {
            check_header_value("Sec-WebSocket-Extensions", offer)?;
        }

        Ok(Self {
            path,
            host: host_header,
            origin,
            key,
            extension_offers,
            additional_headers,
        })
    }

    /// Serialize the request head.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(format!("Origin: {}\r\n", self.origin).as_bytes());
        buf.extend_from_slice(b"Connection: upgrade\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        for offer in &self.extension_offers {
            buf.extend_from_slice(format!("Sec-WebSocket-Extensions: {}\r\n", offer).as_bytes());
        }
        for (name, value) in &self.additional_headers {
            buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// The server's parsed 101 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResponse {
    /// The `Sec-WebSocket-Accept` value.
    pub accept: String,
    /// Selected extensions, parsed from `Sec-WebSocket-Extensions`.
    pub extensions: Vec<ExtensionOffer>,
}

impl UpgradeResponse {
    /// Parse and validate the response head against the client `key`.
    ///
    /// # Errors
    ///
    /// `Error::UpgradeFailed` for a non-101 status, missing or wrong
    /// `Upgrade`/`Connection` headers, or a mismatched accept hash.
    pub fn parse(head: &[u8], key: &str) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::UpgradeFailed("response head is not UTF-8".into()))?;

        let mut lines = text.lines();
        let status_line = lines
            .next()
            .ok_or_else(|| Error::UpgradeFailed("empty response".into()))?;

        let status = parse_status_line(status_line)
            .ok_or_else(|| Error::UpgradeFailed(format!("bad status line: {}", status_line)))?;
        if status != 101 {
            return Err(Error::UpgradeFailed(format!(
                "expected status 101, got {}",
                status
            )));
        }

        let headers = parse_headers(lines);

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::UpgradeFailed("missing Upgrade header".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::UpgradeFailed(format!(
                "invalid Upgrade header: {}",
                upgrade
            )));
        }

        let connection = headers
            .get("connection")
            .ok_or_else(|| Error::UpgradeFailed("missing Connection header".into()))?;
        if !connection.to_lowercase().contains("upgrade") {
            return Err(Error::UpgradeFailed(format!(
                "invalid Connection header: {}",
                connection
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::UpgradeFailed("missing Sec-WebSocket-Accept header".into()))?
            .clone();

        if accept != compute_accept_key(key) {
            return Err(Error::UpgradeFailed("Sec-WebSocket-Accept mismatch".into()));
        }

        let extensions = match headers.get("sec-websocket-extensions") {
            Some(value) => ExtensionOffer::parse_header(value)?,
            None => Vec::new(),
        };

        log::debug!(
            "upgrade accepted, {} extension(s) selected",
            extensions.len()
        );

        Ok(Self { accept, extensions })
    }
}

/// Extract the status code from an HTTP/1.x status line.
pub(crate) fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Read an HTTP head off `stream` until the blank line, capped at
/// [`MAX_HEAD_SIZE`]. Returns the head (including the terminating
/// `\r\n\r\n`) and any bytes read past it.
///
/// # Errors
///
/// `Error::ConnectionClosed` on EOF before the head completes and
/// `Error::HandshakeTooLarge` past the cap.
pub(crate) async fn read_head<S>(stream: &mut S) -> Result<(Vec<u8>, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf.to_vec(), rest));
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(Error::HandshakeTooLarge {
                size: buf.len(),
                max: MAX_HEAD_SIZE,
            });
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
    }
}

/// Offset one past the `\r\n\r\n` terminator, if present.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
