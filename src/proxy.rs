//! HTTP CONNECT proxy traversal and proxy environment handling.
//!
//! The tunnel handshake is an explicit state machine
//! (`Initialized → ConnectSent → HeadReceived → Completed`, failing into a
//! terminal error) driven over the same stream the WebSocket upgrade will
//! use afterwards. Environment resolution follows the conventional
//! `http_proxy` / `https_proxy` / `no_proxy` variables.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::handshake::{parse_status_line, read_head};

/// HTTP CONNECT proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Headers sent with the CONNECT request (e.g. `Proxy-Authorization`).
    pub headers: Vec<(String, String)>,
    /// Deadline for the whole tunnel handshake. Default: 30 seconds.
    pub timeout: Duration,
}

impl ProxyConfig {
    /// Proxy at `host:port` with no extra headers.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            headers: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Append a CONNECT request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parse a proxy environment value: `http://host:port`, `host:port`,
    /// or a bare host (port defaults to 80).
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` when no host can be extracted.
    pub fn from_env_value(value: &str) -> Result<Self> {
        let value = value.trim().trim_end_matches('/');
        let rest = value
            .split_once("://")
            .map_or(value, |(_, rest)| rest);
        if rest.is_empty() {
            return Err(Error::InvalidUrl(format!("empty proxy value: {}", value)));
        }

        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    Error::InvalidUrl(format!("invalid proxy port in: {}", value))
                })?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(rest, 80)),
        }
    }
}

/// Tunnel handshake phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunnelState {
    Initialized,
    ConnectSent,
    HeadReceived,
    Completed,
}

/// Pure CONNECT handshake state machine; the async driver feeds it I/O
/// events.
#[derive(Debug)]
struct TunnelHandshake {
    state: TunnelState,
}

impl TunnelHandshake {
    fn new() -> Self {
        Self {
            state: TunnelState::Initialized,
        }
    }

    fn connect_sent(&mut self) {
        debug_assert_eq!(self.state, TunnelState::Initialized);
        self.state = TunnelState::ConnectSent;
    }

    /// Judge the response head. 2xx advances; 407 and everything else are
    /// terminal failures.
    fn on_head(&mut self, status: Option<u16>) -> Result<()> {
        debug_assert_eq!(self.state, TunnelState::ConnectSent);
        match status {
            Some(code) if (200..300).contains(&code) => {
                self.state = TunnelState::HeadReceived;
                Ok(())
            }
            Some(407) => Err(Error::ProxyAuthenticationRequired),
            Some(code) => Err(Error::InvalidProxyResponseHead(code)),
            None => Err(Error::InvalidProxyResponseHead(0)),
        }
    }

    /// Bytes between the head and tunnel establishment are illegal.
    fn on_body(&self) -> Error {
        Error::InvalidProxyResponse
    }

    fn complete(&mut self) {
        debug_assert_eq!(self.state, TunnelState::HeadReceived);
        self.state = TunnelState::Completed;
    }

    fn is_completed(&self) -> bool {
        self.state == TunnelState::Completed
    }
}

/// Run the CONNECT handshake for `target_host:target_port` over `stream`.
/// On success the stream is a transparent tunnel and the WebSocket upgrade
/// proceeds on it directly.
///
/// # Errors
///
/// - `Error::ProxyAuthenticationRequired` on 407
/// - `Error::InvalidProxyResponseHead` on any other non-2xx head
/// - `Error::InvalidProxyResponse` when body bytes precede the tunnel
/// - `Error::ProxyHandshakeTimeout` when the deadline fires
/// - `Error::RemoteConnectionClosed` when the proxy hangs up early
pub(crate) async fn establish_tunnel<S>(
    stream: &mut S,
    target_host: &str,
    target_port: u16,
    config: &ProxyConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    log::debug!(
        "CONNECT {}:{} via {}:{}",
        target_host,
        target_port,
        config.host,
        config.port
    );
    match tokio::time::timeout(
        config.timeout,
        drive_tunnel(stream, target_host, target_port, &config.headers),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::ProxyHandshakeTimeout),
    }
}

async fn drive_tunnel<S>(
    stream: &mut S,
    target_host: &str,
    target_port: u16,
    headers: &[(String, String)],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut machine = TunnelHandshake::new();

    let mut request = format!("CONNECT {}:{} HTTP/1.1\r\n", target_host, target_port);
    for (name, value) in headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    machine.connect_sent();

    let (head, leftover) = read_head(stream).await.map_err(|e| match e {
        Error::ConnectionClosed(_) => Error::RemoteConnectionClosed,
        other => other,
    })?;

    let status_line = std::str::from_utf8(&head)
        .ok()
        .and_then(|text| text.lines().next())
        .unwrap_or("");
    machine.on_head(parse_status_line(status_line))?;

    if !leftover.is_empty() {
        return Err(machine.on_body());
    }

    machine.complete();
    debug_assert!(machine.is_completed());
    log::debug!("tunnel established via {}:{}", target_host, target_port);
    Ok(())
}

/// Whether `host` matches the `no_proxy` list. Entries are
/// whitespace-trimmed and comma-separated; `*` disables proxying
/// entirely; a leading dot matches both the bare domain and any
/// subdomain.
#[must_use]
pub fn no_proxy_matches(no_proxy: &str, host: &str) -> bool {
    for entry in no_proxy.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry == "*" {
            return true;
        }
        let bare = entry.strip_prefix('.').unwrap_or(entry);
        if host == bare {
            return true;
        }
        if host.len() > bare.len()
            && host.ends_with(bare)
            && host.as_bytes()[host.len() - bare.len() - 1] == b'.'
        {
            return true;
        }
    }
    false
}

fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Resolve the proxy for `scheme`/`host` from the environment:
/// `http_proxy` for ws, `https_proxy` (preferred) with `http_proxy`
/// fallback for wss, all subject to `no_proxy`.
///
/// # Errors
///
/// `Error::InvalidUrl` when a set variable cannot be parsed.
pub(crate) fn proxy_from_env(scheme: &str, host: &str) -> Result<Option<ProxyConfig>> {
    if let Some(no_proxy) = env_var(&["no_proxy", "NO_PROXY"]) {
        if no_proxy_matches(&no_proxy, host) {
            log::debug!("no_proxy matches {}, connecting directly", host);
            return Ok(None);
        }
    }

    let value = if scheme == "wss" {
        env_var(&["https_proxy", "HTTPS_PROXY"]).or_else(|| env_var(&["http_proxy", "HTTP_PROXY"]))
    } else {
        env_var(&["http_proxy", "HTTP_PROXY"])
    };

    value.map(|v| ProxyConfig::from_env_value(&v)).transpose()
}
