//! Connection configuration.

use std::time::Duration;

use crate::extensions::ExtensionBuilder;
use crate::proxy::ProxyConfig;

/// Automatic keep-alive ping behavior.
///
/// When enabled, the connection sends a ping with a fresh 16-byte nonce on
/// every idle period. A second period elapsing without a matching pong is a
/// timeout and closes the connection with code 1011.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPing {
    /// No automatic pings.
    #[default]
    Disabled,
    /// Ping after every `period` of idleness.
    Enabled {
        /// Idle interval between pings.
        period: Duration,
    },
}

impl AutoPing {
    /// Enable automatic pings with the given period.
    #[must_use]
    pub const fn after(period: Duration) -> Self {
        AutoPing::Enabled { period }
    }

    /// The configured period, if enabled.
    #[must_use]
    pub const fn period(&self) -> Option<Duration> {
        match self {
            AutoPing::Disabled => None,
            AutoPing::Enabled { period } => Some(*period),
        }
    }
}

/// Client connection options.
///
/// Built with `Options::new()` plus `with_*` methods:
///
/// ```rust,ignore
/// let options = Options::new()
///     .with_max_frame_size(64 * 1024)
///     .with_auto_ping(AutoPing::after(Duration::from_secs(30)))
///     .with_header("Authorization", "Bearer ...");
/// ```
pub struct Options {
    /// Maximum size of a single inbound frame payload. Larger frames are
    /// rejected with close code 1009. Also the outbound fragmentation
    /// threshold.
    ///
    /// Default: 16 KB (16 384)
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message. Default: 4 MB.
    pub max_message_size: usize,

    /// Extra headers appended to the upgrade request. These cannot
    /// override the required handshake headers.
    pub additional_headers: Vec<(String, String)>,

    /// Extension builders in pipeline order.
    pub extensions: Vec<Box<dyn ExtensionBuilder + Send + Sync>>,

    /// Maximum wait for the peer's close echo before the transport is
    /// dropped unilaterally. Default: 15 seconds.
    pub close_timeout: Duration,

    /// Automatic keep-alive pings. Default: disabled.
    pub auto_ping: AutoPing,

    /// Validate that text messages are UTF-8. Default: false.
    pub validate_utf8: bool,

    /// Hostname to present in TLS SNI, overriding the URL host. The crate
    /// does not open TLS streams itself; connectors read this.
    pub sni_hostname: Option<String>,

    /// Explicit HTTP CONNECT proxy. Takes precedence over environment
    /// variables.
    pub proxy: Option<ProxyConfig>,

    /// Honor `http_proxy` / `https_proxy` / `no_proxy` when no explicit
    /// proxy is configured. Default: false.
    pub read_proxy_env: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024,
            max_message_size: 4 * 1024 * 1024,
            additional_headers: Vec::new(),
            extensions: Vec::new(),
            close_timeout: Duration::from_secs(15),
            auto_ping: AutoPing::Disabled,
            validate_utf8: false,
            sni_hostname: None,
            proxy: None,
            read_proxy_env: false,
        }
    }
}

impl Options {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum inbound frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum reassembled message size.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Append a header to the upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Register an extension builder at the end of the pipeline.
    #[must_use]
    pub fn with_extension(mut self, builder: Box<dyn ExtensionBuilder + Send + Sync>) -> Self {
        self.extensions.push(builder);
        self
    }

    /// Offer permessage-deflate with the given configuration.
    #[cfg(feature = "compression")]
    #[must_use]
    pub fn with_deflate(self, config: crate::extensions::deflate::DeflateConfig) -> Self {
        self.with_extension(Box::new(crate::extensions::deflate::DeflateBuilder::new(
            config,
        )))
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Configure automatic keep-alive pings.
    #[must_use]
    pub fn with_auto_ping(mut self, auto_ping: AutoPing) -> Self {
        self.auto_ping = auto_ping;
        self
    }

    /// Enable UTF-8 validation of text messages.
    #[must_use]
    pub fn with_utf8_validation(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    /// Override the TLS SNI hostname.
    #[must_use]
    pub fn with_sni_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.sni_hostname = Some(hostname.into());
        self
    }

    /// Route the connection through an HTTP CONNECT proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Honor proxy-related environment variables.
    #[must_use]
    pub fn with_proxy_env(mut self, read_env: bool) -> Self {
        self.read_proxy_env = read_env;
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("max_frame_size", &self.max_frame_size)
            .field("max_message_size", &self.max_message_size)
            .field("additional_headers", &self.additional_headers)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("close_timeout", &self.close_timeout)
            .field("auto_ping", &self.auto_ping)
            .field("validate_utf8", &self.validate_utf8)
            .field("sni_hostname", &self.sni_hostname)
            .field("proxy", &self.proxy)
            .field("read_proxy_env", &self.read_proxy_env)
            .finish()
    }
}
