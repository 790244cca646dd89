//! # tether - RFC 6455 WebSocket client
//!
//! `tether` is a WebSocket client library: handshake, frame codec,
//! connection state machine, message reassembly, extension negotiation
//! with permessage-deflate (RFC 7692), and HTTP CONNECT proxy traversal.
//!
//! The transport is pluggable: [`connect`] opens plain TCP for `ws://`,
//! while [`connect_on`] upgrades any `AsyncRead + AsyncWrite` stream the
//! caller brings (TLS included), which also makes every connection-level
//! behavior testable over in-memory pipes.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tether::{connect, Options};
//!
//! let close = connect("ws://echo.example/ws", Options::new(), |mut rx, tx, _info| async move {
//!     tx.send_text("hello").await?;
//!     if let Some(msg) = rx.next().await {
//!         println!("received: {:?}", msg?);
//!     }
//!     Ok(())
//! })
//! .await?;
//! println!("closed with {:?}", close);
//! ```
//!
//! ## Keep-alive and compression
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tether::{AutoPing, DeflateConfig, Options};
//!
//! let options = Options::new()
//!     .with_auto_ping(AutoPing::after(Duration::from_secs(30)))
//!     .with_deflate(DeflateConfig::default())
//!     .with_utf8_validation(true);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod proxy;

mod client;

pub use client::{connect, connect_on, SessionInfo};
pub use config::{AutoPing, Options};
pub use connection::{MessageStream, MessageWriter};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use proxy::ProxyConfig;

#[cfg(feature = "compression")]
pub use extensions::deflate::{DeflateBuilder, DeflateConfig};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<CloseFrame>();
        assert_send::<Options>();
        assert_send::<MessageWriter>();
        assert_send::<MessageStream>();
        assert_send::<ProxyConfig>();
    }

    #[test]
    fn test_shared_handles_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Message>();
        assert_sync::<MessageWriter>();
        assert_sync::<ProxyConfig>();
    }
}
