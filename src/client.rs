//! The client entry point.
//!
//! [`connect`] opens a plain TCP stream (traversing an HTTP proxy when
//! configured) and upgrades it; [`connect_on`] is the transport-generic
//! core for callers that bring their own stream, TLS included. Both run
//! the user handler with the live message stream and writer, then perform
//! the close handshake when the handler returns.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use url::Url;

use crate::config::Options;
use crate::connection::connection::{spawn, ConnectionHandles, CoreConfig};
use crate::connection::{MessageStream, MessageWriter};
use crate::error::{Error, Result};
use crate::extensions::ExtensionPipeline;
use crate::message::CloseFrame;
use crate::protocol::handshake::{read_head, UpgradeRequest, UpgradeResponse};
use crate::proxy::{establish_tunnel, proxy_from_env, ProxyConfig};

/// Negotiated facts handed to the connection handler.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The URL the connection was opened against.
    pub url: Url,
    /// Extensions the server selected, as header entries.
    pub negotiated_extensions: Vec<String>,
}

/// Aborts the connection tasks when the owning future is dropped, so a
/// cancelled `connect` tears down reader, writer, pipeline, and transport.
/// Aborting an already-finished task is a no-op.
struct TaskGuard {
    aborts: [AbortHandle; 2],
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for abort in &self.aborts {
            abort.abort();
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "wss" {
        443
    } else {
        80
    }
}

fn resolve_proxy(url: &Url, options: &Options) -> Result<Option<ProxyConfig>> {
    if let Some(proxy) = &options.proxy {
        return Ok(Some(proxy.clone()));
    }
    if options.read_proxy_env {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl("missing host".into()))?;
        return proxy_from_env(url.scheme(), host);
    }
    Ok(None)
}

/// Connect to `url` over plain TCP and run `handler`.
///
/// Only `ws://` URLs are accepted here: TLS stream construction is the
/// caller's concern, so `wss://` connections go through [`connect_on`]
/// with a caller-built TLS stream (honoring
/// [`Options::sni_hostname`](crate::Options)).
///
/// Returns the close frame observed from the peer, if any.
///
/// # Errors
///
/// Handshake and proxy failures surface here before the handler runs;
/// protocol and transport failures surface after it returns.
pub async fn connect<H, Fut>(url: &str, options: Options, handler: H) -> Result<Option<CloseFrame>>
where
    H: FnOnce(MessageStream, MessageWriter, SessionInfo) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let parsed = Url::parse(url)?;
    if parsed.scheme() != "ws" {
        return Err(Error::InvalidUrl(format!(
            "connect() handles ws:// only; for {}:// build the stream and use connect_on()",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("missing host".into()))?
        .to_string();
    let port = parsed.port().unwrap_or_else(|| default_port("ws"));

    let proxy = resolve_proxy(&parsed, &options)?;
    let stream = match &proxy {
        Some(proxy) => {
            log::debug!("connecting via proxy {}:{}", proxy.host, proxy.port);
            TcpStream::connect((proxy.host.as_str(), proxy.port)).await?
        }
        None => TcpStream::connect((host.as_str(), port)).await?,
    };
    stream.set_nodelay(true)?;

    connect_on(stream, url, options, handler).await
}

/// Upgrade an already-established duplex stream and run `handler`.
///
/// When a proxy is configured the CONNECT handshake runs first, on this
/// same stream (the caller connects the stream to the proxy). The
/// handler receives the inbound [`MessageStream`], the outbound
/// [`MessageWriter`], and a [`SessionInfo`]; when it returns, a close
/// handshake with code 1000 is performed (unless already closing) and
/// the peer's close frame is returned.
///
/// # Errors
///
/// See [`connect`].
pub async fn connect_on<S, H, Fut>(
    mut stream: S,
    url: &str,
    options: Options,
    handler: H,
) -> Result<Option<CloseFrame>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: FnOnce(MessageStream, MessageWriter, SessionInfo) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("missing host".into()))?
        .to_string();
    let port = parsed
        .port()
        .unwrap_or_else(|| default_port(parsed.scheme()));

    if let Some(proxy) = resolve_proxy(&parsed, &options)? {
        establish_tunnel(&mut stream, &host, port, &proxy).await?;
    }

    // Upgrade.
    let offers = ExtensionPipeline::offers(&options.extensions);
    let request =
        UpgradeRequest::from_url(&parsed, offers, options.additional_headers.clone())?;
    log::debug!("upgrading {} (key {})", parsed, request.key);
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    let (head, leftover) = read_head(&mut stream).await?;
    let response = UpgradeResponse::parse(&head, &request.key)?;
    let pipeline = ExtensionPipeline::negotiate(&options.extensions, &response.extensions)?;

    let info = SessionInfo {
        url: parsed,
        negotiated_extensions: response.extensions.iter().map(|e| e.to_string()).collect(),
    };

    let ConnectionHandles {
        stream: messages,
        writer,
        reader_task,
        writer_task,
    } = spawn(
        stream,
        leftover,
        pipeline,
        CoreConfig {
            max_frame_size: options.max_frame_size,
            max_message_size: options.max_message_size,
            validate_utf8: options.validate_utf8,
            auto_ping: options.auto_ping,
        },
    );
    let guard = TaskGuard {
        aborts: [reader_task.abort_handle(), writer_task.abort_handle()],
    };

    let handler_result = handler(messages, writer.clone(), info).await;

    // Close handshake: a no-op when the handler (or an error) closed first.
    writer.close(CloseFrame::normal()).await.ok();

    let outcome = match tokio::time::timeout(options.close_timeout, reader_task).await {
        Ok(Ok(Ok(frame))) => {
            // The writer task exits after it writes a close frame; wait so
            // the peer sees it before the transport drops.
            match writer_task.await {
                Ok(Err(e)) if !e.is_transport() => Err(e),
                _ => Ok(frame),
            }
        }
        Ok(Ok(Err(e))) => {
            if !e.is_transport() {
                let _ = writer_task.await;
            }
            Err(e)
        }
        Ok(Err(join_error)) => Err(Error::Io(format!("reader task failed: {}", join_error))),
        Err(_elapsed) => {
            // Peer never echoed the close; force-close the transport.
            log::warn!("close handshake timed out, dropping transport");
            Ok(None)
        }
    };
    drop(guard);

    handler_result.and(outcome)
}
