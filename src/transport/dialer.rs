//! Byte-stream dialers for the socket transport.
//!
//! The socket transport upgrades whatever stream a [`SocketDialer`] returns
//! to a WebSocket. [`TcpDialer`] is the production dialer; tests substitute
//! in-memory streams.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::manager::Transport;

// ============================================================================
// Types
// ============================================================================

/// A bidirectional byte stream usable as a WebSocket transport.
pub trait DialedStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DialedStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased dialed stream.
pub type BoxedStream = Box<dyn DialedStream>;

// ============================================================================
// SocketDialer
// ============================================================================

/// Opens the raw stream underneath the persistent socket.
#[async_trait]
pub trait SocketDialer: Send + Sync + 'static {
    /// Opens a stream to the endpoint named by `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreachable`] if the endpoint cannot be reached.
    async fn dial(&self, url: &Url) -> Result<BoxedStream>;
}

// ============================================================================
// TcpDialer
// ============================================================================

/// Dials plain TCP using the host and port of a `ws://` URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl SocketDialer for TcpDialer {
    async fn dial(&self, url: &Url) -> Result<BoxedStream> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("Socket URL has no host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("Socket URL has no port: {url}")))?;

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::unreachable(Transport::Socket, format!("{host}:{port}: {e}")))?;
        stream.set_nodelay(true)?;

        trace!(host, port, "TCP stream dialed");
        Ok(Box::new(stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
