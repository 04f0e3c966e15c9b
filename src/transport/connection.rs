//! Persistent socket channel and event loop.
//!
//! This module handles the WebSocket channel to the local backend,
//! including request/response correlation and push-message routing.
//!
//! # Event Loop
//!
//! Each channel spawns a tokio task that handles:
//!
//! - Incoming frames from the backend (responses, push messages)
//! - Outgoing requests and control frames from the Rust API
//! - Failing every pending request when the channel ends
//! - Reporting the close reason through [`ChannelHooks`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RequestId};
use crate::protocol::{ControlFrame, Inbound, Request};

use super::correlator::{Correlator, DEFAULT_REQUEST_TIMEOUT};
use super::dialer::SocketDialer;

// ============================================================================
// Types
// ============================================================================

/// Callback for push messages (inbound frames without a known `requestId`).
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback invoked once when the channel ends.
pub type CloseHandler = Box<dyn FnOnce(ConnectionId, CloseReason) + Send>;

/// Why a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::shutdown`] was called.
    Local,
    /// The backend closed the channel or the stream ended.
    Remote,
    /// The channel failed.
    Error(String),
}

impl CloseReason {
    /// Returns `true` if the channel ended because of a failure.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Callbacks wired into a channel's event loop.
#[derive(Default)]
pub struct ChannelHooks {
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
}

impl ChannelHooks {
    /// Creates hooks that ignore every event.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the push-message callback.
    #[inline]
    #[must_use]
    pub fn on_message(mut self, handler: MessageHandler) -> Self {
        self.on_message = Some(handler);
        self
    }

    /// Sets the close callback.
    #[inline]
    #[must_use]
    pub fn on_close(mut self, handler: CloseHandler) -> Self {
        self.on_close = Some(handler);
        self
    }
}

impl fmt::Debug for ChannelHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHooks")
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a correlated request frame.
    Send { id: RequestId, text: String },
    /// Write an uncorrelated frame.
    Push(String),
    /// Close the channel.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Persistent socket channel to the local backend.
///
/// Cloning is cheap; all clones drive the same event loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel instance ID.
    id: ConnectionId,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Pending requests (shared with event loop).
    correlator: Arc<Correlator>,
    /// Cleared when the event loop ends.
    open: Arc<AtomicBool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Connection {
    /// Dials `url`, upgrades to WebSocket and sends the auth handshake.
    ///
    /// The caller is responsible for bounding this with a timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Unreachable`] if dialing fails
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    /// - [`Error::WebSocket`] if the handshake frame cannot be written
    pub async fn open(
        dialer: &dyn SocketDialer,
        url: &Url,
        identity: &str,
        hooks: ChannelHooks,
    ) -> Result<Self> {
        let stream = dialer.dial(url).await?;

        let (mut ws_stream, _) = tokio_tungstenite::client_async(url.as_str(), stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let auth = ControlFrame::auth(identity).to_text()?;
        ws_stream.send(Message::Text(auth.into())).await?;

        debug!(%url, "Socket handshake sent");
        Ok(Self::new(ws_stream, hooks))
    }

    /// Creates a connection from an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub fn new<S>(ws_stream: WebSocketStream<S>, hooks: ChannelHooks) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(Correlator::new());
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_event_loop(
            id,
            ws_stream,
            command_rx,
            Arc::clone(&correlator),
            Arc::clone(&open),
            hooks,
        ));

        Self {
            id,
            command_tx,
            correlator,
            open,
        }
    }

    /// Returns the channel instance ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` while the event loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// Sends a correlated request and waits with the default timeout (30s).
    ///
    /// # Errors
    ///
    /// See [`Connection::request_with_timeout`].
    pub async fn request(&self, command: &str, payload: Value) -> Result<Value> {
        self.request_with_timeout(command, payload, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Sends a correlated request and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel is or becomes closed
    /// - [`Error::RequestTimeout`] if no response arrives within `request_timeout`
    /// - [`Error::Remote`] if the response carries an error
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn request_with_timeout(
        &self,
        command: &str,
        payload: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let request = Request::new(command, payload);
        let text = request.to_text()?;
        let handle = self
            .correlator
            .register(request.id, &request.command, request_timeout)?;

        // On failure the handle is dropped and unregisters itself.
        self.command_tx
            .send(ConnectionCommand::Send {
                id: request.id,
                text,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        handle.wait().await
    }

    /// Queues an uncorrelated control frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has ended.
    pub fn push(&self, frame: &ControlFrame) -> Result<()> {
        let text = frame.to_text()?;
        self.command_tx
            .send(ConnectionCommand::Push(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the channel.
    ///
    /// Pending requests fail with [`Error::ConnectionClosed`]. Calling this on
    /// a closed channel does nothing.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        id: ConnectionId,
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlator: Arc<Correlator>,
        open: Arc<AtomicBool>,
        hooks: ChannelHooks,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let ChannelHooks {
            on_message,
            on_close,
        } = hooks;

        let reason = loop {
            tokio::select! {
                // Incoming frames from backend
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlator, on_message.as_ref());
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %id, "Socket closed by remote");
                            break CloseReason::Remote;
                        }

                        Some(Err(e)) => {
                            error!(connection = %id, error = %e, "Socket error");
                            break CloseReason::Error(e.to_string());
                        }

                        None => {
                            debug!(connection = %id, "Socket stream ended");
                            break CloseReason::Remote;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { id: request_id, text }) => {
                            if let Err(e) = Self::write_frame(&mut ws_write, text).await {
                                correlator.fail(request_id, Error::connection(e.to_string()));
                                break CloseReason::Error(e.to_string());
                            }
                            trace!(%request_id, "Request sent");
                        }

                        Some(ConnectionCommand::Push(text)) => {
                            if let Err(e) = Self::write_frame(&mut ws_write, text).await {
                                warn!(connection = %id, error = %e, "Failed to write control frame");
                                break CloseReason::Error(e.to_string());
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(connection = %id, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break CloseReason::Local;
                        }

                        None => {
                            debug!(connection = %id, "Command channel closed");
                            let _ = ws_write.close().await;
                            break CloseReason::Local;
                        }
                    }
                }
            }
        };

        // Reject new requests before draining, so none can slip in after.
        open.store(false, Ordering::Release);
        command_rx.close();
        correlator.fail_all();

        debug!(connection = %id, ?reason, "Event loop terminated");

        if let Some(on_close) = on_close {
            on_close(id, reason);
        }
    }

    /// Writes one text frame.
    async fn write_frame<S>(
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
        text: String,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ws_write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Routes an incoming text frame to the correlator or the push handler.
    fn handle_incoming_message(
        text: &str,
        correlator: &Correlator,
        on_message: Option<&MessageHandler>,
    ) {
        match Inbound::parse(text) {
            Ok(Inbound::Response(response)) => {
                correlator.resolve(response);
            }
            Ok(Inbound::Push(value)) => {
                if let Some(handler) = on_message {
                    handler(value);
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming frame");
            }
        }
    }
}

// ============================================================================
// Test Support
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    use tokio::io::DuplexStream;

    /// Backend side of an in-memory socket.
    pub type ServerStream = WebSocketStream<DuplexStream>;

    /// Opens a connection over an in-memory duplex pipe.
    pub async fn duplex_pair(hooks: ChannelHooks) -> (Connection, ServerStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let accept = tokio::spawn(tokio_tungstenite::accept_async(server));

        let (ws_stream, _) = tokio_tungstenite::client_async("ws://backend.test/", client)
            .await
            .expect("client handshake");
        let server_stream = accept.await.expect("join").expect("server handshake");

        (Connection::new(ws_stream, hooks), server_stream)
    }

    /// Reads the next text frame as JSON.
    pub async fn next_json(server: &mut ServerStream) -> Option<Value> {
        while let Some(message) = server.next().await {
            if let Ok(Message::Text(text)) = message {
                return serde_json::from_str(&text).ok();
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
