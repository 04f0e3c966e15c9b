//! Error types for lifeops-link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use lifeops_link::{ConnectionManager, Result};
//!
//! async fn example(manager: &ConnectionManager) -> Result<()> {
//!     let quote = manager.send("quote", serde_json::json!({ "symbol": "VTI" })).await?;
//!     println!("{quote}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Unreachable`], [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::NotConnected`], [`Error::NoTransport`] |
//! | Request | [`Error::Remote`], [`Error::Protocol`], [`Error::Timeout`], [`Error::RequestTimeout`] |
//! | Storage | [`Error::Store`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;
use crate::manager::Transport;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when manager configuration or a persisted setting is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// A transport could not be reached.
    ///
    /// Returned when a connect attempt fails or a request could not be
    /// delivered because the endpoint refused the connection.
    #[error("{transport} transport unreachable: {message}")]
    Unreachable {
        /// Transport that could not be reached.
        transport: Transport,
        /// Description of the failure.
        message: String,
    },

    /// Socket channel failure.
    ///
    /// Returned when the socket channel fails while writing a frame.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The active channel closed while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// `send` was called while no transport is active.
    #[error("Not connected")]
    NotConnected,

    /// Every transport in the cascade failed and no relay store is available.
    #[error("No transport available")]
    NoTransport,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The backend answered with an error.
    ///
    /// Either a correlated response carried an `error` field, or an
    /// HTTP/tunnel call returned a non-2xx status.
    #[error("Remote error: {message}")]
    Remote {
        /// HTTP status code, when the error came from an HTTP transport.
        status: Option<u16>,
        /// Message supplied by the remote side.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Correlated request timeout.
    ///
    /// No response carrying the request ID arrived before the deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// Relay or settings store failure.
    #[error("Store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unreachable-transport error.
    #[inline]
    pub fn unreachable(transport: Transport, message: impl Into<String>) -> Self {
        Self::Unreachable {
            transport,
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a remote error without an HTTP status.
    #[inline]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            status: None,
            message: message.into(),
        }
    }

    /// Creates a remote error from a non-2xx HTTP response.
    ///
    /// The message always starts with `HTTP {status}`.
    pub fn http_status(status: u16, reason: &str, body: &str) -> Self {
        let mut message = format!("HTTP {status}");
        if !reason.is_empty() {
            message.push(' ');
            message.push_str(reason);
        }
        let body = body.trim();
        if !body.is_empty() {
            message.push_str(": ");
            message.push_str(body);
        }
        Self::Remote {
            status: Some(status),
            message,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a store error.
    #[inline]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }

    /// Returns `true` if the remote side answered with an error.
    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::NoTransport
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the request never reached the remote side.
    ///
    /// Only connect failures qualify. A timed-out request may already have
    /// run on the backend, so it must not be rerouted.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Timeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
