//! Transport layer.
//!
//! This module implements the channels the connection manager can route
//! through, and the probes that decide which one to use.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     socket (WebSocket)      ┌─────────────────┐
//! │                  │◄───────────────────────────►│                 │
//! │ ConnectionManager│     local HTTP              │  Local backend  │
//! │                  │────────────────────────────►│                 │
//! │                  │     tunnel (HTTP over WAN)  │                 │
//! │                  │────────────────────────────►│                 │
//! └──────────────────┘                             └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Socket channel and event loop |
//! | `correlator` | In-flight request table |
//! | `dialer` | Raw stream dialing for the socket |
//! | `heartbeat` | Socket keep-alive |
//! | `http` | HTTP surface for local HTTP and tunnel |
//! | `probe` | Bounded-time reachability checks |

// ============================================================================
// Submodules
// ============================================================================

/// Socket channel and event loop.
pub mod connection;

/// Request/response correlation table.
pub mod correlator;

/// Stream dialers for the socket transport.
pub mod dialer;

/// Socket keep-alive.
pub mod heartbeat;

/// HTTP request/response transport.
pub mod http;

/// Reachability probes.
pub mod probe;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ChannelHooks, CloseHandler, CloseReason, Connection, MessageHandler};
pub use correlator::{Correlator, PendingHandle};
pub use dialer::{BoxedStream, DialedStream, SocketDialer, TcpDialer};
pub use heartbeat::Heartbeat;
pub use http::HttpEndpoint;
pub use probe::{ProbeOutcome, probe_http, probe_socket};
