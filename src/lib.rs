//! lifeops-link - Multi-transport link between a client and a local-first backend.
//!
//! This library keeps a reliable request/response channel open between a
//! remote or mobile client and a backend process running on the user's own
//! machine, whatever network path happens to be available.
//!
//! # Architecture
//!
//! The [`ConnectionManager`] probes four transports in priority order and
//! activates the first one that answers:
//!
//! - **Socket**: persistent WebSocket with correlated requests and push messages
//! - **Local HTTP**: `POST /api/{command}` on the same machine or LAN
//! - **Tunnel**: the same HTTP surface exposed over the wide-area network
//! - **Relay**: store-and-forward queue, polled adaptively
//!
//! Key design principles:
//!
//! - One caller-owned manager per link (no global instance)
//! - Every pending socket request is resolved exactly once
//! - Lost sockets are reconnected after a fixed delay, single-flight
//! - State changes are broadcast to listeners in transition order
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lifeops_link::{ConnectionManager, MemoryRelayStore, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .relay_store(Arc::new(MemoryRelayStore::new()))
//!         .build()?;
//!
//!     let _status = manager.on_status_change(|state| println!("link: {state}"));
//!     manager.connect("user1").await?;
//!
//!     let portfolio = manager.send("portfolio", serde_json::json!({ "range": "1d" })).await?;
//!     println!("{portfolio}");
//!
//!     manager.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`manager`] | [`ConnectionManager`], configuration and state |
//! | [`transport`] | Socket, HTTP and probes |
//! | [`relay`] | Relay store and poller |
//! | [`settings`] | Persisted client settings |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Connection manager, configuration and state.
///
/// Use [`ConnectionManager::builder()`] to create a configured instance.
pub mod manager;

/// Wire message types.
pub mod protocol;

/// Offline message relay.
pub mod relay;

/// Persisted client settings.
pub mod settings;

/// Transport layer.
///
/// Socket channel, HTTP endpoint, heartbeat and probes.
pub mod transport;

mod persist;

// ============================================================================
// Re-exports
// ============================================================================

// Manager types
pub use manager::{
    ConnectionManager, ConnectionManagerBuilder, ConnectionState, ConnectionStatus,
    ManagerConfig, SendPlan, Subscription, Transport,
};

// Relay types
pub use relay::{
    Direction, FileRelayStore, MemoryRelayStore, PollCadence, RelayMessage, RelayStore,
};

// Settings types
pub use settings::{FileSettings, MemorySettings, SettingsStore};

// Transport seams
pub use transport::{ProbeOutcome, SocketDialer, TcpDialer};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, ListenerId, MessageId, RequestId};
