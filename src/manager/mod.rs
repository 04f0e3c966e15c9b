//! Connection management.
//!
//! This module provides the entry point: a [`ConnectionManager`] that picks
//! the best available transport and keeps it alive.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ConnectionManager`] | Cascade, send routing, reconnect |
//! | [`ConnectionManagerBuilder`] | Fluent construction |
//! | [`ManagerConfig`] | Endpoints and timings |
//! | [`ConnectionState`] | `(status, transport)` snapshot |
//! | [`SendPlan`] | Per-transport routing strategy |
//! | [`Subscription`] | Listener unsubscribe handle |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for the manager.
pub mod builder;

/// Endpoints and timings.
pub mod config;

/// Manager implementation.
pub mod core;

/// Observer registries.
pub mod listeners;

/// Send routing strategies.
pub mod routing;

/// Connection state types.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionManagerBuilder;
pub use config::ManagerConfig;
pub use core::ConnectionManager;
pub use listeners::{ListenerRegistry, Subscription};
pub use routing::{Route, SendPlan};
pub use state::{ConnectionState, ConnectionStatus, Transport};
