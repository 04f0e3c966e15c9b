//! Offline message relay.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `store` | Relay store trait and implementations |
//! | `poller` | Adaptive polling of client-bound messages |

// ============================================================================
// Submodules
// ============================================================================

/// Adaptive relay polling.
pub mod poller;

/// Relay store trait and implementations.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use poller::{ActivityTracker, Dispatch, PollCadence, RelayPoller};
pub use store::{Direction, FileRelayStore, MemoryRelayStore, RelayMessage, RelayStore};
