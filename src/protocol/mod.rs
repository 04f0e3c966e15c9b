//! Wire message types.
//!
//! This module defines the logical messages exchanged between the client
//! and the local backend. The socket transport uses all of them; the HTTP
//! and tunnel transports only carry the command payload and its result.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Transport | Shape |
//! |---------|-----------|-----------|-------|
//! | Handshake | Client → Backend | socket | `{ type: "auth", userId }` |
//! | Heartbeat | Client → Backend | socket | `{ type: "ping" }` |
//! | `Request` | Client → Backend | socket | `{ requestId, command, ...payload }` |
//! | `Response` | Backend → Client | socket | `{ requestId, result?, error? }` |
//! | Push | Backend → Client | socket, relay | any JSON without `requestId` |
//! | Command call | Client → Backend | http, tunnel | `POST /api/{command}` |
//! | Health check | Client → Backend | http, tunnel | `GET /health` |

// ============================================================================
// Submodules
// ============================================================================

/// Socket frame types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{ControlFrame, Inbound, Request, Response};
