//! Keep-alive emission for the persistent socket.
//!
//! Heartbeats only keep intermediaries from treating the socket as idle.
//! They are not acknowledged; liveness comes from the channel's own close
//! notification.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use crate::protocol::ControlFrame;

use super::connection::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default keep-alive period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Heartbeat
// ============================================================================

/// Periodic `{"type":"ping"}` sender bound to one connection.
///
/// The first ping goes out one full period after start. The task ends on its
/// own once the connection closes, and is aborted by [`Heartbeat::stop`] or
/// on drop.
#[derive(Debug)]
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts sending pings on `connection` every `period`.
    #[must_use]
    pub fn start(connection: Connection, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !connection.is_open() {
                    debug!(connection = %connection.id(), "Heartbeat stopped: channel closed");
                    break;
                }

                if connection.push(&ControlFrame::Ping).is_err() {
                    break;
                }
                trace!(connection = %connection.id(), "Heartbeat sent");
            }
        });

        Self { handle }
    }

    /// Stops sending pings.
    #[inline]
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Returns `true` while the heartbeat task is alive.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
