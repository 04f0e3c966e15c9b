//! Adaptive relay polling.
//!
//! While the relay is the active transport, the poller drains messages
//! addressed to the client and hands them to the manager. It polls quickly
//! while there is recent traffic in either direction and slowly otherwise.
//!
//! | Activity | Interval |
//! |----------|----------|
//! | within `activity_window` | `active_interval` (3s) |
//! | older or none | `idle_interval` (60s) |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::identifiers::MessageId;

use super::store::{Direction, RelayStore};

// ============================================================================
// Constants
// ============================================================================

/// Poll interval while traffic is recent.
pub const DEFAULT_ACTIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Poll interval while idle.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(60);

/// How long traffic counts as recent.
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Number of message IDs remembered for deduplication.
pub const DEDUP_WINDOW: usize = 1024;

/// Callback receiving each relay message body.
pub type Dispatch = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// PollCadence
// ============================================================================

/// Polling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCadence {
    /// Interval while traffic is recent.
    pub active_interval: Duration,
    /// Interval while idle.
    pub idle_interval: Duration,
    /// How long traffic counts as recent.
    pub activity_window: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self::new()
    }
}

impl PollCadence {
    /// Creates the default cadence (3s active, 60s idle, 60s window).
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active_interval: DEFAULT_ACTIVE_INTERVAL,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            activity_window: DEFAULT_ACTIVITY_WINDOW,
        }
    }

    /// Sets the active interval.
    #[inline]
    #[must_use]
    pub const fn with_active_interval(mut self, interval: Duration) -> Self {
        self.active_interval = interval;
        self
    }

    /// Sets the idle interval.
    #[inline]
    #[must_use]
    pub const fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Sets the activity window.
    #[inline]
    #[must_use]
    pub const fn with_activity_window(mut self, window: Duration) -> Self {
        self.activity_window = window;
        self
    }

    /// Returns the interval to use given the tracker's freshness.
    #[inline]
    #[must_use]
    pub fn interval_for(&self, activity: &ActivityTracker) -> Duration {
        if activity.is_fresh(self.activity_window) {
            self.active_interval
        } else {
            self.idle_interval
        }
    }

    /// Validates the cadence.
    ///
    /// # Errors
    ///
    /// Returns an error message if an interval is zero or the active interval
    /// exceeds the idle interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.active_interval.is_zero() || self.idle_interval.is_zero() {
            return Err("Relay poll intervals must be non-zero".to_string());
        }
        if self.active_interval > self.idle_interval {
            return Err(format!(
                "Active poll interval ({:?}) must not exceed idle interval ({:?})",
                self.active_interval, self.idle_interval
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ActivityTracker
// ============================================================================

/// Shared record of the last relay traffic.
///
/// Cloning is cheap; clones observe the same record.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    last: Arc<Mutex<Option<Instant>>>,
    changed: Arc<Notify>,
}

impl fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("last", &*self.last.lock())
            .finish()
    }
}

impl ActivityTracker {
    /// Creates a tracker with no recorded activity.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records traffic now and wakes a waiting poller.
    pub fn mark(&self) {
        *self.last.lock() = Some(Instant::now());
        self.changed.notify_one();
    }

    /// Forgets recorded traffic, so the next poller starts idle.
    pub fn reset(&self) {
        *self.last.lock() = None;
    }

    /// Returns when traffic was last recorded.
    #[inline]
    #[must_use]
    pub fn last_activity(&self) -> Option<Instant> {
        *self.last.lock()
    }

    /// Returns `true` if traffic was recorded within `window`.
    #[inline]
    #[must_use]
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.last_activity()
            .is_some_and(|last| last.elapsed() < window)
    }

    /// Waits for the next [`ActivityTracker::mark`].
    pub async fn notified(&self) {
        self.changed.notified().await;
    }
}

// ============================================================================
// RecentIds
// ============================================================================

/// Bounded FIFO set of recently delivered message IDs.
struct RecentIds {
    order: VecDeque<MessageId>,
    seen: FxHashSet<MessageId>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: FxHashSet::default(),
            capacity,
        }
    }

    /// Returns `true` if `id` was not seen yet.
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        true
    }
}

// ============================================================================
// RelayPoller
// ============================================================================

/// Background task draining client-bound relay messages.
///
/// The first poll happens immediately. The task is aborted by
/// [`RelayPoller::stop`] or on drop.
pub struct RelayPoller {
    handle: JoinHandle<()>,
    cadence: PollCadence,
    activity: ActivityTracker,
}

impl fmt::Debug for RelayPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayPoller")
            .field("cadence", &self.cadence)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RelayPoller {
    /// Starts polling `store` for `user_id`.
    ///
    /// Every new message body is passed to `dispatch` in store order.
    #[must_use]
    pub fn start(
        store: Arc<dyn RelayStore>,
        user_id: impl Into<String>,
        cadence: PollCadence,
        activity: ActivityTracker,
        dispatch: Dispatch,
    ) -> Self {
        let user_id = user_id.into();
        let handle = tokio::spawn(Self::run(
            store,
            user_id,
            cadence,
            activity.clone(),
            dispatch,
        ));

        Self {
            handle,
            cadence,
            activity,
        }
    }

    /// Returns the interval the poller currently waits between polls.
    #[inline]
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        self.cadence.interval_for(&self.activity)
    }

    /// Stops polling.
    #[inline]
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Returns `true` while the poll task is alive.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn run(
        store: Arc<dyn RelayStore>,
        user_id: String,
        cadence: PollCadence,
        activity: ActivityTracker,
        dispatch: Dispatch,
    ) {
        let mut recent = RecentIds::new(DEDUP_WINDOW);
        debug!(user_id, "Relay poller started");

        loop {
            let polled_at = Instant::now();

            // Messages leave the store only once dispatched, so stopping the
            // poller at any await point loses nothing.
            match store.pending(&user_id, Direction::ToClient).await {
                Ok(batch) => {
                    let mut settled = Vec::with_capacity(batch.len());
                    let mut delivered = 0usize;
                    for message in batch {
                        settled.push(message.id);
                        if !recent.insert(message.id) {
                            trace!(id = %message.id, "Dropped redelivered relay message");
                            continue;
                        }
                        dispatch(message.body);
                        delivered += 1;
                    }
                    if delivered > 0 {
                        trace!(delivered, "Relay messages delivered");
                        activity.mark();
                    }
                    if !settled.is_empty()
                        && let Err(e) = store.ack(&settled).await
                    {
                        warn!(error = %e, "Relay ack failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Relay poll failed");
                }
            }

            // Traffic may shorten the wait; the deadline is recomputed on each mark.
            loop {
                let deadline = polled_at + cadence.interval_for(&activity);
                tokio::select! {
                    () = sleep_until(deadline) => break,
                    () = activity.notified() => {}
                }
            }
        }
    }
}

impl Drop for RelayPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================
