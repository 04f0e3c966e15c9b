//! Request/response correlation table.
//!
//! Tracks in-flight socket requests by [`RequestId`]. The table is the single
//! source of truth for whether a request is still outstanding: whichever
//! path removes an entry (matching response, deadline, teardown, or the
//! caller dropping its handle) is the only one that completes it.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::Response;

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for a correlated request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
pub const MAX_PENDING_REQUESTS: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Completion side of a pending request.
type Completion = oneshot::Sender<Result<Value>>;

/// An outstanding correlated request.
struct PendingRequest {
    /// Resolves the waiting caller.
    completion: Completion,
    /// Command name, for logging.
    command: String,
}

// ============================================================================
// Correlator
// ============================================================================

/// Table of in-flight requests keyed by request ID.
pub struct Correlator {
    pending: Mutex<FxHashMap<RequestId, PendingRequest>>,
    max_pending: usize,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Creates an empty table with the default pending limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_REQUESTS)
    }

    /// Creates an empty table accepting at most `max_pending` entries.
    #[must_use]
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(FxHashMap::default()),
            max_pending,
        }
    }

    /// Registers a pending request.
    ///
    /// The returned handle must be awaited with [`PendingHandle::wait`].
    /// Dropping it unregisters the request.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the pending limit is reached or the ID is
    ///   already registered
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
        command: &str,
        request_timeout: Duration,
    ) -> Result<PendingHandle> {
        let (completion, receiver) = oneshot::channel();

        {
            let mut pending = self.pending.lock();

            if pending.len() >= self.max_pending {
                warn!(
                    pending = pending.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    pending.len(),
                    self.max_pending
                )));
            }

            if pending.contains_key(&id) {
                return Err(Error::protocol(format!("Duplicate request id: {id}")));
            }

            pending.insert(
                id,
                PendingRequest {
                    completion,
                    command: command.to_string(),
                },
            );
        }

        trace!(request_id = %id, command, "Request registered");

        Ok(PendingHandle {
            id,
            receiver: Some(receiver),
            timeout: request_timeout,
            correlator: Arc::clone(self),
        })
    }

    /// Completes the request matching `response`.
    ///
    /// Returns `false` if no request with that ID is outstanding, which is
    /// the case for responses arriving after their deadline.
    pub fn resolve(&self, response: Response) -> bool {
        let id = response.id;
        let Some(entry) = self.pending.lock().remove(&id) else {
            trace!(request_id = %id, "Dropping response for unknown request");
            return false;
        };

        trace!(request_id = %id, command = %entry.command, "Response correlated");
        let _ = entry.completion.send(response.into_result());
        true
    }

    /// Removes a request without completing it.
    ///
    /// Returns `true` if the request was still outstanding.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Completes a single request with an error.
    ///
    /// Returns `true` if the request was still outstanding.
    pub fn fail(&self, id: RequestId, error: Error) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        let _ = entry.completion.send(Err(error));
        true
    }

    /// Fails every outstanding request with [`Error::ConnectionClosed`].
    ///
    /// The table is drained in one step; returns the number of failed requests.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.completion.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
        }
        count
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if no request is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns `true` if `id` is outstanding.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.lock().contains_key(&id)
    }
}

// ============================================================================
// PendingHandle
// ============================================================================

/// Caller side of a registered request.
pub struct PendingHandle {
    id: RequestId,
    receiver: Option<oneshot::Receiver<Result<Value>>>,
    timeout: Duration,
    correlator: Arc<Correlator>,
}

impl PendingHandle {
    /// Returns the request ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the response or the deadline, whichever comes first.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if the deadline elapsed first
    /// - [`Error::Remote`] if the response carried an error
    /// - [`Error::ConnectionClosed`] if the channel closed first
    pub async fn wait(mut self) -> Result<Value> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(Error::ConnectionClosed);
        };

        match timeout(self.timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                if self.correlator.cancel(self.id) {
                    debug!(request_id = %self.id, "Request timed out");
                    return Err(Error::request_timeout(
                        self.id,
                        self.timeout.as_millis() as u64,
                    ));
                }

                // The entry was already taken by a response or by teardown;
                // that outcome is already in flight on the channel.
                receiver.await.unwrap_or(Err(Error::ConnectionClosed))
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.correlator.cancel(self.id) {
            trace!(request_id = %self.id, "Pending request abandoned by caller");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
