//! Store-and-forward message relay.
//!
//! The relay is the transport of last resort: the client enqueues messages
//! addressed to the backend and fetches messages addressed to itself. A
//! fetched message stays in the store until it is acknowledged, so delivery
//! is at-least-once; duplicates are filtered by the poller.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::persist::{read_json, write_json_atomic};

// ============================================================================
// Direction
// ============================================================================

/// Which side a relay message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to backend.
    ToBackend,
    /// Backend to client.
    ToClient,
}

// ============================================================================
// RelayMessage
// ============================================================================

/// One message held by the relay store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    /// Unique message ID, stable across redeliveries.
    pub id: MessageId,
    /// Identity the message belongs to.
    pub user_id: String,
    /// Addressee.
    pub direction: Direction,
    /// Message content.
    pub body: Value,
    /// Enqueue time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl RelayMessage {
    /// Creates a message with a fresh ID stamped with the current time.
    #[must_use]
    pub fn new(user_id: impl Into<String>, direction: Direction, body: Value) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();

        Self {
            id: MessageId::generate(),
            user_id: user_id.into(),
            direction,
            body,
            created_at_ms,
        }
    }

    #[inline]
    fn is_for(&self, user_id: &str, direction: Direction) -> bool {
        self.direction == direction && self.user_id == user_id
    }
}

// ============================================================================
// RelayStore
// ============================================================================

/// Backend of the relay transport.
#[async_trait]
pub trait RelayStore: Send + Sync + 'static {
    /// Appends a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the message cannot be stored.
    async fn enqueue(&self, message: RelayMessage) -> Result<()>;

    /// Returns pending messages for `user_id` in `direction`, oldest first,
    /// without removing them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the store cannot be read.
    async fn pending(&self, user_id: &str, direction: Direction) -> Result<Vec<RelayMessage>>;

    /// Removes the messages with the given IDs. Unknown IDs are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the store cannot be written.
    async fn ack(&self, ids: &[MessageId]) -> Result<()>;

    /// Removes and returns pending messages for `user_id` in `direction`,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Io`] if the store cannot be read
    /// or written.
    async fn drain(&self, user_id: &str, direction: Direction) -> Result<Vec<RelayMessage>> {
        let messages = self.pending(user_id, direction).await?;
        if !messages.is_empty() {
            let ids: Vec<MessageId> = messages.iter().map(|message| message.id).collect();
            self.ack(&ids).await?;
        }
        Ok(messages)
    }
}

/// Splits `messages` into those matching `user_id`/`direction` and the rest.
fn take_matching(
    messages: Vec<RelayMessage>,
    user_id: &str,
    direction: Direction,
) -> (Vec<RelayMessage>, Vec<RelayMessage>) {
    messages
        .into_iter()
        .partition(|message| message.is_for(user_id, direction))
}

/// Drops messages whose ID is in `ids`. Returns `true` if any was dropped.
fn remove_acked(messages: &mut Vec<RelayMessage>, ids: &[MessageId]) -> bool {
    let acked: FxHashSet<MessageId> = ids.iter().copied().collect();
    let before = messages.len();
    messages.retain(|message| !acked.contains(&message.id));
    messages.len() != before
}

// ============================================================================
// MemoryRelayStore
// ============================================================================

/// Process-local relay store.
#[derive(Debug, Default)]
pub struct MemoryRelayStore {
    messages: Mutex<Vec<RelayMessage>>,
}

impl MemoryRelayStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `body` for `user_id` as if the backend had sent it.
    pub fn deliver_to_client(&self, user_id: &str, body: Value) -> MessageId {
        let message = RelayMessage::new(user_id, Direction::ToClient, body);
        let id = message.id;
        self.messages.lock().push(message);
        id
    }

    /// Returns pending messages without removing them.
    #[must_use]
    pub fn peek(&self, user_id: &str, direction: Direction) -> Vec<RelayMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.is_for(user_id, direction))
            .cloned()
            .collect()
    }

    /// Returns the total number of stored messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl RelayStore for MemoryRelayStore {
    async fn enqueue(&self, message: RelayMessage) -> Result<()> {
        trace!(id = %message.id, direction = ?message.direction, "Relay message enqueued");
        self.messages.lock().push(message);
        Ok(())
    }

    async fn pending(&self, user_id: &str, direction: Direction) -> Result<Vec<RelayMessage>> {
        Ok(self.peek(user_id, direction))
    }

    async fn ack(&self, ids: &[MessageId]) -> Result<()> {
        remove_acked(&mut self.messages.lock(), ids);
        Ok(())
    }

    async fn drain(&self, user_id: &str, direction: Direction) -> Result<Vec<RelayMessage>> {
        let mut messages = self.messages.lock();
        let (taken, rest) = take_matching(std::mem::take(&mut *messages), user_id, direction);
        *messages = rest;
        Ok(taken)
    }
}

// ============================================================================
// FileRelayStore
// ============================================================================

/// Relay store kept in a JSON array file.
///
/// Blocking file I/O runs on the blocking pool. A single async lock
/// serializes read-modify-write cycles within the process; it is held by the
/// blocking task itself, so a dropped caller cannot overlap two writes.
pub struct FileRelayStore {
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for FileRelayStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRelayStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileRelayStore {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `work` on the blocking pool while holding the file lock.
    async fn locked<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(&path)
        })
        .await
        .map_err(|e| Error::store(format!("Relay file task failed: {e}")))?
    }
}

#[async_trait]
impl RelayStore for FileRelayStore {
    async fn enqueue(&self, message: RelayMessage) -> Result<()> {
        self.locked(move |path| {
            let mut messages: Vec<RelayMessage> = read_json(path)?;
            messages.push(message);
            write_json_atomic(path, &messages)
        })
        .await
    }

    async fn pending(&self, user_id: &str, direction: Direction) -> Result<Vec<RelayMessage>> {
        let user_id = user_id.to_string();
        self.locked(move |path| {
            let messages: Vec<RelayMessage> = read_json(path)?;
            Ok(take_matching(messages, &user_id, direction).0)
        })
        .await
    }

    async fn ack(&self, ids: &[MessageId]) -> Result<()> {
        let ids = ids.to_vec();
        self.locked(move |path| {
            let mut messages: Vec<RelayMessage> = read_json(path)?;
            if remove_acked(&mut messages, &ids) {
                write_json_atomic(path, &messages)?;
            }
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================
