//! Connection manager.
//!
//! The [`ConnectionManager`] owns the connection state machine. It runs the
//! transport cascade, routes sends through the active transport, and
//! reconnects after the socket channel is lost.
//!
//! # Cascade
//!
//! `connect` probes the transports in priority order and activates the first
//! one that answers:
//!
//! 1. Persistent socket (handshake within 3s)
//! 2. Local HTTP (`GET /health` within 3s)
//! 3. Tunnel, if configured (`GET /health` within 5s)
//! 4. Relay, if a relay store is configured (no precondition)
//!
//! # State Machine
//!
//! ```text
//! disconnected ──connect──► connecting ──► connected(t)
//!      ▲                        │               │
//!      │                        ▼               │ socket lost
//!      └──────────────────── error ◄────────────┘ (error close)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lifeops_link::{ConnectionManager, MemoryRelayStore};
//! use std::sync::Arc;
//!
//! let manager = ConnectionManager::builder()
//!     .relay_store(Arc::new(MemoryRelayStore::new()))
//!     .build()?;
//!
//! let _status = manager.on_status_change(|state| println!("{state}"));
//! manager.connect("user1").await?;
//! let quote = manager.send("quote", serde_json::json!({ "symbol": "VTI" })).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RequestId};
use crate::relay::{ActivityTracker, Direction, RelayMessage, RelayPoller, RelayStore};
use crate::settings::{SettingsStore, TUNNEL_URL_KEY};
use crate::transport::{
    ChannelHooks, CloseReason, Connection, Heartbeat, HttpEndpoint, ProbeOutcome, SocketDialer,
    probe_http, probe_socket,
};

use super::builder::ConnectionManagerBuilder;
use super::config::ManagerConfig;
use super::listeners::{ListenerRegistry, Subscription};
use super::routing::{self, Attempt, Fallthrough, Route, SendPlan, Step};
use super::state::{ConnectionState, ConnectionStatus, Transport};

// ============================================================================
// Types
// ============================================================================

/// Channels owned by the active transport, plus the reconnect timer.
#[derive(Default)]
struct Channels {
    socket: Option<Connection>,
    heartbeat: Option<Heartbeat>,
    tunnel: Option<HttpEndpoint>,
    poller: Option<RelayPoller>,
    reconnect: Option<JoinHandle<()>>,
}

/// Collaborators handed over by the builder.
pub(crate) struct ManagerParts {
    pub config: ManagerConfig,
    pub socket_url: Url,
    pub dialer: Arc<dyn SocketDialer>,
    pub http: HttpEndpoint,
    pub http_client: reqwest::Client,
    pub relay: Option<Arc<dyn RelayStore>>,
    pub settings: Arc<dyn SettingsStore>,
}

/// Internal shared state for the manager.
pub(crate) struct ManagerInner {
    config: ManagerConfig,
    socket_url: Url,
    dialer: Arc<dyn SocketDialer>,
    http: HttpEndpoint,
    http_client: reqwest::Client,
    relay: Option<Arc<dyn RelayStore>>,
    settings: Arc<dyn SettingsStore>,

    /// Current `(status, transport)`; written only by `transition`.
    state: Mutex<ConnectionState>,
    /// Serializes state changes with their fan-out.
    emit_lock: ReentrantMutex<()>,
    /// Bumped by every `connect` and `disconnect`; stale cascades back off.
    epoch: AtomicU64,
    /// Epoch of the cascade currently running.
    cascade: Mutex<Option<u64>>,
    identity: Mutex<Option<String>>,
    channels: Mutex<Channels>,

    status_listeners: Arc<ListenerRegistry<ConnectionState>>,
    message_listeners: Arc<ListenerRegistry<Value>>,
    activity: ActivityTracker,
}

/// How a cascade ended.
enum CascadeOutcome {
    Connected(Transport),
    Exhausted,
    Abandoned,
}

// ============================================================================
// CascadeGuard
// ============================================================================

/// Marks a cascade as running for its epoch.
struct CascadeGuard<'a> {
    slot: &'a Mutex<Option<u64>>,
    epoch: u64,
}

impl<'a> CascadeGuard<'a> {
    /// Starts a new epoch, unless a cascade for the current one is running.
    fn acquire(slot: &'a Mutex<Option<u64>>, epoch: &AtomicU64) -> Option<Self> {
        let mut running = slot.lock();
        if running.is_some_and(|running| running == epoch.load(Ordering::Acquire)) {
            return None;
        }
        let next = epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *running = Some(next);
        Some(Self { slot, epoch: next })
    }
}

impl Drop for CascadeGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.slot.lock();
        if *running == Some(self.epoch) {
            *running = None;
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Multi-transport connection to the local backend.
///
/// Cloning is cheap; all clones share the same state. Background tasks
/// only hold weak references, so dropping the last handle stops them.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("socket_url", &self.inner.socket_url.as_str())
            .field("http_url", &self.inner.http.base_url())
            .field("relay", &self.inner.relay.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManager - Construction
// ============================================================================

impl ConnectionManager {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    pub(crate) fn from_parts(parts: ManagerParts) -> Self {
        let ManagerParts {
            config,
            socket_url,
            dialer,
            http,
            http_client,
            relay,
            settings,
        } = parts;

        Self {
            inner: Arc::new(ManagerInner {
                config,
                socket_url,
                dialer,
                http,
                http_client,
                relay,
                settings,
                state: Mutex::new(ConnectionState::disconnected()),
                emit_lock: ReentrantMutex::new(()),
                epoch: AtomicU64::new(0),
                cascade: Mutex::new(None),
                identity: Mutex::new(None),
                channels: Mutex::new(Channels::default()),
                status_listeners: Arc::new(ListenerRegistry::new()),
                message_listeners: Arc::new(ListenerRegistry::new()),
                activity: ActivityTracker::new(),
            }),
        }
    }
}

// ============================================================================
// ConnectionManager - Accessors
// ============================================================================

impl ConnectionManager {
    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Returns the current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    /// Returns the active transport.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.state().transport()
    }

    /// Returns `true` if a transport is active.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the identity of the last `connect`.
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        self.inner.identity.lock().clone()
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Returns the number of requests awaiting a socket response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner
            .channels
            .lock()
            .socket
            .as_ref()
            .map_or(0, Connection::pending_count)
    }

    /// Returns the relay poll interval, if the relay is active.
    #[must_use]
    pub fn relay_poll_interval(&self) -> Option<Duration> {
        self.inner
            .channels
            .lock()
            .poller
            .as_ref()
            .map(RelayPoller::current_interval)
    }

    /// Returns `true` while a reconnect attempt is pending.
    #[must_use]
    pub fn reconnect_scheduled(&self) -> bool {
        self.inner
            .channels
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns the persisted tunnel URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub fn tunnel_url(&self) -> Result<Option<String>> {
        self.inner.settings.get(TUNNEL_URL_KEY)
    }

    /// Persists the tunnel URL; `None` removes it.
    ///
    /// Takes effect on the next `connect`.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] or [`Error::Config`] if `url` is not an http(s) URL
    /// - A store error if the settings cannot be written
    pub fn set_tunnel_url(&self, url: Option<&str>) -> Result<()> {
        let url = url.map(str::trim);
        if let Some(url) = url {
            HttpEndpoint::new(Transport::Tunnel, url, self.inner.http_client.clone())?;
        }
        self.inner.settings.set(TUNNEL_URL_KEY, url)?;
        debug!(configured = url.is_some(), "Tunnel URL updated");
        Ok(())
    }
}

// ============================================================================
// ConnectionManager - Listeners
// ============================================================================

impl ConnectionManager {
    /// Registers a callback for every state change.
    ///
    /// Callbacks run synchronously in transition order and may call back
    /// into the manager.
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.status_listeners.add(listener)
    }

    /// Registers a callback for push and relay messages.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.message_listeners.add(listener)
    }
}

// ============================================================================
// ConnectionManager - Connect / Disconnect
// ============================================================================

impl ConnectionManager {
    /// Runs the transport cascade for `identity`.
    ///
    /// If a cascade is already running, returns the current state without
    /// starting another. If already connected, the active channels are torn
    /// down first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransport`] if nothing answered and no relay store
    /// is configured. A reconnect is scheduled in that case.
    pub async fn connect(&self, identity: impl Into<String>) -> Result<ConnectionState> {
        let identity = identity.into();

        let Some(guard) = CascadeGuard::acquire(&self.inner.cascade, &self.inner.epoch) else {
            debug!("Connect already in progress");
            return Ok(self.state());
        };
        let epoch = guard.epoch;

        *self.inner.identity.lock() = Some(identity.clone());
        self.release_channels();
        self.transition(ConnectionState::connecting());
        info!(user_id = %identity, "Connecting");

        match self.run_cascade(&identity, epoch).await {
            CascadeOutcome::Connected(transport) => {
                info!(%transport, "Connected");
                Ok(self.state())
            }
            CascadeOutcome::Abandoned => {
                debug!("Connect superseded");
                Ok(self.state())
            }
            CascadeOutcome::Exhausted => {
                warn!("No transport available");
                {
                    let _emit = self.inner.emit_lock.lock();
                    if self.is_stale(epoch) {
                        return Ok(self.state());
                    }
                    self.transition(ConnectionState::error());
                    self.transition(ConnectionState::disconnected());
                }
                self.schedule_reconnect();
                Err(Error::NoTransport)
            }
        }
    }

    /// Tears down every channel and moves to `disconnected`.
    ///
    /// Pending socket requests fail with [`Error::ConnectionClosed`]. A
    /// pending reconnect is cancelled. Calling this again does nothing.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);

        let _emit = self.inner.emit_lock.lock();
        let channels = std::mem::take(&mut *self.inner.channels.lock());
        if let Some(reconnect) = &channels.reconnect {
            reconnect.abort();
        }
        if let Some(socket) = &channels.socket {
            socket.shutdown();
        }
        drop(channels);

        if self.transition(ConnectionState::disconnected()) {
            info!("Disconnected");
        }
    }

    /// Probes every transport without changing state.
    ///
    /// Any socket opened by the probe is closed straight away.
    pub async fn diagnose(&self, identity: &str) -> Vec<ProbeOutcome> {
        let config = &self.inner.config;
        let mut outcomes = Vec::with_capacity(Transport::CASCADE.len());

        let (socket, connection) = probe_socket(
            self.inner.dialer.as_ref(),
            &self.inner.socket_url,
            identity,
            config.socket_probe_timeout,
            ChannelHooks::new(),
        )
        .await;
        if let Some(connection) = connection {
            connection.shutdown();
        }
        outcomes.push(socket);

        outcomes.push(probe_http(&self.inner.http, config.http_probe_timeout).await);

        match self.load_tunnel() {
            Some(tunnel) => outcomes.push(probe_http(&tunnel, config.tunnel_probe_timeout).await),
            None => outcomes.push(ProbeOutcome {
                transport: Transport::Tunnel,
                reachable: false,
                elapsed: Duration::ZERO,
                detail: Some("no tunnel configured".to_string()),
            }),
        }

        outcomes.push(ProbeOutcome {
            transport: Transport::Relay,
            reachable: self.inner.relay.is_some(),
            elapsed: Duration::ZERO,
            detail: self
                .inner
                .relay
                .is_none()
                .then(|| "no relay store configured".to_string()),
        });

        outcomes
    }

    async fn run_cascade(&self, identity: &str, epoch: u64) -> CascadeOutcome {
        let config = &self.inner.config;

        // 1. Persistent socket
        let (_, connection) = probe_socket(
            self.inner.dialer.as_ref(),
            &self.inner.socket_url,
            identity,
            config.socket_probe_timeout,
            self.socket_hooks(),
        )
        .await;
        if let Some(connection) = connection {
            return if self.install_socket(connection, epoch) {
                CascadeOutcome::Connected(Transport::Socket)
            } else {
                CascadeOutcome::Abandoned
            };
        }
        if self.is_stale(epoch) {
            return CascadeOutcome::Abandoned;
        }

        // 2. Local HTTP
        let outcome = probe_http(&self.inner.http, config.http_probe_timeout).await;
        if outcome.reachable {
            return self.activate(epoch, Transport::Http, |_| {});
        }
        if self.is_stale(epoch) {
            return CascadeOutcome::Abandoned;
        }

        // 3. Tunnel
        if let Some(tunnel) = self.load_tunnel() {
            let outcome = probe_http(&tunnel, config.tunnel_probe_timeout).await;
            if outcome.reachable {
                return self.activate(epoch, Transport::Tunnel, |channels| {
                    channels.tunnel = Some(tunnel);
                });
            }
            if self.is_stale(epoch) {
                return CascadeOutcome::Abandoned;
            }
        }

        // 4. Relay
        if let Some(store) = &self.inner.relay {
            // Each relay session starts idle.
            self.inner.activity.reset();
            let registry = Arc::clone(&self.inner.message_listeners);
            let poller = RelayPoller::start(
                Arc::clone(store),
                identity,
                config.poll,
                self.inner.activity.clone(),
                Arc::new(move |message: Value| registry.emit(&message)),
            );
            return self.activate(epoch, Transport::Relay, |channels| {
                channels.poller = Some(poller);
            });
        }

        CascadeOutcome::Exhausted
    }

    /// Installs channels for `transport` and moves to `connected`, unless a
    /// newer `connect` or `disconnect` happened meanwhile.
    fn activate<F>(&self, epoch: u64, transport: Transport, install: F) -> CascadeOutcome
    where
        F: FnOnce(&mut Channels),
    {
        let _emit = self.inner.emit_lock.lock();
        if self.is_stale(epoch) {
            return CascadeOutcome::Abandoned;
        }
        install(&mut self.inner.channels.lock());
        self.transition(ConnectionState::connected(transport));
        CascadeOutcome::Connected(transport)
    }

    /// Activates the socket. Returns `false` if the cascade was superseded.
    fn install_socket(&self, connection: Connection, epoch: u64) -> bool {
        let heartbeat = Heartbeat::start(connection.clone(), self.inner.config.heartbeat_interval);
        let installed = connection.clone();

        let _emit = self.inner.emit_lock.lock();
        let outcome = self.activate(epoch, Transport::Socket, move |channels| {
            channels.socket = Some(installed);
            channels.heartbeat = Some(heartbeat);
        });
        if matches!(outcome, CascadeOutcome::Abandoned) {
            connection.shutdown();
            return false;
        }

        // Closed between handshake and install: its close hook was ignored.
        if !connection.is_open() {
            self.handle_socket_closed(connection.id(), CloseReason::Remote);
        }
        true
    }

    fn socket_hooks(&self) -> ChannelHooks {
        let registry = Arc::clone(&self.inner.message_listeners);
        let weak = Arc::downgrade(&self.inner);

        ChannelHooks::new()
            .on_message(Arc::new(move |message: Value| registry.emit(&message)))
            .on_close(Box::new(move |id: ConnectionId, reason: CloseReason| {
                if let Some(inner) = weak.upgrade() {
                    ConnectionManager { inner }.handle_socket_closed(id, reason);
                }
            }))
    }

    fn load_tunnel(&self) -> Option<HttpEndpoint> {
        let url = match self.inner.settings.get(TUNNEL_URL_KEY) {
            Ok(Some(url)) => url,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read tunnel URL");
                return None;
            }
        };

        match HttpEndpoint::new(Transport::Tunnel, &url, self.inner.http_client.clone()) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(%url, error = %e, "Ignoring invalid tunnel URL");
                None
            }
        }
    }

    /// Drops active channels without notifying listeners.
    fn release_channels(&self) {
        let (socket, heartbeat, tunnel, poller, reconnect) = {
            let mut channels = self.inner.channels.lock();
            (
                channels.socket.take(),
                channels.heartbeat.take(),
                channels.tunnel.take(),
                channels.poller.take(),
                channels.reconnect.take(),
            )
        };
        if let Some(reconnect) = reconnect {
            reconnect.abort();
        }
        if let Some(socket) = socket {
            socket.shutdown();
        }
        drop((heartbeat, tunnel, poller));
    }

    #[inline]
    fn is_stale(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::Acquire) != epoch
    }
}

// ============================================================================
// ConnectionManager - Channel Loss & Reconnect
// ============================================================================

impl ConnectionManager {
    /// Reacts to the end of socket channel `id`.
    ///
    /// Ignored unless `id` is the active socket.
    fn handle_socket_closed(&self, id: ConnectionId, reason: CloseReason) {
        let _emit = self.inner.emit_lock.lock();

        let released = {
            let mut channels = self.inner.channels.lock();
            if channels.socket.as_ref().map(Connection::id) != Some(id) {
                trace!(connection = %id, "Ignoring close of inactive socket");
                return;
            }
            (channels.socket.take(), channels.heartbeat.take())
        };
        drop(released);

        warn!(connection = %id, ?reason, "Socket channel lost");
        if reason.is_error() {
            self.transition(ConnectionState::error());
        }
        self.transition(ConnectionState::disconnected());
        self.schedule_reconnect();
    }

    /// Schedules one `connect` after the reconnect delay.
    ///
    /// Does nothing if a reconnect is already pending.
    fn schedule_reconnect(&self) {
        let mut channels = self.inner.channels.lock();
        if channels
            .reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            trace!("Reconnect already scheduled");
            return;
        }

        let delay = self.inner.config.reconnect_delay;
        let weak = Arc::downgrade(&self.inner);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

        channels.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = ConnectionManager { inner };

            // Free the slot so this attempt can schedule the next one.
            drop(manager.inner.channels.lock().reconnect.take());

            if manager.status() != ConnectionStatus::Disconnected {
                return;
            }
            let Some(identity) = manager.identity() else {
                return;
            };

            info!("Reconnecting");
            if let Err(e) = manager.connect(identity).await {
                debug!(error = %e, "Reconnect attempt failed");
            }
        }));
    }

    /// Sets the state and notifies status listeners if it changed.
    fn transition(&self, next: ConnectionState) -> bool {
        let _emit = self.inner.emit_lock.lock();

        let previous = {
            let mut state = self.inner.state.lock();
            if *state == next {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };

        debug!(from = %previous, to = %next, "Connection state changed");
        self.inner.status_listeners.emit(&next);
        true
    }
}

// ============================================================================
// ConnectionManager - Send
// ============================================================================

impl ConnectionManager {
    /// Sends `command` with `payload` over the active transport.
    ///
    /// Failed sends are never retried.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no transport is active
    /// - [`Error::RequestTimeout`] or [`Error::Timeout`] if no answer arrives in time
    /// - [`Error::Remote`] if the backend answered with an error
    /// - [`Error::ConnectionClosed`] if the socket closed while waiting
    pub async fn send(&self, command: &str, payload: Value) -> Result<Value> {
        let transport = self.transport();
        let plan = SendPlan::for_transport(transport);
        if plan.is_empty() {
            return Err(Error::NotConnected);
        }

        trace!(%transport, command, "Sending");
        let payload = &payload;
        routing::execute(plan, move |step| self.attempt(step, command, payload)).await
    }

    async fn attempt(&self, step: Step, command: &str, payload: &Value) -> Attempt {
        let config = &self.inner.config;
        let timeout = match step.fallthrough {
            Fallthrough::Never => config.request_timeout,
            Fallthrough::OnUnreachable => config.http_probe_timeout,
        };

        match step.route {
            Route::Socket => {
                let socket = self.inner.channels.lock().socket.clone();
                match socket {
                    Some(socket) if socket.is_open() => Attempt::Done(
                        socket
                            .request_with_timeout(command, payload.clone(), timeout)
                            .await,
                    ),
                    _ => Attempt::Unavailable,
                }
            }

            Route::LocalHttp => Attempt::Done(self.inner.http.send(command, payload, timeout).await),

            Route::Tunnel => {
                let tunnel = self.inner.channels.lock().tunnel.clone();
                match tunnel {
                    Some(tunnel) => Attempt::Done(tunnel.send(command, payload, timeout).await),
                    None => Attempt::Unavailable,
                }
            }

            Route::Relay => match &self.inner.relay {
                Some(store) => Attempt::Done(self.enqueue_relay(store.as_ref(), command, payload).await),
                None => Attempt::Unavailable,
            },
        }
    }

    async fn enqueue_relay(
        &self,
        store: &dyn RelayStore,
        command: &str,
        payload: &Value,
    ) -> Result<Value> {
        let identity = self.identity().ok_or(Error::NotConnected)?;
        let request_id = RequestId::generate();

        let message = RelayMessage::new(
            identity,
            Direction::ToBackend,
            json!({
                "requestId": request_id,
                "command": command,
                "payload": payload,
            }),
        );
        let message_id = message.id;

        store.enqueue(message).await?;
        self.inner.activity.mark();
        debug!(%message_id, command, "Queued on relay");

        Ok(json!({
            "queued": true,
            "messageId": message_id,
            "requestId": request_id,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::relay::MemoryRelayStore;
    use crate::settings::MemorySettings;

    /// Picks a local port with nothing listening on it.
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn offline_builder() -> ConnectionManagerBuilder {
        let port = closed_port();
        ConnectionManager::builder()
            .socket_url(format!("ws://127.0.0.1:{port}"))
            .http_url(format!("http://127.0.0.1:{port}"))
    }

    fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let _ = manager.on_status_change(move |state: &ConnectionState| sink.lock().push(*state));
        states
    }

    #[tokio::test]
    async fn test_send_while_disconnected() {
        let manager = offline_builder().build().expect("build");
        let result = manager.send("quote", json!({ "symbol": "VTI" })).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_twice_emits_nothing_when_idle() {
        let manager = offline_builder().build().expect("build");
        let states = record_states(&manager);

        manager.disconnect();
        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::disconnected());
        assert!(states.lock().is_empty());
    }

    #[tokio::test]
    async fn test_offline_without_relay_fails_and_schedules_reconnect() {
        let manager = offline_builder().build().expect("build");
        let states = record_states(&manager);

        let result = manager.connect("user1").await;
        assert!(matches!(result, Err(Error::NoTransport)));
        assert_eq!(
            states.lock().as_slice(),
            &[
                ConnectionState::connecting(),
                ConnectionState::error(),
                ConnectionState::disconnected(),
            ]
        );
        assert!(manager.reconnect_scheduled());

        manager.disconnect();
        assert!(!manager.reconnect_scheduled());
    }

    #[tokio::test]
    async fn test_offline_with_relay_connects_to_relay() {
        let store = Arc::new(MemoryRelayStore::new());
        let manager = offline_builder()
            .relay_store(store.clone())
            .build()
            .expect("build");

        let state = manager.connect("user1").await.expect("connect");
        assert_eq!(state, ConnectionState::connected(Transport::Relay));
        assert_eq!(manager.identity().as_deref(), Some("user1"));
        assert!(manager.relay_poll_interval().is_some());

        let receipt = manager
            .send("trade", json!({ "symbol": "VTI", "qty": 1 }))
            .await
            .expect("queued");
        assert_eq!(receipt["queued"], true);

        let queued = store.peek("user1", Direction::ToBackend);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].body["command"], "trade");
        assert_eq!(queued[0].body["payload"]["qty"], 1);
        assert_eq!(receipt["messageId"], json!(queued[0].id));

        manager.disconnect();
        assert_eq!(manager.relay_poll_interval(), None);
    }

    #[tokio::test]
    async fn test_new_relay_session_starts_idle() {
        let store = Arc::new(MemoryRelayStore::new());
        let manager = offline_builder().relay_store(store).build().expect("build");
        let cadence = manager.config().poll;

        manager.connect("user1").await.expect("connect");
        manager.send("goals", json!({})).await.expect("queued");
        assert_eq!(manager.relay_poll_interval(), Some(cadence.active_interval));

        manager.disconnect();
        manager.connect("user1").await.expect("reconnect");
        assert_eq!(manager.relay_poll_interval(), Some(cadence.idle_interval));
    }

    #[tokio::test]
    async fn test_listener_may_disconnect_reentrantly() {
        let store = Arc::new(MemoryRelayStore::new());
        let manager = offline_builder().relay_store(store).build().expect("build");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = manager.clone();
        let _ = manager.on_status_change(move |state: &ConnectionState| {
            counter.fetch_add(1, Ordering::SeqCst);
            if state.is_connected() {
                handle.disconnect();
            }
        });

        manager.connect("user1").await.expect("connect");
        assert_eq!(manager.state(), ConnectionState::disconnected());
        // connecting, connected, disconnected
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_set_tunnel_url_validates_and_persists() {
        let settings = Arc::new(MemorySettings::new());
        let manager = offline_builder()
            .settings(settings.clone())
            .build()
            .expect("build");

        assert!(manager.set_tunnel_url(Some("not a url")).is_err());
        assert!(manager.set_tunnel_url(Some("ftp://abc.example")).is_err());
        assert_eq!(manager.tunnel_url().expect("get"), None);

        manager
            .set_tunnel_url(Some("https://abc.tunnel.example/"))
            .expect("set");
        assert_eq!(
            settings.get(TUNNEL_URL_KEY).expect("get").as_deref(),
            Some("https://abc.tunnel.example/")
        );

        manager.set_tunnel_url(None).expect("clear");
        assert_eq!(manager.tunnel_url().expect("get"), None);
    }

    /// Refuses every dial and counts attempts.
    #[derive(Default)]
    struct CountingDialer {
        dials: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SocketDialer for CountingDialer {
        async fn dial(&self, _url: &Url) -> Result<crate::transport::BoxedStream> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Err(Error::unreachable(Transport::Socket, "connection refused"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_single_flight() {
        let dialer = Arc::new(CountingDialer::default());
        let manager = offline_builder()
            .dialer(dialer.clone())
            .relay_store(Arc::new(MemoryRelayStore::new()))
            .build()
            .expect("build");
        *manager.inner.identity.lock() = Some("user1".to_string());

        manager.schedule_reconnect();
        manager.schedule_reconnect();
        manager.schedule_reconnect();
        assert!(manager.reconnect_scheduled());

        sleep(Duration::from_millis(5_100)).await;
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);

        manager.disconnect();
        assert!(!manager.reconnect_scheduled());
    }

    #[tokio::test]
    async fn test_diagnose_leaves_state_untouched() {
        let manager = offline_builder().build().expect("build");
        let states = record_states(&manager);

        let outcomes = manager.diagnose("user1").await;
        let transports: Vec<_> = outcomes.iter().map(|o| o.transport).collect();
        assert_eq!(transports, Transport::CASCADE.to_vec());
        assert!(outcomes.iter().all(|o| !o.reachable));
        assert!(states.lock().is_empty());
    }
}
