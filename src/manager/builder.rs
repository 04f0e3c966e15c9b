//! Builder pattern for connection manager configuration.
//!
//! Provides a fluent API for wiring a [`ConnectionManager`] to its
//! collaborators.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lifeops_link::{ConnectionManager, FileRelayStore, FileSettings};
//!
//! let manager = ConnectionManager::builder()
//!     .socket_url("ws://127.0.0.1:3001")
//!     .http_url("http://127.0.0.1:3001")
//!     .relay_store(Arc::new(FileRelayStore::new("relay.json")))
//!     .settings(Arc::new(FileSettings::new("settings.json")))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};
use crate::relay::RelayStore;
use crate::settings::{MemorySettings, SettingsStore};
use crate::transport::{HttpEndpoint, SocketDialer, TcpDialer};

use super::config::ManagerConfig;
use super::core::{ConnectionManager, ManagerParts};
use super::state::Transport;

// ============================================================================
// ConnectionManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`] instance.
///
/// Use [`ConnectionManager::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ConnectionManagerBuilder {
    /// Endpoints and timings.
    config: ManagerConfig,
    /// Stream dialer for the socket; defaults to TCP.
    dialer: Option<Arc<dyn SocketDialer>>,
    /// Relay backend; without one the cascade can fail.
    relay: Option<Arc<dyn RelayStore>>,
    /// Settings backend; defaults to in-memory.
    settings: Option<Arc<dyn SettingsStore>>,
    /// Shared HTTP client.
    http_client: Option<reqwest::Client>,
}

impl fmt::Debug for ConnectionManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManagerBuilder")
            .field("config", &self.config)
            .field("dialer", &self.dialer.is_some())
            .field("relay", &self.relay.is_some())
            .field("settings", &self.settings.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionManagerBuilder Implementation
// ============================================================================

impl ConnectionManagerBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the socket endpoint.
    #[inline]
    #[must_use]
    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.config.socket_url = url.into();
        self
    }

    /// Sets the local HTTP endpoint.
    #[inline]
    #[must_use]
    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.config.http_url = url.into();
        self
    }

    /// Sets the socket stream dialer.
    #[inline]
    #[must_use]
    pub fn dialer(mut self, dialer: Arc<dyn SocketDialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Sets the relay store, enabling the relay transport.
    #[inline]
    #[must_use]
    pub fn relay_store(mut self, store: Arc<dyn RelayStore>) -> Self {
        self.relay = Some(store);
        self
    }

    /// Sets the settings store holding the tunnel URL.
    #[inline]
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the HTTP client used for local HTTP and the tunnel.
    #[inline]
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the manager with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Http`] if the default HTTP client cannot be created
    pub fn build(self) -> Result<ConnectionManager> {
        self.config.validate().map_err(Error::config)?;

        let socket_url = Url::parse(&self.config.socket_url)?;
        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };
        let http = HttpEndpoint::new(Transport::Http, &self.config.http_url, http_client.clone())?;

        Ok(ConnectionManager::from_parts(ManagerParts {
            config: self.config,
            socket_url,
            dialer: self.dialer.unwrap_or_else(|| Arc::new(TcpDialer)),
            http,
            http_client,
            relay: self.relay,
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(MemorySettings::new())),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::manager::ConnectionStatus;
    use crate::relay::MemoryRelayStore;

    #[test]
    fn test_new_uses_default_config() {
        let builder = ConnectionManagerBuilder::new();
        assert_eq!(builder.config, ManagerConfig::default());
        assert!(builder.dialer.is_none());
        assert!(builder.relay.is_none());
        assert!(builder.settings.is_none());
    }

    #[test]
    fn test_url_setters() {
        let builder = ConnectionManagerBuilder::new()
            .socket_url("ws://10.0.0.2:4000")
            .http_url("http://10.0.0.2:4000");
        assert_eq!(builder.config.socket_url, "ws://10.0.0.2:4000");
        assert_eq!(builder.config.http_url, "http://10.0.0.2:4000");
    }

    #[test]
    fn test_relay_store_is_kept() {
        let builder = ConnectionManagerBuilder::new().relay_store(Arc::new(MemoryRelayStore::new()));
        assert!(builder.relay.is_some());
    }

    #[test]
    fn test_build_rejects_bad_socket_scheme() {
        let result = ConnectionManagerBuilder::new()
            .socket_url("http://127.0.0.1:3001")
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let config = ManagerConfig::new().with_request_timeout(Duration::ZERO);
        let result = ConnectionManagerBuilder::new().config(config).build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_build_starts_disconnected() {
        let manager = ConnectionManagerBuilder::new().build().expect("build");
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.transport(), Transport::None);
        assert_eq!(manager.pending_requests(), 0);
    }
}
