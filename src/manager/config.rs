//! Connection manager configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use lifeops_link::ManagerConfig;
//!
//! let config = ManagerConfig::new()
//!     .with_socket_url("ws://192.168.1.20:3001")
//!     .with_http_url("http://192.168.1.20:3001")
//!     .with_reconnect_delay(Duration::from_secs(10));
//!
//! assert!(config.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::relay::PollCadence;
use crate::transport::correlator::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use crate::transport::probe::{HTTP_PROBE_TIMEOUT, SOCKET_PROBE_TIMEOUT, TUNNEL_PROBE_TIMEOUT};

// ============================================================================
// Constants
// ============================================================================

/// Default persistent socket endpoint.
pub const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:3001";

/// Default local HTTP endpoint.
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:3001";

/// Default delay before reconnecting after a lost channel.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

// ============================================================================
// ManagerConfig
// ============================================================================

/// Endpoints and timings for a [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Persistent socket endpoint (`ws://` or `wss://`).
    pub socket_url: String,

    /// Local HTTP endpoint (`http://` or `https://`).
    pub http_url: String,

    /// Budget for the socket handshake.
    pub socket_probe_timeout: Duration,

    /// Budget for the local HTTP health check.
    pub http_probe_timeout: Duration,

    /// Budget for the tunnel health check.
    pub tunnel_probe_timeout: Duration,

    /// Deadline for each request.
    pub request_timeout: Duration,

    /// Socket keep-alive period.
    pub heartbeat_interval: Duration,

    /// Delay before reconnecting after a lost channel.
    pub reconnect_delay: Duration,

    /// Relay polling intervals.
    pub poll: PollCadence,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ManagerConfig {
    /// Creates a configuration pointing at a backend on `127.0.0.1:3001`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            http_url: DEFAULT_HTTP_URL.to_string(),
            socket_probe_timeout: SOCKET_PROBE_TIMEOUT,
            http_probe_timeout: HTTP_PROBE_TIMEOUT,
            tunnel_probe_timeout: TUNNEL_PROBE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll: PollCadence::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ManagerConfig {
    /// Sets the socket endpoint.
    #[inline]
    #[must_use]
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    /// Sets the local HTTP endpoint.
    #[inline]
    #[must_use]
    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = url.into();
        self
    }

    /// Sets all three probe budgets.
    #[inline]
    #[must_use]
    pub fn with_probe_timeouts(mut self, socket: Duration, http: Duration, tunnel: Duration) -> Self {
        self.socket_probe_timeout = socket;
        self.http_probe_timeout = http;
        self.tunnel_probe_timeout = tunnel;
        self
    }

    /// Sets the request deadline.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the keep-alive period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the relay polling intervals.
    #[inline]
    #[must_use]
    pub fn with_poll_cadence(mut self, cadence: PollCadence) -> Self {
        self.poll = cadence;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ManagerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if a URL is malformed or has the wrong
    /// scheme, or if a duration is zero.
    pub fn validate(&self) -> Result<(), String> {
        let socket = Url::parse(&self.socket_url)
            .map_err(|e| format!("Invalid socket URL '{}': {e}", self.socket_url))?;
        if !matches!(socket.scheme(), "ws" | "wss") {
            return Err(format!("Socket URL must use ws or wss: {}", self.socket_url));
        }

        let http = Url::parse(&self.http_url)
            .map_err(|e| format!("Invalid HTTP URL '{}': {e}", self.http_url))?;
        if !matches!(http.scheme(), "http" | "https") {
            return Err(format!("HTTP URL must use http or https: {}", self.http_url));
        }

        let durations = [
            ("socket_probe_timeout", self.socket_probe_timeout),
            ("http_probe_timeout", self.http_probe_timeout),
            ("tunnel_probe_timeout", self.tunnel_probe_timeout),
            ("request_timeout", self.request_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_delay", self.reconnect_delay),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(format!("{name} must be non-zero"));
        }

        self.poll.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.socket_url, "ws://127.0.0.1:3001");
        assert_eq!(config.http_url, "http://127.0.0.1:3001");
        assert_eq!(config.socket_probe_timeout, Duration::from_millis(3_000));
        assert_eq!(config.http_probe_timeout, Duration::from_millis(3_000));
        assert_eq!(config.tunnel_probe_timeout, Duration::from_millis(5_000));
        assert_eq!(config.request_timeout, Duration::from_millis(30_000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(30_000));
        assert_eq!(config.reconnect_delay, Duration::from_millis(5_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ManagerConfig::new()
            .with_socket_url("wss://backend.example/ws")
            .with_http_url("https://backend.example")
            .with_request_timeout(Duration::from_secs(5));
        assert_eq!(config.socket_url, "wss://backend.example/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_socket_scheme() {
        let config = ManagerConfig::new().with_socket_url("http://127.0.0.1:3001");
        assert!(config.validate().unwrap_err().contains("ws or wss"));
    }

    #[test]
    fn test_validate_http_scheme() {
        let config = ManagerConfig::new().with_http_url("ftp://127.0.0.1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_malformed_url() {
        let config = ManagerConfig::new().with_http_url("not a url");
        assert!(config.validate().unwrap_err().contains("Invalid HTTP URL"));
    }

    #[test]
    fn test_validate_zero_duration() {
        let config = ManagerConfig::new().with_reconnect_delay(Duration::ZERO);
        assert_eq!(config.validate().unwrap_err(), "reconnect_delay must be non-zero");
    }
}
