//! HTTP request/response transport.
//!
//! Serves both the local HTTP transport and the tunnel: the tunnel exposes
//! the same surface as the local backend, only over the wide-area network.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET {base}/health` | Reachability probe |
//! | `POST {base}/api/{command}` | Command call, JSON body = payload |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::manager::Transport;

// ============================================================================
// Constants
// ============================================================================

/// Longest error body kept in a [`Error::Remote`] message.
const MAX_ERROR_BODY: usize = 256;

// ============================================================================
// HttpEndpoint
// ============================================================================

/// A backend reachable over HTTP.
///
/// Cloning is cheap; the underlying [`reqwest::Client`] pools connections.
#[derive(Clone)]
pub struct HttpEndpoint {
    transport: Transport,
    base: String,
    client: reqwest::Client,
}

impl fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("transport", &self.transport)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl HttpEndpoint {
    /// Creates an endpoint rooted at `base_url`.
    ///
    /// Trailing slashes are stripped so request paths never double up.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if `base_url` does not parse
    /// - [`Error::Config`] if the scheme is not `http` or `https`
    pub fn new(transport: Transport, base_url: &str, client: reqwest::Client) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base)?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "{transport} URL must use http or https: {base_url}"
            )));
        }

        Ok(Self {
            transport,
            base,
            client,
        })
    }

    /// Returns which transport this endpoint serves.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the base URL without trailing slash.
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Returns the health-check URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] if the URL cannot be built.
    pub fn health_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/health", self.base))?)
    }

    /// Returns the URL for `command`.
    ///
    /// The command is percent-encoded as a single path segment.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if `command` is empty
    /// - [`Error::Url`] if the URL cannot be built
    pub fn command_url(&self, command: &str) -> Result<Url> {
        if command.is_empty() {
            return Err(Error::protocol("Command name must not be empty"));
        }
        let encoded = urlencoding::encode(command);
        Ok(Url::parse(&format!("{}/api/{encoded}", self.base))?)
    }

    /// Checks `GET /health` within `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Unreachable`] on connect failure or non-2xx status
    /// - [`Error::Timeout`] if no answer arrives in time
    pub async fn check_health(&self, timeout: Duration) -> Result<()> {
        let url = self.health_url()?;

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, "GET /health", timeout))?;

        let status = response.status();
        if status.is_success() {
            trace!(transport = %self.transport, "Health check passed");
            Ok(())
        } else {
            Err(Error::unreachable(
                self.transport,
                format!("health check returned {status}"),
            ))
        }
    }

    /// Sends `command` with `payload` as JSON body.
    ///
    /// A `null` payload is sent as `{}`. An empty 2xx body resolves to `null`.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] with `HTTP {status}` for non-2xx responses
    /// - [`Error::Unreachable`] if the endpoint refuses the connection
    /// - [`Error::Timeout`] if no answer arrives within `timeout`
    /// - [`Error::Json`] if a 2xx body is not JSON
    pub async fn send(&self, command: &str, payload: &Value, timeout: Duration) -> Result<Value> {
        let url = self.command_url(command)?;
        let operation = format!("POST /api/{command}");

        let body = match payload {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, &operation, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY).collect();
            debug!(transport = %self.transport, %status, command, "Command rejected");
            return Err(Error::http_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                &text,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_reqwest_error(e, &operation, timeout))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Maps a reqwest failure into the crate taxonomy.
    fn map_reqwest_error(&self, error: reqwest::Error, operation: &str, timeout: Duration) -> Error {
        if error.is_timeout() {
            Error::timeout(
                format!("{operation} via {}", self.transport),
                timeout.as_millis() as u64,
            )
        } else if error.is_connect() {
            Error::unreachable(self.transport, error.to_string())
        } else {
            Error::Http(error)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
