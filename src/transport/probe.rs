//! Bounded-time reachability probes.
//!
//! A probe never fails and never retries: every error, including its own
//! timeout, becomes `reachable == false`. Retry policy belongs to the
//! connection manager's cascade.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::{Instant, timeout};
use tracing::debug;
use url::Url;

use crate::manager::Transport;

use super::connection::{ChannelHooks, Connection};
use super::dialer::SocketDialer;
use super::http::HttpEndpoint;

// ============================================================================
// Constants
// ============================================================================

/// Budget for the socket handshake.
pub const SOCKET_PROBE_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Budget for the local HTTP health check.
pub const HTTP_PROBE_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Budget for the tunnel health check (crosses the wide-area network).
pub const TUNNEL_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

// ============================================================================
// ProbeOutcome
// ============================================================================

/// Result of probing one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Probed transport.
    pub transport: Transport,
    /// Whether the transport answered within its budget.
    pub reachable: bool,
    /// Time spent probing.
    pub elapsed: Duration,
    /// Failure description, if any.
    pub detail: Option<String>,
}

impl ProbeOutcome {
    fn reachable(transport: Transport, started: Instant) -> Self {
        Self {
            transport,
            reachable: true,
            elapsed: started.elapsed(),
            detail: None,
        }
    }

    fn unreachable(transport: Transport, started: Instant, detail: String) -> Self {
        debug!(%transport, %detail, "Probe failed");
        Self {
            transport,
            reachable: false,
            elapsed: started.elapsed(),
            detail: Some(detail),
        }
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Opens the persistent socket and sends the auth handshake within `budget`.
///
/// On success the live connection is returned so it need not be reopened.
pub async fn probe_socket(
    dialer: &dyn SocketDialer,
    url: &Url,
    identity: &str,
    budget: Duration,
    hooks: ChannelHooks,
) -> (ProbeOutcome, Option<Connection>) {
    let started = Instant::now();

    match timeout(budget, Connection::open(dialer, url, identity, hooks)).await {
        Ok(Ok(connection)) => (
            ProbeOutcome::reachable(Transport::Socket, started),
            Some(connection),
        ),
        Ok(Err(e)) => (
            ProbeOutcome::unreachable(Transport::Socket, started, e.to_string()),
            None,
        ),
        Err(_) => (
            ProbeOutcome::unreachable(
                Transport::Socket,
                started,
                format!("handshake timed out after {}ms", budget.as_millis()),
            ),
            None,
        ),
    }
}

/// Checks the endpoint's health route within `budget`.
pub async fn probe_http(endpoint: &HttpEndpoint, budget: Duration) -> ProbeOutcome {
    let transport = endpoint.transport();
    let started = Instant::now();

    match timeout(budget, endpoint.check_health(budget)).await {
        Ok(Ok(())) => ProbeOutcome::reachable(transport, started),
        Ok(Err(e)) => ProbeOutcome::unreachable(transport, started, e.to_string()),
        Err(_) => ProbeOutcome::unreachable(
            transport,
            started,
            format!("health check timed out after {}ms", budget.as_millis()),
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use serde_json::{Value, json};
    use tokio_tungstenite::tungstenite::Message;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::{Error, Result};
    use crate::transport::dialer::{BoxedStream, TcpDialer};

    /// Dialer whose stream never completes the WebSocket upgrade.
    struct StallingDialer;

    #[async_trait]
    impl SocketDialer for StallingDialer {
        async fn dial(&self, _url: &Url) -> Result<BoxedStream> {
            let (client, server) = tokio::io::duplex(1024);
            // Keep the peer alive but silent.
            tokio::spawn(async move {
                let _server = server;
                std::future::pending::<()>().await;
            });
            Ok(Box::new(client))
        }
    }

    /// Dialer that always refuses.
    struct RefusingDialer;

    #[async_trait]
    impl SocketDialer for RefusingDialer {
        async fn dial(&self, _url: &Url) -> Result<BoxedStream> {
            Err(Error::unreachable(Transport::Socket, "refused"))
        }
    }

    fn socket_url() -> Url {
        Url::parse("ws://127.0.0.1:3001").expect("url")
    }

    #[test]
    fn test_budgets() {
        assert_eq!(SOCKET_PROBE_TIMEOUT.as_millis(), 3_000);
        assert_eq!(HTTP_PROBE_TIMEOUT.as_millis(), 3_000);
        assert_eq!(TUNNEL_PROBE_TIMEOUT.as_millis(), 5_000);
    }

    #[tokio::test]
    async fn test_socket_probe_sends_auth_handshake() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");

        let backend = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            match ws.next().await {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).ok(),
                _ => None,
            }
        });

        let (outcome, connection) =
            probe_socket(&TcpDialer, &url, "user1", SOCKET_PROBE_TIMEOUT, ChannelHooks::new()).await;

        assert!(outcome.reachable);
        assert_eq!(outcome.transport, Transport::Socket);
        assert!(connection.is_some_and(|c| c.is_open()));
        assert_eq!(
            backend.await.expect("join"),
            Some(json!({ "type": "auth", "userId": "user1" }))
        );
    }

    #[tokio::test]
    async fn test_socket_probe_refused() {
        let (outcome, connection) = probe_socket(
            &RefusingDialer,
            &socket_url(),
            "user1",
            SOCKET_PROBE_TIMEOUT,
            ChannelHooks::new(),
        )
        .await;

        assert!(!outcome.reachable);
        assert!(outcome.detail.is_some());
        assert!(connection.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_probe_times_out() {
        let started = Instant::now();
        let (outcome, connection) = probe_socket(
            &StallingDialer,
            &socket_url(),
            "user1",
            SOCKET_PROBE_TIMEOUT,
            ChannelHooks::new(),
        )
        .await;

        assert!(!outcome.reachable);
        assert!(connection.is_none());
        assert_eq!(started.elapsed(), SOCKET_PROBE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_http_probe_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let endpoint = HttpEndpoint::new(Transport::Http, &server.uri(), reqwest::Client::new())
            .expect("endpoint");
        let outcome = probe_http(&endpoint, HTTP_PROBE_TIMEOUT).await;
        assert!(outcome.reachable);
        assert_eq!(outcome.transport, Transport::Http);
    }

    #[tokio::test]
    async fn test_tunnel_probe_strips_trailing_slash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let base = format!("{}/", server.uri());
        let endpoint = HttpEndpoint::new(Transport::Tunnel, &base, reqwest::Client::new())
            .expect("endpoint");
        let outcome = probe_http(&endpoint, TUNNEL_PROBE_TIMEOUT).await;
        assert!(outcome.reachable);
        assert_eq!(outcome.transport, Transport::Tunnel);
    }

    #[tokio::test]
    async fn test_http_probe_slow_health_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let endpoint = HttpEndpoint::new(Transport::Http, &server.uri(), reqwest::Client::new())
            .expect("endpoint");
        let outcome = probe_http(&endpoint, Duration::from_millis(100)).await;
        assert!(!outcome.reachable);
    }
}
