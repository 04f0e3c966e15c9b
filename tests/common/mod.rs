//! Shared fixtures for integration tests.
//!
//! Provides:
//! - An in-process socket backend reached through an in-memory dialer
//! - Mock HTTP servers for the local HTTP and tunnel surfaces
//! - Logging initialization

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lifeops_link::transport::BoxedStream;
use lifeops_link::{Error, Result, SocketDialer, Transport};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Logging
// ============================================================================

/// Installs a test subscriber once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lifeops_link=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Network Helpers
// ============================================================================

/// Returns `scheme://127.0.0.1:{port}` for a port with nothing listening.
pub fn closed_url(scheme: &str) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    format!("{scheme}://127.0.0.1:{port}")
}

/// Starts a mock server whose `/health` answers `status`.
pub async fn http_backend(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;
    server
}

// ============================================================================
// Reply
// ============================================================================

/// How the fake backend answers one correlated request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{requestId, result}` after `delay`.
    Result { result: Value, delay: Duration },
    /// `{requestId, error}` after `delay`.
    Error { message: String, delay: Duration },
    /// No answer at all.
    Silent,
}

impl Reply {
    pub fn ok(result: Value) -> Self {
        Self::Result {
            result,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(result: Value, delay: Duration) -> Self {
        Self::Result { result, delay }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            delay: Duration::ZERO,
        }
    }
}

/// Computes the reply for a request frame.
pub type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Instruction broadcast to every live session.
#[derive(Debug, Clone)]
enum Control {
    /// Send a close frame and end the session.
    Close,
    /// End the session without a close frame.
    Drop,
    /// Send an uncorrelated frame.
    Push(String),
}

// ============================================================================
// FakeBackend
// ============================================================================

struct BackendState {
    reachable: AtomicBool,
    responder: Mutex<Responder>,
    auths: Mutex<Vec<Value>>,
    requests: Mutex<Vec<Value>>,
    control: broadcast::Sender<Control>,
}

/// In-process socket backend.
///
/// Speaks the backend's socket protocol over `tokio::io::duplex`, so tests
/// can run on paused time without real I/O.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<BackendState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Creates a reachable backend that echoes every request.
    pub fn new() -> Self {
        let (control, _) = broadcast::channel(16);
        Self {
            state: Arc::new(BackendState {
                reachable: AtomicBool::new(true),
                responder: Mutex::new(Arc::new(|request: &Value| {
                    Reply::ok(json!({ "echo": request }))
                })),
                auths: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                control,
            }),
        }
    }

    /// Creates a backend that refuses every dial.
    pub fn unreachable() -> Self {
        let backend = Self::new();
        backend.set_reachable(false);
        backend
    }

    /// Returns a dialer connecting to this backend.
    pub fn dialer(&self) -> Arc<dyn SocketDialer> {
        Arc::new(self.clone())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Replaces the reply policy.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        *self.state.responder.lock() = Arc::new(responder);
    }

    /// Handshake frames received so far.
    pub fn auths(&self) -> Vec<Value> {
        self.state.auths.lock().clone()
    }

    pub fn auth_count(&self) -> usize {
        self.state.auths.lock().len()
    }

    /// Correlated request frames received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().clone()
    }

    /// Closes every live session with a close frame.
    pub fn close_sessions(&self) {
        let _ = self.state.control.send(Control::Close);
    }

    /// Ends every live session without a closing handshake.
    pub fn drop_sessions(&self) {
        let _ = self.state.control.send(Control::Drop);
    }

    /// Sends an uncorrelated frame on every live session.
    pub fn push(&self, message: Value) {
        let _ = self.state.control.send(Control::Push(message.to_string()));
    }

    /// Waits until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        while self.state.requests.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn serve(state: Arc<BackendState>, stream: DuplexStream) {
        let mut control = state.control.subscribe();
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut sink, mut source) = ws.split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => Self::handle_frame(&state, &text, &reply_tx),
                    Some(Ok(_)) => {}
                    _ => break,
                },

                Some(reply) = reply_rx.recv() => {
                    if sink.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }

                command = control.recv() => match command {
                    Ok(Control::Push(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Control::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Ok(Control::Drop) | Err(_) => break,
                },
            }
        }
    }

    fn handle_frame(state: &BackendState, text: &str, reply_tx: &mpsc::UnboundedSender<String>) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };

        let kind = frame["type"].as_str().map(str::to_owned);
        match kind.as_deref() {
            Some("auth") => {
                state.auths.lock().push(frame);
                return;
            }
            Some("ping") => return,
            _ => {}
        }

        let Some(request_id) = frame.get("requestId").cloned() else {
            return;
        };
        let responder = Arc::clone(&*state.responder.lock());
        let reply = responder(&frame);
        state.requests.lock().push(frame);

        let (body, delay) = match reply {
            Reply::Result { result, delay } => {
                (json!({ "requestId": request_id, "result": result }), delay)
            }
            Reply::Error { message, delay } => {
                (json!({ "requestId": request_id, "error": message }), delay)
            }
            Reply::Silent => return,
        };

        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = reply_tx.send(body.to_string());
        });
    }
}

#[async_trait]
impl SocketDialer for FakeBackend {
    async fn dial(&self, _url: &Url) -> Result<BoxedStream> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(Error::unreachable(Transport::Socket, "connection refused"));
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Self::serve(Arc::clone(&self.state), server));
        Ok(Box::new(client))
    }
}

// ============================================================================
// State Recording
// ============================================================================

/// Collects every status notification.
pub fn record_states(
    manager: &lifeops_link::ConnectionManager,
) -> Arc<Mutex<Vec<lifeops_link::ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _ = manager.on_status_change(move |state: &lifeops_link::ConnectionState| {
        sink.lock().push(*state);
    });
    states
}

/// Collects every message delivered to listeners.
pub fn record_messages(manager: &lifeops_link::ConnectionManager) -> Arc<Mutex<Vec<Value>>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let _ = manager.on_message(move |message: &Value| sink.lock().push(message.clone()));
    messages
}
