//! Request correlation benchmark suite.
//!
//! Measures the pending-request table and full socket round trips:
//! - Register/resolve throughput at different in-flight counts
//! - Concurrent requests over an in-memory socket
//!
//! Run with: cargo bench --bench correlation
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::{SinkExt, StreamExt};
use lifeops_link::RequestId;
use lifeops_link::protocol::Response;
use lifeops_link::transport::{ChannelHooks, Connection, Correlator};
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const IN_FLIGHT: &[usize] = &[1, 16, 256];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Benchmark: Correlator
// ============================================================================

fn bench_register_resolve(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("correlator");

    for &count in IN_FLIGHT {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("register_resolve", count), &count, |b, &n| {
            b.to_async(&rt).iter(|| register_resolve(n));
        });
    }

    group.finish();
}

async fn register_resolve(count: usize) {
    let correlator = Arc::new(Correlator::new());

    let handles: Vec<_> = (0..count)
        .map(|_| {
            correlator
                .register(RequestId::generate(), "quote", REQUEST_TIMEOUT)
                .expect("register")
        })
        .collect();

    for handle in &handles {
        correlator.resolve(Response {
            id: handle.id(),
            result: Some(Value::Null),
            error: None,
        });
    }

    for handle in handles {
        handle.wait().await.expect("resolved");
    }
}

// ============================================================================
// Benchmark: Socket Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let connection = rt.block_on(echo_connection());

    let mut group = c.benchmark_group("socket");

    for &count in IN_FLIGHT {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("round_trip", count), &count, |b, &n| {
            b.to_async(&rt).iter(|| concurrent_requests(&connection, n));
        });
    }

    group.finish();
    connection.shutdown();
}

async fn concurrent_requests(connection: &Connection, count: usize) {
    let requests = (0..count).map(|n| connection.request("quote", json!({ "n": n })));
    for result in futures_util::future::join_all(requests).await {
        result.expect("round trip");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Opens a connection to an in-memory backend that answers every request.
async fn echo_connection() -> Connection {
    let (client, server) = tokio::io::duplex(1 << 20);
    tokio::spawn(echo_backend(server));

    let (ws, _) = tokio_tungstenite::client_async("ws://bench.local/", client)
        .await
        .expect("handshake");
    Connection::new(ws, ChannelHooks::new())
}

async fn echo_backend(stream: DuplexStream) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let Some(request_id) = frame.get("requestId") else {
            continue;
        };

        let reply = json!({ "requestId": request_id, "result": { "n": frame["n"] } });
        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
            break;
        }
    }
}

criterion_group!(benches, bench_register_resolve, bench_round_trip);
criterion_main!(benches);
