// Shared test helpers: a fake pod speaking the pRPC wire protocol.
// One instance serves both roles: seed (get-pods) and stats endpoint
// (get-stats), since both live behind POST /rpc.

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Duration;

pub struct FakePodState {
    /// Raw `result` value returned for get-pods.
    pub pods_result: Mutex<Value>,
    /// Full envelope body returned for get-stats (lets tests inject errors).
    pub stats_response: Mutex<Value>,
    pub pods_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    /// Gauge of concurrent get-stats requests, and its high-water mark.
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Artificial latency for get-stats, to make overlap observable.
    pub stats_delay_ms: AtomicU64,
}

pub struct FakePod {
    pub port: u16,
    pub base_url: String,
    pub state: Arc<FakePodState>,
}

pub fn stats_ok_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "cpu_percent": 42.5,
            "uptime_seconds": 7200,
            "ram": { "used": 1024, "total": 4096 },
            "network": { "packets_in_per_sec": 10.0, "packets_out_per_sec": 5.0, "active_streams": 3 },
            "storage": { "total_bytes": 1_000_000, "total_pages": 244 }
        }
    })
}

pub fn stats_error_body(message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": -32000, "message": message }
    })
}

pub fn pod_entry(address: &str, pubkey: &str) -> Value {
    json!({
        "address": address,
        "pubkey": pubkey,
        "version": "0.7.1",
        "last_seen_timestamp": 1_700_000_000,
        "is_public": true,
        "credits": 1000,
        "storage_committed": 4096,
        "storage_used": 1024,
        "storage_usage_percent": 0.25
    })
}

async fn rpc_handler(State(state): State<Arc<FakePodState>>, Json(req): Json<Value>) -> Json<Value> {
    match req["method"].as_str() {
        Some("get-pods") => {
            state.pods_calls.fetch_add(1, Ordering::SeqCst);
            let result = state.pods_result.lock().unwrap().clone();
            Json(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }))
        }
        Some("get-stats") => {
            state.stats_calls.fetch_add(1, Ordering::SeqCst);
            let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_in_flight.fetch_max(current, Ordering::SeqCst);
            let delay = state.stats_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            Json(state.stats_response.lock().unwrap().clone())
        }
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": { "code": -32601, "message": "method not found" }
        })),
    }
}

/// Binds a fake pod on an ephemeral port; the server lives until the test ends.
pub async fn spawn_fake_pod() -> FakePod {
    let state = Arc::new(FakePodState {
        pods_result: Mutex::new(json!([])),
        stats_response: Mutex::new(stats_ok_body()),
        pods_calls: AtomicUsize::new(0),
        stats_calls: AtomicUsize::new(0),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        stats_delay_ms: AtomicU64::new(0),
    });
    let app = Router::new()
        .route("/rpc", post(rpc_handler))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    FakePod {
        port,
        base_url: format!("http://127.0.0.1:{port}"),
        state,
    }
}
