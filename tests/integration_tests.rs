// Integration tests: full cycles through the coordinator and the HTTP API

mod common;

use axum_test::TestServer;
use common::{FakePod, pod_entry, spawn_fake_pod};
use podwatch::config::{IngestConfig, SeedConfig, SnapshotConfig};
use podwatch::coordinator::{Coordinator, CycleOutcome};
use podwatch::prpc_client::PrpcClient;
use podwatch::registry_repo::RegistryRepo;
use podwatch::routes;
use podwatch::snapshot_repo::SnapshotRepo;
use podwatch::store;
use podwatch::telemetry_repo::TelemetryRepo;
use podwatch::views::Views;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    pod: FakePod,
    coordinator: Arc<Coordinator>,
    server: TestServer,
}

fn ingest_config(stats_port: u16) -> IngestConfig {
    IngestConfig {
        cycle_interval_secs: 300,
        stats_concurrency: 10,
        backoff_base_secs: 60,
        backoff_cap_exponent: 5,
        stats_port,
        request_timeout_secs: 5,
        stats_log_interval_secs: 300,
    }
}

/// One fake pod acting as both the only seed and every peer's stats endpoint.
async fn setup() -> Harness {
    setup_with_extra_seeds(&[]).await
}

async fn setup_with_extra_seeds(extra: &[SeedConfig]) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("podwatch.db");
    let pool = store::connect(path.to_str().unwrap(), 5).await.unwrap();
    store::init(&pool).await.unwrap();

    let pod = spawn_fake_pod().await;
    *pod.state.pods_result.lock().unwrap() = json!([
        pod_entry("127.0.0.1:9000", "pk1"),
        pod_entry("127.0.0.1:9001", "pk2"),
    ]);

    let registry = RegistryRepo::new(pool.clone());
    let telemetry = TelemetryRepo::new(pool.clone());
    let snapshots = SnapshotRepo::new(pool);
    let mut seeds = vec![SeedConfig {
        name: "seed-a".to_string(),
        base_url: pod.base_url.clone(),
        enabled: true,
    }];
    seeds.extend_from_slice(extra);
    registry.ensure_seeds(&seeds).await.unwrap();

    let client = PrpcClient::new(Duration::from_secs(5)).unwrap();
    let coordinator = Arc::new(Coordinator::new(
        registry.clone(),
        telemetry.clone(),
        snapshots.clone(),
        client,
        &ingest_config(pod.port),
        &SnapshotConfig::default(),
    ));
    let views = Views::new(registry, telemetry, snapshots);
    let app = routes::app(views, coordinator.clone());
    let server = TestServer::new(app);
    Harness {
        _dir: dir,
        pod,
        coordinator,
        server,
    }
}

#[tokio::test]
async fn test_root_endpoint() {
    let h = setup().await;
    let response = h.server.get("/").await;
    response.assert_status_ok();
    response.assert_text("podwatch: pNode network monitor");
}

#[tokio::test]
async fn test_version_endpoint() {
    let h = setup().await;
    let response = h.server.get("/version").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json.get("name").and_then(|v| v.as_str()), Some("podwatch"));
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_status_and_network_404_before_first_cycle() {
    let h = setup().await;
    h.server
        .get("/api/ingestion-status")
        .await
        .assert_status_not_found();
    h.server.get("/api/network").await.assert_status_not_found();
}

#[tokio::test]
async fn test_ingest_cycle_populates_views() {
    let h = setup().await;

    let response = h.server.post("/api/ingest").await;
    response.assert_status_ok();
    let summary: Value = response.json();
    assert_eq!(summary["seedsCount"], 1);
    assert_eq!(summary["totalPeersObserved"], 2);
    assert_eq!(summary["attempted"], 2);
    assert_eq!(summary["success"], 2);
    assert_eq!(summary["failure"], 0);
    assert_eq!(summary["backedOff"], 0);

    let status: Value = h.server.get("/api/ingestion-status").await.json();
    assert_eq!(status["isRunning"], false);
    assert_eq!(status["observed"], 2);
    assert_eq!(status["success"], 2);
    assert!(status["lastRunFinishedAt"].is_i64());

    let page: Value = h.server.get("/api/pnodes").await.json();
    assert_eq!(page["total"], 2);
    assert_eq!(page["limit"], 50);
    let pnodes = page["pnodes"].as_array().unwrap();
    assert_eq!(pnodes.len(), 2);
    let pk1 = pnodes
        .iter()
        .find(|p| p["pubkey"] == "pk1")
        .expect("pk1 listed");
    assert_eq!(pk1["reachable"], true);
    assert_eq!(pk1["latestAddress"], "127.0.0.1:9000");
    assert_eq!(pk1["latestStats"]["uptimeSeconds"], 7200);
    assert_eq!(pk1["latestCredits"], 1000);
    // Gossip reported a 0-1 ratio; the view serves percent.
    assert_eq!(pk1["storageUsagePercent"], 25.0);

    let network: Value = h.server.get("/api/network").await.json();
    assert_eq!(network["snapshot"]["totalNodes"], 2);
    assert_eq!(network["snapshot"]["reachableNodes"], 2);
    assert_eq!(network["snapshot"]["reachablePercent"], 100.0);
    let versions = network["versionStats"].as_array().unwrap();
    assert_eq!(versions[0]["version"], "0.7.1");
    assert_eq!(versions[0]["nodeCount"], 2);
    assert_eq!(versions[0]["percentage"], 100.0);
    let visibility = network["seedVisibility"].as_array().unwrap();
    assert_eq!(visibility.len(), 1);
    assert_eq!(visibility[0]["freshNodes"], 2);
    assert_eq!(network["timeSeries7d"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_peer_details_endpoint() {
    let h = setup().await;
    h.server.post("/api/ingest").await.assert_status_ok();

    let details: Value = h.server.get("/api/pnodes/pk1/details").await.json();
    assert_eq!(details["nodeMeta"]["pubkey"], "pk1");
    assert_eq!(details["nodeMeta"]["isPublic"], true);
    assert_eq!(details["nodeMeta"]["latestAddress"], "127.0.0.1:9000");
    assert_eq!(details["credits"]["current"], 1000);
    // Only one snapshot so far: no 24h window to diff against.
    assert!(details["credits"]["delta24h"].is_null());
    assert_eq!(details["credits"]["series7d"].as_array().unwrap().len(), 1);
    assert_eq!(details["gossip"]["seedsSeen"], 1);
    assert_eq!(details["storage"]["committed"], 4096);
    assert_eq!(details["uptime"]["timeline"].as_array().unwrap().len(), 1);

    h.server
        .get("/api/pnodes/nope/details")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_second_cycle_backs_off_fresh_peers() {
    let h = setup().await;
    h.server.post("/api/ingest").await.assert_status_ok();

    let response = h.server.post("/api/ingest").await;
    response.assert_status_ok();
    let summary: Value = response.json();
    // Both peers were polled seconds ago; their next slot is a minute out.
    assert_eq!(summary["attempted"], 0);
    assert_eq!(summary["backedOff"], 2);
    assert_eq!(summary["totalPeersObserved"], 2);
}

#[tokio::test]
async fn test_unknown_seed_filter_is_404() {
    let h = setup().await;
    h.server.post("/api/ingest").await.assert_status_ok();
    h.server
        .get("/api/pnodes?seed=http://nope:3000")
        .await
        .assert_status_not_found();
    h.server
        .get("/api/ingestion-status?seed=http://nope:3000")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_seed_scoped_listing_and_status() {
    let h = setup().await;
    h.server.post("/api/ingest").await.assert_status_ok();

    let seed_param = format!("seed={}", h.pod.base_url);
    let page: Value = h
        .server
        .get(&format!("/api/pnodes?{seed_param}"))
        .await
        .json();
    assert_eq!(page["total"], 2);

    let status: Value = h
        .server
        .get(&format!("/api/ingestion-status?{seed_param}"))
        .await
        .json();
    assert_eq!(status["observed"], 2);
}

#[tokio::test]
async fn test_seed_scoped_status_counts_only_that_seed() {
    // Second seed refuses connections, so nothing can be attributed to it.
    let h = setup_with_extra_seeds(&[SeedConfig {
        name: "seed-dead".to_string(),
        base_url: "http://127.0.0.1:1".to_string(),
        enabled: true,
    }])
    .await;
    h.server.post("/api/ingest").await.assert_status_ok();

    let live: Value = h
        .server
        .get(&format!("/api/ingestion-status?seed={}", h.pod.base_url))
        .await
        .json();
    assert_eq!(live["observed"], 2);
    assert_eq!(live["attempted"], 2);
    assert_eq!(live["success"], 2);

    let dead: Value = h
        .server
        .get("/api/ingestion-status?seed=http://127.0.0.1:1")
        .await
        .json();
    assert_eq!(dead["observed"], 0);
    assert_eq!(dead["attempted"], 0);
    assert_eq!(dead["success"], 0);
    assert_eq!(dead["failed"], 0);
}

#[tokio::test]
async fn test_pagination_clamps_limit() {
    let h = setup().await;
    h.server.post("/api/ingest").await.assert_status_ok();

    let page: Value = h.server.get("/api/pnodes?limit=9999&offset=1").await.json();
    assert_eq!(page["limit"], 500);
    assert_eq!(page["offset"], 1);
    assert_eq!(page["pnodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_cycles_single_flight() {
    let h = setup().await;
    // Slow the stats leg down so the second attempt lands mid-cycle.
    h.pod
        .state
        .stats_delay_ms
        .store(200, std::sync::atomic::Ordering::SeqCst);

    let (a, b) = tokio::join!(h.coordinator.run_cycle(), h.coordinator.run_cycle());
    let outcomes = [a.unwrap(), b.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Completed(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::AlreadyRunning))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(skipped, 1);
}
