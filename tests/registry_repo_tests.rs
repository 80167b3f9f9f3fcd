// RegistryRepo tests: seed upsert, peer identity, poll bookkeeping, pagination

use podwatch::config::SeedConfig;
use podwatch::models::PeerEntry;
use podwatch::registry_repo::RegistryRepo;
use podwatch::store;
use podwatch::telemetry_repo::TelemetryRepo;
use tempfile::TempDir;

async fn setup() -> (TempDir, RegistryRepo, TelemetryRepo) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("podwatch.db");
    let pool = store::connect(path.to_str().unwrap(), 5).await.unwrap();
    store::init(&pool).await.unwrap();
    // Second init is no-op (IF NOT EXISTS)
    store::init(&pool).await.unwrap();
    (
        dir,
        RegistryRepo::new(pool.clone()),
        TelemetryRepo::new(pool),
    )
}

fn seed_config(name: &str, base_url: &str, enabled: bool) -> SeedConfig {
    SeedConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        enabled,
    }
}

fn entry(address: &str, pubkey: Option<&str>) -> PeerEntry {
    PeerEntry {
        address: address.to_string(),
        pubkey: pubkey.map(str::to_string),
        version: Some("0.7.1".to_string()),
        last_seen_timestamp: Some(1_700_000_000),
        is_public: Some(true),
        credits: Some(1000),
        storage_committed: Some(1 << 30),
        storage_used: Some(1 << 29),
        storage_usage_percent: Some(50.0),
    }
}

#[tokio::test]
async fn ensure_seeds_upserts_by_base_url() {
    let (_dir, registry, _telemetry) = setup().await;

    let seeds = registry
        .ensure_seeds(&[
            seed_config("a", "http://a:3000", true),
            seed_config("b", "http://b:3000", false),
        ])
        .await
        .unwrap();
    assert_eq!(seeds.len(), 1);
    assert_eq!(seeds[0].base_url, "http://a:3000");

    // Same base_url again with a new name and flipped flag: updated, not duplicated.
    let seeds = registry
        .ensure_seeds(&[seed_config("b-renamed", "http://b:3000", true)])
        .await
        .unwrap();
    assert_eq!(seeds.len(), 2);
    let b = seeds.iter().find(|s| s.base_url == "http://b:3000").unwrap();
    assert_eq!(b.name, "b-renamed");
    assert!(b.enabled);
}

#[tokio::test]
async fn upsert_from_gossip_is_idempotent_per_pubkey() {
    let (_dir, registry, _telemetry) = setup().await;

    let first = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();
    let second = registry.upsert_from_gossip(Some("pk1"), 2000).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.count_peers().await.unwrap(), 1);

    let other = registry.upsert_from_gossip(Some("pk2"), 3000).await.unwrap();
    assert_ne!(first, other);
}

#[tokio::test]
async fn anonymous_peers_always_get_new_rows() {
    let (_dir, registry, _telemetry) = setup().await;

    let a = registry.upsert_from_gossip(None, 1000).await.unwrap();
    let b = registry.upsert_from_gossip(None, 1000).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(registry.count_peers().await.unwrap(), 2);
}

#[tokio::test]
async fn poll_success_resets_failure_streak() {
    let (_dir, registry, _telemetry) = setup().await;
    let id = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();

    registry
        .mark_poll_failure(id, 2000, 62_000, "connect timeout")
        .await
        .unwrap();
    registry
        .mark_poll_failure(id, 3000, 243_000, "connect timeout")
        .await
        .unwrap();
    let peer = registry.peer_by_pubkey("pk1").await.unwrap().unwrap();
    assert!(!peer.reachable);
    assert_eq!(peer.failure_count, 2);
    assert_eq!(peer.last_error.as_deref(), Some("connect timeout"));
    assert_eq!(peer.next_stats_allowed_at, Some(243_000));

    registry.mark_poll_success(id, 4000, 64_000).await.unwrap();
    let peer = registry.peer_by_pubkey("pk1").await.unwrap().unwrap();
    assert!(peer.reachable);
    assert_eq!(peer.failure_count, 0);
    assert_eq!(peer.last_error, None);
    assert_eq!(peer.last_stats_success_at, Some(4000));
    assert_eq!(peer.next_stats_allowed_at, Some(64_000));
}

#[tokio::test]
async fn poll_failure_truncates_long_errors() {
    let (_dir, registry, _telemetry) = setup().await;
    let id = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();

    let long_error = "x".repeat(2000);
    registry
        .mark_poll_failure(id, 2000, 62_000, &long_error)
        .await
        .unwrap();
    let peer = registry.peer_by_pubkey("pk1").await.unwrap().unwrap();
    // 500 chars kept, plus the ellipsis marker.
    let stored = peer.last_error.unwrap();
    assert_eq!(stored.len(), 503);
    assert!(stored.ends_with("..."));
}

#[tokio::test]
async fn update_gossip_fields_only_touches_reported_values() {
    let (_dir, registry, _telemetry) = setup().await;
    let id = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();

    registry
        .update_gossip_fields(id, Some(true), Some(1200), 2000)
        .await
        .unwrap();
    let peer = registry.peer_by_pubkey("pk1").await.unwrap().unwrap();
    assert!(peer.is_public);
    assert_eq!(peer.latest_credits, Some(1200));
    assert_eq!(peer.credits_updated_at, Some(2000));

    // A listing without credits must not clear the stored balance.
    registry
        .update_gossip_fields(id, None, None, 3000)
        .await
        .unwrap();
    let peer = registry.peer_by_pubkey("pk1").await.unwrap().unwrap();
    assert_eq!(peer.latest_credits, Some(1200));
    assert_eq!(peer.credits_updated_at, Some(2000));
}

#[tokio::test]
async fn poll_targets_carry_latest_gossip_address() {
    let (_dir, registry, telemetry) = setup().await;
    let seeds = registry
        .ensure_seeds(&[seed_config("a", "http://a:3000", true)])
        .await
        .unwrap();
    let seed_id = seeds[0].id;

    let id = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();
    telemetry
        .record_observation(id, seed_id, &entry("10.0.0.1:9000", Some("pk1")), 1000)
        .await
        .unwrap();
    telemetry
        .record_observation(id, seed_id, &entry("10.0.0.2:9000", Some("pk1")), 2000)
        .await
        .unwrap();

    // A peer with no observations yet has no address to poll.
    registry.upsert_from_gossip(Some("pk2"), 1000).await.unwrap();

    let targets = registry.poll_targets().await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, id);
    assert_eq!(targets[0].address, "10.0.0.2:9000");
    assert_eq!(targets[0].seed_id, seed_id);
}

#[tokio::test]
async fn peers_page_clamps_and_orders() {
    let (_dir, registry, _telemetry) = setup().await;
    for i in 0..5i64 {
        registry
            .upsert_from_gossip(Some(&format!("pk{i}")), 1000 + i)
            .await
            .unwrap();
    }

    let page = registry.peers_page(2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].pubkey.as_deref(), Some("pk0"));

    let page = registry.peers_page(2, 4).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].pubkey.as_deref(), Some("pk4"));

    assert_eq!(registry.count_peers().await.unwrap(), 5);
}

#[tokio::test]
async fn per_seed_peer_counts_follow_observations() {
    let (_dir, registry, telemetry) = setup().await;
    let seeds = registry
        .ensure_seeds(&[
            seed_config("a", "http://a:3000", true),
            seed_config("b", "http://b:3000", true),
        ])
        .await
        .unwrap();

    let p1 = registry.upsert_from_gossip(Some("pk1"), 1000).await.unwrap();
    let p2 = registry.upsert_from_gossip(Some("pk2"), 1000).await.unwrap();
    telemetry
        .record_observation(p1, seeds[0].id, &entry("10.0.0.1:9000", Some("pk1")), 1000)
        .await
        .unwrap();
    telemetry
        .record_observation(p2, seeds[0].id, &entry("10.0.0.2:9000", Some("pk2")), 1000)
        .await
        .unwrap();
    telemetry
        .record_observation(p1, seeds[1].id, &entry("10.0.0.1:9000", Some("pk1")), 1000)
        .await
        .unwrap();

    assert_eq!(registry.count_peers_for_seed(seeds[0].id).await.unwrap(), 2);
    assert_eq!(registry.count_peers_for_seed(seeds[1].id).await.unwrap(), 1);

    let page = registry
        .peers_page_for_seed(seeds[1].id, 10, 0)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, p1);
}
