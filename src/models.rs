// Domain models: registry rows, append-only facts, derived aggregates, wire shapes.

use serde::{Deserialize, Serialize};

/// One registered peer. At most one row per non-null pubkey; rows without a
/// pubkey are anonymous and never merged with each other.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerNode {
    pub id: i64,
    pub pubkey: Option<String>,
    pub is_public: bool,
    pub reachable: bool,
    pub failure_count: i64,
    pub last_error: Option<String>,
    pub last_stats_attempt_at: Option<i64>,
    pub last_stats_success_at: Option<i64>,
    pub next_stats_allowed_at: Option<i64>,
    pub latest_credits: Option<i64>,
    pub credits_updated_at: Option<i64>,
    pub created_at: i64,
}

/// A configured discovery entry point.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
}

/// Immutable fact: seed reported peer at address/version/last-seen at observed_at (ms).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipObservation {
    pub id: i64,
    pub pnode_id: i64,
    pub seed_id: i64,
    pub address: String,
    pub version: Option<String>,
    /// Peer's self-reported last-seen, epoch seconds.
    pub last_seen_ts: Option<i64>,
    pub storage_committed: Option<i64>,
    pub storage_used: Option<i64>,
    pub storage_usage_percent: Option<f64>,
    pub observed_at: i64,
}

/// Immutable fact: one successful stats poll.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub id: i64,
    pub pnode_id: i64,
    pub seed_id: Option<i64>,
    pub timestamp: i64,
    pub cpu_percent: Option<f64>,
    pub ram_used_bytes: Option<i64>,
    pub ram_total_bytes: Option<i64>,
    pub uptime_seconds: Option<i64>,
    pub packets_in_per_sec: Option<f64>,
    pub packets_out_per_sec: Option<f64>,
    pub active_streams: Option<i64>,
    pub total_bytes: Option<i64>,
    pub total_pages: Option<i64>,
}

/// Immutable fact: credit balance at a point in time, one series per pubkey.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSnapshot {
    pub pubkey: String,
    pub credits: i64,
    pub observed_at: i64,
}

/// Derived network-wide aggregate, persisted once per cycle. Superseded, never overwritten.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub id: i64,
    pub ingestion_run_id: Option<i64>,
    pub created_at: i64,
    pub total_nodes: i64,
    pub reachable_nodes: i64,
    pub unreachable_nodes: i64,
    pub reachable_percent: f64,
    pub median_uptime_seconds: Option<f64>,
    pub p90_uptime_seconds: Option<f64>,
    pub median_credits: Option<f64>,
    pub p90_credits: Option<f64>,
    pub total_storage_committed: i64,
    pub total_storage_used: i64,
    pub nodes_backed_off: i64,
    pub nodes_failing_stats: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStat {
    pub version: String,
    pub node_count: i64,
    #[sqlx(default)]
    pub percentage: f64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedVisibility {
    pub seed_base_url: String,
    pub nodes_seen: i64,
    pub fresh_nodes: i64,
    pub stale_nodes: i64,
    pub offline_nodes: i64,
}

/// One coordinator cycle. `finished_at` stays null while the cycle is in
/// flight; that null-ness is the externally visible "running" signal.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub seeds_count: i64,
    pub peers_observed: i64,
    pub attempted: i64,
    pub success: i64,
    pub failure: i64,
    pub backed_off: i64,
    pub error: Option<String>,
}

/// Run-level counters returned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: i64,
    pub seeds_count: u32,
    pub total_peers_observed: u32,
    pub attempted: u32,
    pub success: u32,
    pub failure: u32,
    pub backed_off: u32,
}

/// Read-only status of the last (or current) run, global or scoped to one seed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub last_run_started_at: Option<i64>,
    pub last_run_finished_at: Option<i64>,
    pub attempted: i64,
    pub success: i64,
    pub backoff: i64,
    pub failed: i64,
    pub observed: i64,
    pub is_running: bool,
}

// ----- wire shapes, decoded once at the pRPC client boundary -----

/// One entry of a seed's peer listing, normalized from the duck-typed wire shape.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerEntry {
    pub address: String,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Epoch seconds, self-reported by the peer.
    #[serde(default)]
    pub last_seen_timestamp: Option<i64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub storage_committed: Option<i64>,
    #[serde(default)]
    pub storage_used: Option<i64>,
    #[serde(default)]
    pub storage_usage_percent: Option<f64>,
}

/// get-stats result payload. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStats {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub uptime_seconds: Option<i64>,
    #[serde(default)]
    pub ram: Option<RamInfo>,
    #[serde(default)]
    pub network: Option<NetworkInfo>,
    #[serde(default)]
    pub storage: Option<StorageInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RamInfo {
    #[serde(default)]
    pub used: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub packets_in_per_sec: Option<f64>,
    #[serde(default)]
    pub packets_out_per_sec: Option<f64>,
    #[serde(default)]
    pub active_streams: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub total_bytes: Option<i64>,
    #[serde(default)]
    pub total_pages: Option<i64>,
}
