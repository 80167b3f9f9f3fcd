// Derived metrics over the append-only history. Reads only; never mutates
// registry state. Persisting the computed snapshot belongs to SnapshotRepo.

use crate::models::{Seed, SeedVisibility};
use crate::registry_repo::RegistryRepo;
use crate::snapshot_repo::NewNetworkSnapshot;
use crate::telemetry_repo::{SampleWindow, TelemetryRepo};
use std::collections::{BTreeMap, HashMap};

pub const ONE_HOUR_MS: i64 = 3_600_000;
pub const SIX_HOURS_MS: i64 = 6 * ONE_HOUR_MS;
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;

/// Version bucket for peers whose gossip entries carry no version string.
const UNKNOWN_VERSION: &str = "unknown";

pub struct MetricsAggregator<'a> {
    registry: &'a RegistryRepo,
    telemetry: &'a TelemetryRepo,
}

impl<'a> MetricsAggregator<'a> {
    pub fn new(registry: &'a RegistryRepo, telemetry: &'a TelemetryRepo) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// Trailing credit deltas for a batch of pubkeys in two bulk queries:
    /// latest snapshot, and most recent snapshot at or before (now - window).
    /// Delta is defined only when both exist.
    pub async fn credit_deltas(
        &self,
        pubkeys: &[String],
        now_ms: i64,
        window_ms: i64,
    ) -> anyhow::Result<HashMap<String, i64>> {
        let latest = self.telemetry.latest_credits_batch(pubkeys).await?;
        let windowed = self
            .telemetry
            .credits_at_or_before_batch(pubkeys, now_ms - window_ms)
            .await?;

        let mut deltas = HashMap::new();
        for pubkey in pubkeys {
            if let (Some(latest), Some(windowed)) = (latest.get(pubkey), windowed.get(pubkey)) {
                deltas.insert(pubkey.clone(), latest - windowed);
            }
        }
        Ok(deltas)
    }

    /// Network-wide aggregate for one point in time. The caller persists it.
    pub async fn network_snapshot(
        &self,
        seeds: &[Seed],
        run_id: Option<i64>,
        now_ms: i64,
        fresh_window_ms: i64,
    ) -> anyhow::Result<NewNetworkSnapshot> {
        let peers = self.registry.all_peers().await?;
        let latest_observations = self.telemetry.latest_observation_per_peer().await?;
        let latest_samples = self.telemetry.latest_sample_per_peer().await?;
        let seed_last_seen = self.telemetry.last_seen_per_seed_peer().await?;

        let total_nodes = peers.len() as i64;
        let reachable_nodes = peers.iter().filter(|p| p.reachable).count() as i64;
        let unreachable_nodes = total_nodes - reachable_nodes;
        let reachable_percent = if total_nodes > 0 {
            (reachable_nodes as f64 / total_nodes as f64) * 100.0
        } else {
            0.0
        };
        let nodes_backed_off = peers
            .iter()
            .filter(|p| p.next_stats_allowed_at.is_some_and(|t| t > now_ms))
            .count() as i64;
        let nodes_failing_stats = peers.iter().filter(|p| p.failure_count > 0).count() as i64;

        let mut uptimes: Vec<f64> = latest_samples
            .iter()
            .filter_map(|s| s.uptime_seconds)
            .map(|u| u as f64)
            .collect();
        uptimes.sort_by(f64::total_cmp);

        let mut credits: Vec<f64> = peers
            .iter()
            .filter_map(|p| p.latest_credits)
            .map(|c| c as f64)
            .collect();
        credits.sort_by(f64::total_cmp);

        // Version distribution and storage totals both come from the latest
        // observation per peer, so stale listings don't double-count.
        let mut version_counts: BTreeMap<String, i64> = BTreeMap::new();
        let mut total_storage_committed: i64 = 0;
        let mut total_storage_used: i64 = 0;
        for obs in &latest_observations {
            let version = obs
                .version
                .clone()
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            *version_counts.entry(version).or_insert(0) += 1;
            total_storage_committed += obs.storage_committed.unwrap_or(0);
            total_storage_used += obs.storage_used.unwrap_or(0);
        }
        let mut version_stats: Vec<(String, i64)> = version_counts.into_iter().collect();
        version_stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let seed_visibility =
            seed_visibility_buckets(seeds, &seed_last_seen, total_nodes, now_ms, fresh_window_ms);

        Ok(NewNetworkSnapshot {
            ingestion_run_id: run_id,
            created_at: now_ms,
            total_nodes,
            reachable_nodes,
            unreachable_nodes,
            reachable_percent,
            median_uptime_seconds: percentile(&uptimes, 0.5),
            p90_uptime_seconds: percentile(&uptimes, 0.9),
            median_credits: percentile(&credits, 0.5),
            p90_credits: percentile(&credits, 0.9),
            total_storage_committed,
            total_storage_used,
            nodes_backed_off,
            nodes_failing_stats,
            version_stats,
            seed_visibility,
        })
    }
}

/// Fresh/stale/offline buckets per seed. Fresh: latest observation within the
/// window. Stale: observed by this seed, but not within the window. Offline:
/// registered peers this seed has never reported.
pub fn seed_visibility_buckets(
    seeds: &[Seed],
    seed_last_seen: &[(i64, i64, i64)],
    total_nodes: i64,
    now_ms: i64,
    fresh_window_ms: i64,
) -> Vec<SeedVisibility> {
    let cutoff = now_ms - fresh_window_ms;
    let mut out = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let mut fresh = 0i64;
        let mut stale = 0i64;
        for (seed_id, _peer_id, last_at) in seed_last_seen {
            if *seed_id != seed.id {
                continue;
            }
            if *last_at >= cutoff {
                fresh += 1;
            } else {
                stale += 1;
            }
        }
        let nodes_seen = fresh + stale;
        out.push(SeedVisibility {
            seed_base_url: seed.base_url.clone(),
            nodes_seen,
            fresh_nodes: fresh,
            stale_nodes: stale,
            offline_nodes: (total_nodes - nodes_seen).max(0),
        });
    }
    out
}

/// Polling continuity: how much of the window the sample span actually covers.
/// A proxy for uptime that doesn't trust the peer's self-reported figure.
pub fn uptime_continuity(window: &SampleWindow, window_ms: i64) -> f64 {
    let (Some(first), Some(last)) = (window.first_ts, window.last_ts) else {
        return 0.0;
    };
    if window_ms <= 0 {
        return 0.0;
    }
    let span = (last - first) as f64;
    (span / window_ms as f64 * 100.0).min(100.0)
}

/// Success-rate approximation from available counters: successful samples in
/// the window vs. those plus the current failure streak. Zero for peers that
/// are not publicly reachable or had no attempts.
pub fn success_rate(is_public: bool, attempts_24h: i64, failure_count: i64) -> f64 {
    if !is_public || attempts_24h == 0 {
        return 0.0;
    }
    let denominator = (attempts_24h + failure_count).max(1) as f64;
    ((attempts_24h as f64 / denominator) * 100.0).min(100.0)
}

/// Linear-interpolated percentile over an ascending-sorted slice. None when empty.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
