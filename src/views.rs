// Read-side assembly for external collaborators (dashboard/API). Everything
// here is read-only over the repos; derived numbers come from the aggregator.

use crate::aggregator::{
    self, MetricsAggregator, ONE_DAY_MS, ONE_HOUR_MS, SIX_HOURS_MS, uptime_continuity,
};
use crate::models::{NetworkSnapshot, PeerNode, RunStatus, SeedVisibility, VersionStat};
use crate::registry_repo::RegistryRepo;
use crate::snapshot_repo::{RunCounters, SnapshotPoint, SnapshotRepo};
use crate::store;
use crate::telemetry_repo::TelemetryRepo;
use serde::Serialize;

// Pagination bounds.
pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;
pub const MIN_LIMIT: i64 = 1;

// Series caps, matching what the dashboard can usefully render.
const MAX_TIME_SERIES_POINTS_7D: i64 = 100;
const MAX_TIME_SERIES_POINTS_20D: i64 = 200;
const MAX_CREDIT_POINTS_7D: i64 = 150;
const MAX_CREDIT_POINTS_20D: i64 = 200;
const MAX_TIMELINE_POINTS: i64 = 50;
const MAX_STORAGE_POINTS: i64 = 50;
const MAX_GAP_SCAN_OBSERVATIONS: i64 = 500;
const MAX_GAPS: usize = 50;

const SEVEN_DAYS_MS: i64 = 7 * ONE_DAY_MS;
const TWENTY_DAYS_MS: i64 = 20 * ONE_DAY_MS;

/// Observation gaps longer than this are reported as outages.
const GAP_THRESHOLD_MS: i64 = ONE_HOUR_MS;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestStatsView {
    pub timestamp: i64,
    pub uptime_seconds: Option<i64>,
    pub packets_in_per_sec: Option<f64>,
    pub packets_out_per_sec: Option<f64>,
    pub total_bytes: Option<i64>,
    pub active_streams: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    pub id: i64,
    pub pubkey: Option<String>,
    pub is_public: bool,
    pub reachable: bool,
    pub failure_count: i64,
    pub last_stats_attempt_at: Option<i64>,
    pub last_stats_success_at: Option<i64>,
    pub latest_address: Option<String>,
    pub latest_version: Option<String>,
    pub gossip_last_seen: Option<i64>,
    pub seed_base_urls_seen: Vec<String>,
    pub seeds_seen_count: usize,
    pub latest_stats: Option<LatestStatsView>,
    pub storage_usage_percent: Option<f64>,
    pub storage_committed: Option<i64>,
    pub latest_credits: Option<i64>,
    pub credits_updated_at: Option<i64>,
    pub credit_delta_24h: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerViewPage {
    pub pnodes: Vec<PeerView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsStatView {
    pub median_credits: Option<f64>,
    pub p90_credits: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkView {
    pub snapshot: NetworkSnapshot,
    pub version_stats: Vec<VersionStat>,
    pub seed_visibility: Vec<SeedVisibility>,
    pub credits_stat: CreditsStatView,
    pub time_series_7d: Vec<SnapshotPoint>,
    pub time_series_20d: Vec<SnapshotPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPoint {
    pub timestamp: i64,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsDetail {
    pub current: Option<i64>,
    pub delta_24h: Option<i64>,
    pub series_7d: Vec<CreditPoint>,
    pub series_20d: Vec<CreditPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityDetail {
    pub h1: f64,
    pub h6: f64,
    pub h24: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub timestamp: i64,
    pub has_stats: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeDetail {
    pub continuity: ContinuityDetail,
    pub timeline: Vec<TimelinePoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMark {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRateDetail {
    pub rate_24h: f64,
    pub failures: Vec<FailureMark>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoint {
    pub timestamp: i64,
    pub used: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDetail {
    pub committed: Option<i64>,
    pub used: Option<i64>,
    pub used_percent: Option<f64>,
    pub history: Vec<StoragePoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipGap {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipDetail {
    pub seeds_seen: i64,
    pub seed_total: i64,
    pub gaps: Vec<GossipGap>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMeta {
    pub pubkey: Option<String>,
    pub version: Option<String>,
    pub is_public: bool,
    pub latest_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDetails {
    pub node_meta: NodeMeta,
    pub credits: CreditsDetail,
    pub uptime: UptimeDetail,
    pub success_rate: SuccessRateDetail,
    pub storage: StorageDetail,
    pub gossip: GossipDetail,
}

#[derive(Clone)]
pub struct Views {
    registry: RegistryRepo,
    telemetry: TelemetryRepo,
    snapshots: SnapshotRepo,
}

impl Views {
    pub fn new(registry: RegistryRepo, telemetry: TelemetryRepo, snapshots: SnapshotRepo) -> Self {
        Self {
            registry,
            telemetry,
            snapshots,
        }
    }

    /// Status of the last (or in-flight) run, optionally scoped to one seed.
    /// With a seed filter every counter is that seed's own slice of the run.
    /// `is_running` is derived purely from the persisted finished_at null-ness.
    pub async fn run_status(
        &self,
        seed_base_url: Option<&str>,
    ) -> anyhow::Result<Option<RunStatus>> {
        let scoped = match seed_base_url {
            Some(url) => {
                let Some(seed) = self.registry.seed_by_base_url(url).await? else {
                    return Ok(None);
                };
                self.snapshots.latest_run_for_seed(seed.id).await?
            }
            None => self.snapshots.latest_run().await?.map(|run| {
                let counters = RunCounters {
                    peers_observed: run.peers_observed,
                    attempted: run.attempted,
                    success: run.success,
                    failure: run.failure,
                    backed_off: run.backed_off,
                };
                (run, counters)
            }),
        };
        let Some((run, counters)) = scoped else {
            return Ok(None);
        };
        Ok(Some(RunStatus {
            last_run_started_at: Some(run.started_at),
            last_run_finished_at: run.finished_at,
            attempted: counters.attempted,
            success: counters.success,
            backoff: counters.backed_off,
            failed: counters.failure,
            observed: counters.peers_observed,
            is_running: run.finished_at.is_none(),
        }))
    }

    /// Paginated global (or per-seed) peer listing with the latest sample and
    /// derived fields; credit deltas are pre-computed in two bulk queries.
    pub async fn peer_view(
        &self,
        limit: i64,
        offset: i64,
        seed_base_url: Option<&str>,
    ) -> anyhow::Result<Option<PeerViewPage>> {
        let limit = limit.clamp(MIN_LIMIT, MAX_LIMIT);
        let offset = offset.max(0);
        let now = store::now_ms();

        let seed = match seed_base_url {
            Some(url) => match self.registry.seed_by_base_url(url).await? {
                Some(seed) => Some(seed),
                None => return Ok(None),
            },
            None => None,
        };

        let (total, peers) = match &seed {
            Some(seed) => (
                self.registry.count_peers_for_seed(seed.id).await?,
                self.registry
                    .peers_page_for_seed(seed.id, limit, offset)
                    .await?,
            ),
            None => (
                self.registry.count_peers().await?,
                self.registry.peers_page(limit, offset).await?,
            ),
        };

        let peer_ids: Vec<i64> = peers.iter().map(|p| p.id).collect();
        let observations = match &seed {
            Some(seed) => {
                self.telemetry
                    .latest_observations_for_seed(&peer_ids, seed.id)
                    .await?
            }
            None => self.telemetry.latest_observations(&peer_ids).await?,
        };
        let samples = self.telemetry.latest_samples(&peer_ids).await?;
        let seed_urls = self.telemetry.seed_urls_per_peer(&peer_ids).await?;

        let pubkeys: Vec<String> = peers.iter().filter_map(|p| p.pubkey.clone()).collect();
        let aggregator = MetricsAggregator::new(&self.registry, &self.telemetry);
        let deltas = aggregator
            .credit_deltas(&pubkeys, now, ONE_DAY_MS)
            .await?;

        let pnodes = peers
            .into_iter()
            .map(|peer| {
                let obs = observations.get(&peer.id);
                let sample = samples.get(&peer.id);
                let urls = seed_urls.get(&peer.id).cloned().unwrap_or_default();
                let delta = peer
                    .pubkey
                    .as_ref()
                    .and_then(|pk| deltas.get(pk))
                    .copied();

                let gossip_last_seen = obs.map(|o| {
                    o.last_seen_ts
                        .map(|t| t * 1000)
                        .unwrap_or(o.observed_at)
                });

                PeerView {
                    id: peer.id,
                    pubkey: peer.pubkey.clone(),
                    is_public: peer.is_public,
                    reachable: peer.reachable,
                    failure_count: peer.failure_count,
                    last_stats_attempt_at: peer.last_stats_attempt_at,
                    last_stats_success_at: peer.last_stats_success_at,
                    latest_address: obs.map(|o| o.address.clone()),
                    latest_version: obs.and_then(|o| o.version.clone()),
                    gossip_last_seen,
                    seeds_seen_count: urls.len(),
                    seed_base_urls_seen: urls,
                    latest_stats: sample.map(|s| LatestStatsView {
                        timestamp: s.timestamp,
                        uptime_seconds: s.uptime_seconds,
                        packets_in_per_sec: s.packets_in_per_sec,
                        packets_out_per_sec: s.packets_out_per_sec,
                        total_bytes: s.total_bytes,
                        active_streams: s.active_streams,
                    }),
                    storage_usage_percent: obs
                        .and_then(|o| o.storage_usage_percent)
                        .map(normalize_usage_percent),
                    storage_committed: obs.and_then(|o| o.storage_committed),
                    latest_credits: peer.latest_credits,
                    credits_updated_at: peer.credits_updated_at,
                    credit_delta_24h: delta,
                }
            })
            .collect();

        Ok(Some(PeerViewPage {
            pnodes,
            total,
            limit,
            offset,
        }))
    }

    /// Latest persisted network snapshot plus bounded trend series.
    pub async fn network_view(&self) -> anyhow::Result<Option<NetworkView>> {
        let Some(snapshot) = self.snapshots.latest_network_snapshot().await? else {
            return Ok(None);
        };

        let mut version_stats = self.snapshots.version_stats(snapshot.id).await?;
        for vs in &mut version_stats {
            vs.percentage = if snapshot.total_nodes > 0 {
                (vs.node_count as f64 / snapshot.total_nodes as f64) * 100.0
            } else {
                0.0
            };
        }
        let seed_visibility = self.snapshots.seed_visibility(snapshot.id).await?;

        let now = store::now_ms();
        let time_series_7d = self
            .snapshots
            .snapshot_series(now - SEVEN_DAYS_MS, MAX_TIME_SERIES_POINTS_7D)
            .await?;
        let time_series_20d = self
            .snapshots
            .snapshot_series(now - TWENTY_DAYS_MS, MAX_TIME_SERIES_POINTS_20D)
            .await?;

        let credits_stat = CreditsStatView {
            median_credits: snapshot.median_credits,
            p90_credits: snapshot.p90_credits,
        };

        Ok(Some(NetworkView {
            snapshot,
            version_stats,
            seed_visibility,
            credits_stat,
            time_series_7d,
            time_series_20d,
        }))
    }

    /// Single-peer deep view: credit series, continuity, success rate,
    /// storage history, gossip participation and gaps.
    pub async fn peer_details(&self, pubkey: &str) -> anyhow::Result<Option<PeerDetails>> {
        let Some(peer) = self.registry.peer_by_pubkey(pubkey).await? else {
            return Ok(None);
        };
        let now = store::now_ms();

        let observations = self.telemetry.latest_observations(&[peer.id]).await?;
        let latest_obs = observations.get(&peer.id);

        let node_meta = NodeMeta {
            pubkey: peer.pubkey.clone(),
            version: latest_obs.and_then(|o| o.version.clone()),
            is_public: peer.is_public,
            latest_address: latest_obs.map(|o| o.address.clone()),
        };

        let credits = self.credits_detail(&peer, pubkey, now).await?;
        let uptime = self.uptime_detail(peer.id, now).await?;
        let success_rate = self.success_rate_detail(&peer, now).await?;
        let storage = self.storage_detail(&peer, latest_obs, now).await?;
        let gossip = self.gossip_detail(peer.id, now).await?;

        Ok(Some(PeerDetails {
            node_meta,
            credits,
            uptime,
            success_rate,
            storage,
            gossip,
        }))
    }

    async fn credits_detail(
        &self,
        peer: &PeerNode,
        pubkey: &str,
        now: i64,
    ) -> anyhow::Result<CreditsDetail> {
        let series_7d = self
            .telemetry
            .credit_series(pubkey, now - SEVEN_DAYS_MS, MAX_CREDIT_POINTS_7D)
            .await?;
        let series_20d = self
            .telemetry
            .credit_series(pubkey, now - TWENTY_DAYS_MS, MAX_CREDIT_POINTS_20D)
            .await?;

        let latest = self.telemetry.latest_credit(pubkey).await?;
        let at_cutoff = self
            .telemetry
            .credit_at_or_before(pubkey, now - ONE_DAY_MS)
            .await?;

        // Prefer the denormalized balance (updated every cycle), then the series.
        let current = peer.latest_credits.or(latest.as_ref().map(|s| s.credits));

        // If the window row is also the newest row, the peer has no snapshot
        // inside the window; fall back to the next older one.
        let windowed = match (&at_cutoff, &latest) {
            (Some(cutoff_snap), Some(latest_snap))
                if cutoff_snap.observed_at == latest_snap.observed_at =>
            {
                self.telemetry
                    .credit_before(pubkey, cutoff_snap.observed_at)
                    .await?
            }
            _ => at_cutoff,
        };

        let delta_24h = match (current, windowed) {
            (Some(current), Some(windowed)) => Some(current - windowed.credits),
            _ => None,
        };

        Ok(CreditsDetail {
            current,
            delta_24h,
            series_7d: series_7d
                .into_iter()
                .map(|s| CreditPoint {
                    timestamp: s.observed_at,
                    credits: s.credits,
                })
                .collect(),
            series_20d: series_20d
                .into_iter()
                .map(|s| CreditPoint {
                    timestamp: s.observed_at,
                    credits: s.credits,
                })
                .collect(),
        })
    }

    async fn uptime_detail(&self, peer_id: i64, now: i64) -> anyhow::Result<UptimeDetail> {
        let w1 = self.telemetry.sample_window(peer_id, now - ONE_HOUR_MS).await?;
        let w6 = self
            .telemetry
            .sample_window(peer_id, now - SIX_HOURS_MS)
            .await?;
        let w24 = self.telemetry.sample_window(peer_id, now - ONE_DAY_MS).await?;

        let timeline = self
            .telemetry
            .sample_timestamps(peer_id, now - ONE_DAY_MS, MAX_TIMELINE_POINTS)
            .await?
            .into_iter()
            .map(|timestamp| TimelinePoint {
                timestamp,
                has_stats: true,
            })
            .collect();

        Ok(UptimeDetail {
            continuity: ContinuityDetail {
                h1: uptime_continuity(&w1, ONE_HOUR_MS),
                h6: uptime_continuity(&w6, SIX_HOURS_MS),
                h24: uptime_continuity(&w24, ONE_DAY_MS),
            },
            timeline,
        })
    }

    async fn success_rate_detail(
        &self,
        peer: &PeerNode,
        now: i64,
    ) -> anyhow::Result<SuccessRateDetail> {
        let window = self.telemetry.sample_window(peer.id, now - ONE_DAY_MS).await?;
        let rate_24h = aggregator::success_rate(peer.is_public, window.count, peer.failure_count);
        let failures = if peer.failure_count > 0 {
            vec![FailureMark {
                timestamp: peer.last_stats_attempt_at.unwrap_or(now),
            }]
        } else {
            Vec::new()
        };
        Ok(SuccessRateDetail { rate_24h, failures })
    }

    async fn storage_detail(
        &self,
        peer: &PeerNode,
        latest_obs: Option<&crate::models::GossipObservation>,
        now: i64,
    ) -> anyhow::Result<StorageDetail> {
        let samples = self.telemetry.latest_samples(&[peer.id]).await?;
        let latest_sample = samples.get(&peer.id);

        // Gossip carries the authoritative committed/used figures; the sample's
        // total_bytes is the fallback when a peer gossips no storage block.
        let committed = latest_obs
            .and_then(|o| o.storage_committed)
            .or(latest_sample.and_then(|s| s.total_bytes));
        let used = latest_obs
            .and_then(|o| o.storage_used)
            .or(latest_sample.and_then(|s| s.total_bytes));
        let used_percent = latest_obs
            .and_then(|o| o.storage_usage_percent)
            .map(normalize_usage_percent);

        let history = self
            .telemetry
            .storage_history(peer.id, now - SEVEN_DAYS_MS, MAX_STORAGE_POINTS)
            .await?
            .into_iter()
            .map(|(timestamp, used)| StoragePoint { timestamp, used })
            .collect();

        Ok(StorageDetail {
            committed,
            used,
            used_percent,
            history,
        })
    }

    async fn gossip_detail(&self, peer_id: i64, now: i64) -> anyhow::Result<GossipDetail> {
        let seeds_seen = self.telemetry.count_seeds_seeing_peer(peer_id).await?;
        let seed_total = self.telemetry.count_seeds_with_observations().await?;

        let times = self
            .telemetry
            .observation_times(peer_id, now - SEVEN_DAYS_MS, MAX_GAP_SCAN_OBSERVATIONS)
            .await?;
        let mut gaps = Vec::new();
        for pair in times.windows(2) {
            if pair[1] - pair[0] > GAP_THRESHOLD_MS {
                gaps.push(GossipGap {
                    start: pair[0],
                    end: pair[1],
                });
            }
            if gaps.len() >= MAX_GAPS {
                break;
            }
        }

        Ok(GossipDetail {
            seeds_seen,
            seed_total,
            gaps,
        })
    }
}

/// The wire reports usage as either a 0-1 ratio or a 0-100 percentage.
fn normalize_usage_percent(value: f64) -> f64 {
    if value > 1.0 { value } else { value * 100.0 }
}
