use crate::aggregator::MetricsAggregator;
use crate::backoff::{self, BackoffPolicy};
use crate::config::{IngestConfig, SnapshotConfig};
use crate::dispatcher::FetchDispatcher;
use crate::models::RunSummary;
use crate::prpc_client::PrpcClient;
use crate::reconciler::GossipReconciler;
use crate::registry_repo::RegistryRepo;
use crate::models::Seed;
use crate::snapshot_repo::{RunCounters, SnapshotRepo};
use crate::store;
use crate::telemetry_repo::TelemetryRepo;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(RunSummary),
    /// A cycle is already in flight in this process; nothing was started.
    AlreadyRunning,
}

/// Drives one full ingestion cycle: reconcile gossip from every enabled seed,
/// poll stats from eligible peers, then derive and persist the network
/// snapshot. At most one cycle runs at a time per process.
pub struct Coordinator {
    registry: RegistryRepo,
    telemetry: TelemetryRepo,
    snapshots: SnapshotRepo,
    client: PrpcClient,
    policy: BackoffPolicy,
    stats_concurrency: usize,
    stats_port: u16,
    fresh_window_ms: i64,
    cycle_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        registry: RegistryRepo,
        telemetry: TelemetryRepo,
        snapshots: SnapshotRepo,
        client: PrpcClient,
        ingest: &IngestConfig,
        snapshot: &SnapshotConfig,
    ) -> Self {
        Self {
            registry,
            telemetry,
            snapshots,
            client,
            policy: BackoffPolicy::new(ingest.backoff_base_secs, ingest.backoff_cap_exponent),
            stats_concurrency: ingest.stats_concurrency,
            stats_port: ingest.stats_port,
            fresh_window_ms: (snapshot.fresh_window_secs as i64) * 1000,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Runs one cycle end to end, or returns `AlreadyRunning` without touching
    /// the store if another cycle holds the lock. Counters are persisted on the
    /// run row before this returns, so status reads never see a half-run total.
    /// A store error mid-cycle is recorded on the run row, which stays open.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            info!("ingestion cycle already in flight; skipping");
            return Ok(CycleOutcome::AlreadyRunning);
        };

        let started_at = store::now_ms();
        let seeds = self.registry.enabled_seeds().await?;
        if seeds.is_empty() {
            warn!("no enabled seeds configured; nothing to ingest");
        }
        let run_id = self
            .snapshots
            .create_run(started_at, seeds.len() as i64)
            .await?;

        match self.execute_cycle(run_id, &seeds, started_at).await {
            Ok(summary) => {
                info!(
                    run_id,
                    seeds = summary.seeds_count,
                    observed = summary.total_peers_observed,
                    attempted = summary.attempted,
                    success = summary.success,
                    failure = summary.failure,
                    backed_off = summary.backed_off,
                    "ingestion cycle finished"
                );
                Ok(CycleOutcome::Completed(summary))
            }
            Err(e) => {
                if let Err(record_err) = self
                    .snapshots
                    .record_run_error(run_id, &e.to_string())
                    .await
                {
                    warn!(run_id, error = %record_err, "failed to record run error");
                }
                Err(e)
            }
        }
    }

    async fn execute_cycle(
        &self,
        run_id: i64,
        seeds: &[Seed],
        started_at: i64,
    ) -> anyhow::Result<RunSummary> {
        let reconciler = GossipReconciler::new(&self.client, &self.registry, &self.telemetry);
        let reconcile = reconciler.reconcile(seeds, started_at).await?;

        // Partition once against a single clock read so a target cannot flip
        // eligibility mid-cycle.
        let targets = self.registry.poll_targets().await?;
        let eligibility_now = store::now_ms();
        let (eligible, backed_off): (Vec<_>, Vec<_>) = targets
            .into_iter()
            .partition(|t| backoff::is_eligible(t.next_stats_allowed_at, eligibility_now));

        let mut attempted_per_seed: HashMap<i64, i64> = HashMap::new();
        for target in &eligible {
            *attempted_per_seed.entry(target.seed_id).or_insert(0) += 1;
        }
        let mut backed_off_per_seed: HashMap<i64, i64> = HashMap::new();
        for target in &backed_off {
            *backed_off_per_seed.entry(target.seed_id).or_insert(0) += 1;
        }

        let dispatcher = FetchDispatcher::new(
            &self.client,
            &self.registry,
            &self.telemetry,
            self.policy,
            self.stats_concurrency,
            self.stats_port,
        );
        let dispatch = dispatcher.poll(&eligible).await?;

        for seed in &reconcile.seeds {
            let tally = dispatch
                .per_seed
                .get(&seed.seed_id)
                .copied()
                .unwrap_or_default();
            self.snapshots
                .record_run_seed(
                    run_id,
                    seed.seed_id,
                    seed.listing_ok,
                    RunCounters {
                        peers_observed: seed.observed as i64,
                        attempted: attempted_per_seed
                            .get(&seed.seed_id)
                            .copied()
                            .unwrap_or(0),
                        success: tally.success as i64,
                        failure: tally.failure as i64,
                        backed_off: backed_off_per_seed
                            .get(&seed.seed_id)
                            .copied()
                            .unwrap_or(0),
                    },
                )
                .await?;
        }

        let snapshot_now = store::now_ms();
        let aggregator = MetricsAggregator::new(&self.registry, &self.telemetry);
        let snapshot = aggregator
            .network_snapshot(seeds, Some(run_id), snapshot_now, self.fresh_window_ms)
            .await?;
        self.snapshots.save_network_snapshot(&snapshot).await?;

        let summary = RunSummary {
            run_id,
            seeds_count: seeds.len() as u32,
            total_peers_observed: reconcile.total_observed,
            attempted: eligible.len() as u32,
            success: dispatch.success,
            failure: dispatch.failure,
            backed_off: backed_off.len() as u32,
        };
        self.snapshots
            .finish_run(
                run_id,
                store::now_ms(),
                RunCounters {
                    peers_observed: summary.total_peers_observed as i64,
                    attempted: summary.attempted as i64,
                    success: summary.success as i64,
                    failure: summary.failure as i64,
                    backed_off: summary.backed_off as i64,
                },
            )
            .await?;

        Ok(summary)
    }
}
