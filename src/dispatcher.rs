// Stats polling under a hard concurrency ceiling. Peers are processed in
// fixed-size batches; one slow or dead peer holds one slot, never the batch.

use crate::backoff::BackoffPolicy;
use crate::prpc_client::PrpcClient;
use crate::registry_repo::{PollTarget, RegistryRepo};
use crate::store;
use crate::telemetry_repo::TelemetryRepo;
use futures_util::future::join_all;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Success/failure counts attributed to one seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedTally {
    pub success: u32,
    pub failure: u32,
}

/// Aggregate counts for one dispatch pass, total and per seed. A poll counts
/// against the seed whose listing supplied the target's address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: u32,
    pub failure: u32,
    pub per_seed: HashMap<i64, SeedTally>,
}

pub struct FetchDispatcher<'a> {
    client: &'a PrpcClient,
    registry: &'a RegistryRepo,
    telemetry: &'a TelemetryRepo,
    policy: BackoffPolicy,
    concurrency: usize,
    stats_port: u16,
}

impl<'a> FetchDispatcher<'a> {
    pub fn new(
        client: &'a PrpcClient,
        registry: &'a RegistryRepo,
        telemetry: &'a TelemetryRepo,
        policy: BackoffPolicy,
        concurrency: usize,
        stats_port: u16,
    ) -> Self {
        Self {
            client,
            registry,
            telemetry,
            policy,
            concurrency: concurrency.max(1),
            stats_port,
        }
    }

    /// Poll every target, at most `concurrency` in flight at once. Per-peer
    /// failures are recorded and counted; only store errors are fatal.
    pub async fn poll(&self, targets: &[PollTarget]) -> anyhow::Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();
        for batch in targets.chunks(self.concurrency) {
            let results = join_all(batch.iter().map(|t| self.poll_one(t))).await;
            for (target, result) in batch.iter().zip(results) {
                let tally = outcome.per_seed.entry(target.seed_id).or_default();
                if result? {
                    tally.success += 1;
                    outcome.success += 1;
                } else {
                    tally.failure += 1;
                    outcome.failure += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// One peer: stats endpoint is the gossip host on the fixed stats port
    /// (the gossip-reported port is deliberately ignored).
    async fn poll_one(&self, target: &PollTarget) -> anyhow::Result<bool> {
        let endpoint = stats_endpoint(&target.address, self.stats_port);
        debug!(peer = target.id, endpoint = %endpoint, "fetching stats");

        let now = store::now_ms();
        match self.client.get_stats(&endpoint).await {
            Ok(stats) => {
                self.registry
                    .mark_poll_success(target.id, now, self.policy.next_after_success(now))
                    .await?;
                self.telemetry
                    .record_sample(target.id, Some(target.seed_id), &stats, now)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                let new_failure_count = (target.failure_count as u32).saturating_add(1);
                let next_allowed = self.policy.next_after_failure(new_failure_count, now);
                warn!(
                    peer = target.id,
                    address = %target.address,
                    failure_count = new_failure_count,
                    error = %e,
                    "stats poll failed"
                );
                self.registry
                    .mark_poll_failure(target.id, now, next_allowed, &e.to_string())
                    .await?;
                Ok(false)
            }
        }
    }
}

/// Same host as the gossip address, well-known stats port.
fn stats_endpoint(gossip_address: &str, stats_port: u16) -> String {
    let host = gossip_address.split(':').next().unwrap_or(gossip_address);
    format!("http://{}:{}", host, stats_port)
}
