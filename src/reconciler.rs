// Gossip reconciliation: merge each seed's peer listing into the registry and
// append observation facts. A failing seed is logged and skipped; the cycle
// carries on with the remaining seeds.

use crate::models::Seed;
use crate::prpc_client::PrpcClient;
use crate::registry_repo::RegistryRepo;
use crate::telemetry_repo::TelemetryRepo;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Per-seed result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub seed_id: i64,
    /// Distinct peers this seed reported.
    pub observed: u32,
    pub listing_ok: bool,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Distinct peers across all seeds; a peer visible via N seeds counts once.
    pub total_observed: u32,
    pub seeds: Vec<SeedOutcome>,
}

pub struct GossipReconciler<'a> {
    client: &'a PrpcClient,
    registry: &'a RegistryRepo,
    telemetry: &'a TelemetryRepo,
}

impl<'a> GossipReconciler<'a> {
    pub fn new(
        client: &'a PrpcClient,
        registry: &'a RegistryRepo,
        telemetry: &'a TelemetryRepo,
    ) -> Self {
        Self {
            client,
            registry,
            telemetry,
        }
    }

    /// One discovery pass over the enabled seeds. Listing failures are folded
    /// into the per-seed outcome; only store errors propagate.
    pub async fn reconcile(&self, seeds: &[Seed], now_ms: i64) -> anyhow::Result<ReconcileOutcome> {
        let mut run_peers: HashSet<i64> = HashSet::new();
        let mut outcomes = Vec::with_capacity(seeds.len());

        for seed in seeds {
            let entries = match self.client.list_peers(&seed.base_url).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(seed = %seed.base_url, error = %e, "seed listing failed; skipping for this cycle");
                    outcomes.push(SeedOutcome {
                        seed_id: seed.id,
                        observed: 0,
                        listing_ok: false,
                    });
                    continue;
                }
            };
            debug!(seed = %seed.base_url, peers = entries.len(), "seed listing");

            let mut seed_peers: HashSet<i64> = HashSet::new();
            for entry in &entries {
                let peer_id = self
                    .registry
                    .upsert_from_gossip(entry.pubkey.as_deref(), now_ms)
                    .await?;
                self.registry
                    .update_gossip_fields(peer_id, entry.is_public, entry.credits, now_ms)
                    .await?;
                self.telemetry
                    .record_observation(peer_id, seed.id, entry, now_ms)
                    .await?;
                if let (Some(pubkey), Some(credits)) = (entry.pubkey.as_deref(), entry.credits) {
                    self.telemetry
                        .record_credit_snapshot(pubkey, credits, now_ms)
                        .await?;
                }
                seed_peers.insert(peer_id);
                run_peers.insert(peer_id);
            }

            outcomes.push(SeedOutcome {
                seed_id: seed.id,
                observed: seed_peers.len() as u32,
                listing_ok: true,
            });
        }

        Ok(ReconcileOutcome {
            total_observed: run_peers.len() as u32,
            seeds: outcomes,
        })
    }
}
