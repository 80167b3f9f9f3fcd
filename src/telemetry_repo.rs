// Append-only observation history: gossip observations, stats samples, credit
// snapshots. Reads are bulk-first (one query per batch, not per peer).

use crate::models::{CreditSnapshot, GossipObservation, NodeStats, PeerEntry, StatsSample};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::instrument;

/// COUNT/MIN/MAX of samples inside one trailing window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleWindow {
    pub count: i64,
    pub first_ts: Option<i64>,
    pub last_ts: Option<i64>,
}

#[derive(Clone)]
pub struct TelemetryRepo {
    pool: SqlitePool,
}

impl TelemetryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, entry), fields(repo = "telemetry", operation = "record_observation"))]
    pub async fn record_observation(
        &self,
        peer_id: i64,
        seed_id: i64,
        entry: &PeerEntry,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO gossip_observations
                 (pnode_id, seed_id, address, version, last_seen_ts,
                  storage_committed, storage_used, storage_usage_percent, observed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(peer_id)
        .bind(seed_id)
        .bind(&entry.address)
        .bind(&entry.version)
        .bind(entry.last_seen_timestamp)
        .bind(entry.storage_committed)
        .bind(entry.storage_used)
        .bind(entry.storage_usage_percent)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, stats), fields(repo = "telemetry", operation = "record_sample"))]
    pub async fn record_sample(
        &self,
        peer_id: i64,
        seed_id: Option<i64>,
        stats: &NodeStats,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        let ram = stats.ram.clone().unwrap_or_default();
        let network = stats.network.clone().unwrap_or_default();
        let storage = stats.storage.clone().unwrap_or_default();
        sqlx::query(
            "INSERT INTO stats_samples
                 (pnode_id, seed_id, timestamp, cpu_percent, ram_used_bytes, ram_total_bytes,
                  uptime_seconds, packets_in_per_sec, packets_out_per_sec, active_streams,
                  total_bytes, total_pages)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(peer_id)
        .bind(seed_id)
        .bind(now_ms)
        .bind(stats.cpu_percent)
        .bind(ram.used)
        .bind(ram.total)
        .bind(stats.uptime_seconds)
        .bind(network.packets_in_per_sec)
        .bind(network.packets_out_per_sec)
        .bind(network.active_streams)
        .bind(storage.total_bytes)
        .bind(storage.total_pages)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_credit_snapshot(
        &self,
        pubkey: &str,
        credits: i64,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO credit_snapshots (pubkey, credits, observed_at) VALUES ($1, $2, $3)")
            .bind(pubkey)
            .bind(credits)
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Latest observation per peer across the whole registry, one query.
    pub async fn latest_observation_per_peer(&self) -> anyhow::Result<Vec<GossipObservation>> {
        let rows = sqlx::query_as::<_, GossipObservation>(
            r#"
            SELECT * FROM gossip_observations g
            WHERE g.id = (
                SELECT id FROM gossip_observations
                WHERE pnode_id = g.pnode_id
                ORDER BY observed_at DESC, id DESC LIMIT 1
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Latest observation for each listed peer, keyed by peer id.
    pub async fn latest_observations(
        &self,
        peer_ids: &[i64],
    ) -> anyhow::Result<HashMap<i64, GossipObservation>> {
        if peer_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT * FROM gossip_observations g WHERE g.pnode_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in peer_ids {
            sep.push_bind(*id);
        }
        qb.push(
            ") AND g.id = (SELECT id FROM gossip_observations \
             WHERE pnode_id = g.pnode_id ORDER BY observed_at DESC, id DESC LIMIT 1)",
        );
        let rows = qb
            .build_query_as::<GossipObservation>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|o| (o.pnode_id, o)).collect())
    }

    /// Latest observation from one specific seed for each listed peer.
    pub async fn latest_observations_for_seed(
        &self,
        peer_ids: &[i64],
        seed_id: i64,
    ) -> anyhow::Result<HashMap<i64, GossipObservation>> {
        if peer_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT * FROM gossip_observations g WHERE g.pnode_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in peer_ids {
            sep.push_bind(*id);
        }
        qb.push(") AND g.seed_id = ");
        qb.push_bind(seed_id);
        qb.push(
            " AND g.id = (SELECT id FROM gossip_observations \
             WHERE pnode_id = g.pnode_id AND seed_id = g.seed_id \
             ORDER BY observed_at DESC, id DESC LIMIT 1)",
        );
        let rows = qb
            .build_query_as::<GossipObservation>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|o| (o.pnode_id, o)).collect())
    }

    /// Latest stats sample for each listed peer, keyed by peer id.
    pub async fn latest_samples(
        &self,
        peer_ids: &[i64],
    ) -> anyhow::Result<HashMap<i64, StatsSample>> {
        if peer_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM stats_samples s WHERE s.pnode_id IN (");
        let mut sep = qb.separated(", ");
        for id in peer_ids {
            sep.push_bind(*id);
        }
        qb.push(
            ") AND s.id = (SELECT id FROM stats_samples \
             WHERE pnode_id = s.pnode_id ORDER BY timestamp DESC, id DESC LIMIT 1)",
        );
        let rows = qb
            .build_query_as::<StatsSample>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|s| (s.pnode_id, s)).collect())
    }

    pub async fn latest_sample_per_peer(&self) -> anyhow::Result<Vec<StatsSample>> {
        let rows = sqlx::query_as::<_, StatsSample>(
            r#"
            SELECT * FROM stats_samples s
            WHERE s.id = (
                SELECT id FROM stats_samples
                WHERE pnode_id = s.pnode_id
                ORDER BY timestamp DESC, id DESC LIMIT 1
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct seed base URLs that have ever reported each listed peer.
    pub async fn seed_urls_per_peer(
        &self,
        peer_ids: &[i64],
    ) -> anyhow::Result<HashMap<i64, Vec<String>>> {
        if peer_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT g.pnode_id, s.base_url FROM gossip_observations g \
             JOIN seeds s ON s.id = g.seed_id WHERE g.pnode_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in peer_ids {
            sep.push_bind(*id);
        }
        qb.push(") ORDER BY g.pnode_id, s.base_url");
        let rows = qb
            .build_query_as::<(i64, String)>()
            .fetch_all(&self.pool)
            .await?;
        let mut out: HashMap<i64, Vec<String>> = HashMap::new();
        for (peer_id, base_url) in rows {
            out.entry(peer_id).or_default().push(base_url);
        }
        Ok(out)
    }

    /// Latest (seed, peer, observed_at) triple per pair, for seed visibility buckets.
    pub async fn last_seen_per_seed_peer(&self) -> anyhow::Result<Vec<(i64, i64, i64)>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT seed_id, pnode_id, MAX(observed_at) FROM gossip_observations
             GROUP BY seed_id, pnode_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent credit snapshot per pubkey, one bulk query.
    pub async fn latest_credits_batch(
        &self,
        pubkeys: &[String],
    ) -> anyhow::Result<HashMap<String, i64>> {
        if pubkeys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.pubkey, c.credits FROM credit_snapshots c WHERE c.pubkey IN (",
        );
        let mut sep = qb.separated(", ");
        for pk in pubkeys {
            sep.push_bind(pk);
        }
        qb.push(
            ") AND c.id = (SELECT id FROM credit_snapshots \
             WHERE pubkey = c.pubkey ORDER BY observed_at DESC, id DESC LIMIT 1)",
        );
        let rows = qb
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    /// Most recent credit snapshot at or before `cutoff_ms` per pubkey, one bulk query.
    pub async fn credits_at_or_before_batch(
        &self,
        pubkeys: &[String],
        cutoff_ms: i64,
    ) -> anyhow::Result<HashMap<String, i64>> {
        if pubkeys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.pubkey, c.credits FROM credit_snapshots c WHERE c.pubkey IN (",
        );
        let mut sep = qb.separated(", ");
        for pk in pubkeys {
            sep.push_bind(pk);
        }
        qb.push(
            ") AND c.id = (SELECT id FROM credit_snapshots \
             WHERE pubkey = c.pubkey AND observed_at <= ",
        );
        qb.push_bind(cutoff_ms);
        qb.push(" ORDER BY observed_at DESC, id DESC LIMIT 1)");
        let rows = qb
            .build_query_as::<(String, i64)>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn latest_credit(&self, pubkey: &str) -> anyhow::Result<Option<CreditSnapshot>> {
        let row = sqlx::query_as::<_, CreditSnapshot>(
            "SELECT pubkey, credits, observed_at FROM credit_snapshots
             WHERE pubkey = $1 ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(pubkey)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn credit_at_or_before(
        &self,
        pubkey: &str,
        cutoff_ms: i64,
    ) -> anyhow::Result<Option<CreditSnapshot>> {
        let row = sqlx::query_as::<_, CreditSnapshot>(
            "SELECT pubkey, credits, observed_at FROM credit_snapshots
             WHERE pubkey = $1 AND observed_at <= $2 ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(pubkey)
        .bind(cutoff_ms)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Strictly-older snapshot, for the case where the at-or-before row is
    /// also the latest one (peer not observed in the whole window).
    pub async fn credit_before(
        &self,
        pubkey: &str,
        before_ms: i64,
    ) -> anyhow::Result<Option<CreditSnapshot>> {
        let row = sqlx::query_as::<_, CreditSnapshot>(
            "SELECT pubkey, credits, observed_at FROM credit_snapshots
             WHERE pubkey = $1 AND observed_at < $2 ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(pubkey)
        .bind(before_ms)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Ascending credit series from `from_ms`, capped.
    pub async fn credit_series(
        &self,
        pubkey: &str,
        from_ms: i64,
        cap: i64,
    ) -> anyhow::Result<Vec<CreditSnapshot>> {
        let rows = sqlx::query_as::<_, CreditSnapshot>(
            r#"
            SELECT pubkey, credits, observed_at FROM (
                SELECT pubkey, credits, observed_at, id FROM credit_snapshots
                WHERE pubkey = $1 AND observed_at >= $2
                ORDER BY observed_at DESC, id DESC LIMIT $3
            ) ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(pubkey)
        .bind(from_ms)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// COUNT/MIN/MAX over one peer's samples in [from_ms, now].
    pub async fn sample_window(&self, peer_id: i64, from_ms: i64) -> anyhow::Result<SampleWindow> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, MIN(timestamp) AS first_ts, MAX(timestamp) AS last_ts
             FROM stats_samples WHERE pnode_id = $1 AND timestamp >= $2",
        )
        .bind(peer_id)
        .bind(from_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(SampleWindow {
            count: row.try_get("n")?,
            first_ts: row.try_get("first_ts")?,
            last_ts: row.try_get("last_ts")?,
        })
    }

    /// Ascending sample timestamps from `from_ms`, capped (timeline rendering).
    pub async fn sample_timestamps(
        &self,
        peer_id: i64,
        from_ms: i64,
        cap: i64,
    ) -> anyhow::Result<Vec<i64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT timestamp FROM (
                SELECT timestamp, id FROM stats_samples
                WHERE pnode_id = $1 AND timestamp >= $2
                ORDER BY timestamp DESC, id DESC LIMIT $3
            ) ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(peer_id)
        .bind(from_ms)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ascending (timestamp, total_bytes) from `from_ms`, capped.
    pub async fn storage_history(
        &self,
        peer_id: i64,
        from_ms: i64,
        cap: i64,
    ) -> anyhow::Result<Vec<(i64, Option<i64>)>> {
        let rows = sqlx::query_as::<_, (i64, Option<i64>)>(
            r#"
            SELECT timestamp, total_bytes FROM (
                SELECT timestamp, total_bytes, id FROM stats_samples
                WHERE pnode_id = $1 AND timestamp >= $2
                ORDER BY timestamp DESC, id DESC LIMIT $3
            ) ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(peer_id)
        .bind(from_ms)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ascending observation times from `from_ms`, capped (gap detection).
    pub async fn observation_times(
        &self,
        peer_id: i64,
        from_ms: i64,
        cap: i64,
    ) -> anyhow::Result<Vec<i64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT observed_at FROM (
                SELECT observed_at, id FROM gossip_observations
                WHERE pnode_id = $1 AND observed_at >= $2
                ORDER BY observed_at DESC, id DESC LIMIT $3
            ) ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(peer_id)
        .bind(from_ms)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_seeds_with_observations(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT seed_id) FROM gossip_observations",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    pub async fn count_seeds_seeing_peer(&self, peer_id: i64) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT seed_id) FROM gossip_observations WHERE pnode_id = $1",
        )
        .bind(peer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}
