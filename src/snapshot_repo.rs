// Derived state: ingestion runs (+ per-seed counters) and network snapshots
// (+ version / seed-visibility children). Runs with finished_at IS NULL are
// the persisted "a cycle is in flight" signal.

use crate::models::{IngestionRun, NetworkSnapshot, SeedVisibility, VersionStat};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

/// Counters written back onto a finished run row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounters {
    pub peers_observed: i64,
    pub attempted: i64,
    pub success: i64,
    pub failure: i64,
    pub backed_off: i64,
}

/// Everything the aggregator computed for one network snapshot.
#[derive(Debug, Clone)]
pub struct NewNetworkSnapshot {
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
    pub version_stats: Vec<(String, i64)>,
    pub seed_visibility: Vec<SeedVisibility>,
}

/// One point of the bounded snapshot time series.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPoint {
    pub created_at: i64,
    pub total_nodes: i64,
    pub median_uptime_seconds: Option<f64>,
    pub total_storage_committed: i64,
}

#[derive(Clone)]
pub struct SnapshotRepo {
    pool: SqlitePool,
}

impl SnapshotRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a run row with finished_at NULL; externally visible as "running".
    #[instrument(skip(self), fields(repo = "snapshot", operation = "create_run"))]
    pub async fn create_run(&self, started_at: i64, seeds_count: i64) -> anyhow::Result<i64> {
        let r = sqlx::query("INSERT INTO ingestion_runs (started_at, seeds_count) VALUES ($1, $2)")
            .bind(started_at)
            .bind(seeds_count)
            .execute(&self.pool)
            .await?;
        Ok(r.last_insert_rowid())
    }

    #[instrument(skip(self), fields(repo = "snapshot", operation = "finish_run"))]
    pub async fn finish_run(
        &self,
        run_id: i64,
        finished_at: i64,
        counters: RunCounters,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE ingestion_runs
             SET finished_at = $1, peers_observed = $2, attempted = $3,
                 success = $4, failure = $5, backed_off = $6
             WHERE id = $7",
        )
        .bind(finished_at)
        .bind(counters.peers_observed)
        .bind(counters.attempted)
        .bind(counters.success)
        .bind(counters.failure)
        .bind(counters.backed_off)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Per-seed slice of one run. `counters.peers_observed` is the distinct
    /// peers this seed reported; the poll counters cover targets whose latest
    /// address came from this seed.
    pub async fn record_run_seed(
        &self,
        run_id: i64,
        seed_id: i64,
        listing_ok: bool,
        counters: RunCounters,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO ingestion_run_seeds
                 (run_id, seed_id, peers_observed, attempted, success, failure, backed_off, listing_ok)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(run_id)
        .bind(seed_id)
        .bind(counters.peers_observed)
        .bind(counters.attempted)
        .bind(counters.success)
        .bind(counters.failure)
        .bind(counters.backed_off)
        .bind(listing_ok)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a cycle-fatal error on the run row. `finished_at` stays null so
    /// the stuck state remains visible; only the message is filled in.
    #[instrument(skip(self, error), fields(repo = "snapshot", operation = "record_run_error"))]
    pub async fn record_run_error(&self, run_id: i64, error: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE ingestion_runs SET error = $1 WHERE id = $2")
            .bind(error)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn latest_run(&self) -> anyhow::Result<Option<IngestionRun>> {
        let run = sqlx::query_as::<_, IngestionRun>(
            "SELECT * FROM ingestion_runs ORDER BY started_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Latest run that touched the given seed, with that seed's own counters
    /// (not the run-global ones).
    pub async fn latest_run_for_seed(
        &self,
        seed_id: i64,
    ) -> anyhow::Result<Option<(IngestionRun, RunCounters)>> {
        let row = sqlx::query(
            r#"
            SELECT r.id, r.started_at, r.finished_at, r.seeds_count, r.peers_observed,
                   r.attempted, r.success, r.failure, r.backed_off, r.error,
                   rs.peers_observed AS seed_observed, rs.attempted AS seed_attempted,
                   rs.success AS seed_success, rs.failure AS seed_failure,
                   rs.backed_off AS seed_backed_off
            FROM ingestion_run_seeds rs
            JOIN ingestion_runs r ON r.id = rs.run_id
            WHERE rs.seed_id = $1
            ORDER BY r.started_at DESC, r.id DESC LIMIT 1
            "#,
        )
        .bind(seed_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let run = IngestionRun {
            id: row.try_get("id")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            seeds_count: row.try_get("seeds_count")?,
            peers_observed: row.try_get("peers_observed")?,
            attempted: row.try_get("attempted")?,
            success: row.try_get("success")?,
            failure: row.try_get("failure")?,
            backed_off: row.try_get("backed_off")?,
            error: row.try_get("error")?,
        };
        let seed_counters = RunCounters {
            peers_observed: row.try_get("seed_observed")?,
            attempted: row.try_get("seed_attempted")?,
            success: row.try_get("seed_success")?,
            failure: row.try_get("seed_failure")?,
            backed_off: row.try_get("seed_backed_off")?,
        };
        Ok(Some((run, seed_counters)))
    }

    #[instrument(skip(self, snap), fields(repo = "snapshot", operation = "save_network_snapshot"))]
    pub async fn save_network_snapshot(&self, snap: &NewNetworkSnapshot) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;

        let r = sqlx::query(
            r#"
            INSERT INTO network_snapshots
                (ingestion_run_id, created_at, total_nodes, reachable_nodes, unreachable_nodes,
                 reachable_percent, median_uptime_seconds, p90_uptime_seconds,
                 median_credits, p90_credits, total_storage_committed, total_storage_used,
                 nodes_backed_off, nodes_failing_stats)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(snap.ingestion_run_id)
        .bind(snap.created_at)
        .bind(snap.total_nodes)
        .bind(snap.reachable_nodes)
        .bind(snap.unreachable_nodes)
        .bind(snap.reachable_percent)
        .bind(snap.median_uptime_seconds)
        .bind(snap.p90_uptime_seconds)
        .bind(snap.median_credits)
        .bind(snap.p90_credits)
        .bind(snap.total_storage_committed)
        .bind(snap.total_storage_used)
        .bind(snap.nodes_backed_off)
        .bind(snap.nodes_failing_stats)
        .execute(&mut *tx)
        .await?;
        let snapshot_id = r.last_insert_rowid();

        for (version, node_count) in &snap.version_stats {
            sqlx::query(
                "INSERT INTO snapshot_version_stats (snapshot_id, version, node_count)
                 VALUES ($1, $2, $3)",
            )
            .bind(snapshot_id)
            .bind(version)
            .bind(node_count)
            .execute(&mut *tx)
            .await?;
        }

        for sv in &snap.seed_visibility {
            sqlx::query(
                "INSERT INTO snapshot_seed_visibility
                     (snapshot_id, seed_base_url, nodes_seen, fresh_nodes, stale_nodes, offline_nodes)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(snapshot_id)
            .bind(&sv.seed_base_url)
            .bind(sv.nodes_seen)
            .bind(sv.fresh_nodes)
            .bind(sv.stale_nodes)
            .bind(sv.offline_nodes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(snapshot_id)
    }

    pub async fn latest_network_snapshot(&self) -> anyhow::Result<Option<NetworkSnapshot>> {
        let snap = sqlx::query_as::<_, NetworkSnapshot>(
            "SELECT * FROM network_snapshots ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(snap)
    }

    pub async fn version_stats(&self, snapshot_id: i64) -> anyhow::Result<Vec<VersionStat>> {
        let rows = sqlx::query_as::<_, VersionStat>(
            "SELECT version, node_count, 0.0 AS percentage FROM snapshot_version_stats
             WHERE snapshot_id = $1 ORDER BY node_count DESC",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn seed_visibility(&self, snapshot_id: i64) -> anyhow::Result<Vec<SeedVisibility>> {
        let rows = sqlx::query_as::<_, SeedVisibility>(
            "SELECT seed_base_url, nodes_seen, fresh_nodes, stale_nodes, offline_nodes
             FROM snapshot_seed_visibility WHERE snapshot_id = $1 ORDER BY seed_base_url ASC",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ascending snapshot series from `from_ms`. The cap keeps the newest points.
    pub async fn snapshot_series(
        &self,
        from_ms: i64,
        cap: i64,
    ) -> anyhow::Result<Vec<SnapshotPoint>> {
        let rows = sqlx::query_as::<_, SnapshotPoint>(
            r#"
            SELECT created_at, total_nodes, median_uptime_seconds, total_storage_committed FROM (
                SELECT created_at, total_nodes, median_uptime_seconds, total_storage_committed, id
                FROM network_snapshots WHERE created_at >= $1
                ORDER BY created_at DESC, id DESC LIMIT $2
            ) ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(from_ms)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
