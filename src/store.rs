// SQLite store: pool setup, schema, retention pruning. The repos share one pool;
// all engine writes are single-row upserts/inserts, so SQLite's native atomicity
// is the only locking in play.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// Wall-clock now in epoch milliseconds. Logs and returns 0 if the clock is
/// before the epoch (same handling as a failed sample timestamp).
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}

pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_pool_size)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS seeds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL UNIQUE,
            enabled INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pnodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pubkey TEXT UNIQUE,
            is_public INTEGER NOT NULL DEFAULT 0,
            reachable INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_stats_attempt_at INTEGER,
            last_stats_success_at INTEGER,
            next_stats_allowed_at INTEGER,
            latest_credits INTEGER,
            credits_updated_at INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gossip_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pnode_id INTEGER NOT NULL,
            seed_id INTEGER NOT NULL,
            address TEXT NOT NULL,
            version TEXT,
            last_seen_ts INTEGER,
            storage_committed INTEGER,
            storage_used INTEGER,
            storage_usage_percent REAL,
            observed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_gossip_pnode_observed ON gossip_observations(pnode_id, observed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_gossip_seed_observed ON gossip_observations(seed_id, observed_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stats_samples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pnode_id INTEGER NOT NULL,
            seed_id INTEGER,
            timestamp INTEGER NOT NULL,
            cpu_percent REAL,
            ram_used_bytes INTEGER,
            ram_total_bytes INTEGER,
            uptime_seconds INTEGER,
            packets_in_per_sec REAL,
            packets_out_per_sec REAL,
            active_streams INTEGER,
            total_bytes INTEGER,
            total_pages INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_samples_pnode_ts ON stats_samples(pnode_id, timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pubkey TEXT NOT NULL,
            credits INTEGER NOT NULL,
            observed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_credits_pubkey_observed ON credit_snapshots(pubkey, observed_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS network_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ingestion_run_id INTEGER,
            created_at INTEGER NOT NULL,
            total_nodes INTEGER NOT NULL,
            reachable_nodes INTEGER NOT NULL,
            unreachable_nodes INTEGER NOT NULL,
            reachable_percent REAL NOT NULL,
            median_uptime_seconds REAL,
            p90_uptime_seconds REAL,
            median_credits REAL,
            p90_credits REAL,
            total_storage_committed INTEGER NOT NULL,
            total_storage_used INTEGER NOT NULL,
            nodes_backed_off INTEGER NOT NULL,
            nodes_failing_stats INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_network_snapshots_created ON network_snapshots(created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_version_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            node_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_seed_visibility (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_id INTEGER NOT NULL,
            seed_base_url TEXT NOT NULL,
            nodes_seen INTEGER NOT NULL,
            fresh_nodes INTEGER NOT NULL,
            stale_nodes INTEGER NOT NULL,
            offline_nodes INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            seeds_count INTEGER NOT NULL DEFAULT 0,
            peers_observed INTEGER NOT NULL DEFAULT 0,
            attempted INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL DEFAULT 0,
            failure INTEGER NOT NULL DEFAULT 0,
            backed_off INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_run_seeds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL,
            seed_id INTEGER NOT NULL,
            peers_observed INTEGER NOT NULL DEFAULT 0,
            attempted INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL DEFAULT 0,
            failure INTEGER NOT NULL DEFAULT 0,
            backed_off INTEGER NOT NULL DEFAULT 0,
            listing_ok INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Prune append-only history past retention. Peer rows are never deleted
/// (membership is monotonic); only their old observations and samples go.
#[instrument(skip(pool), fields(repo = "store", operation = "prune_history"))]
pub async fn prune_history(pool: &SqlitePool, retention_ms: i64) -> anyhow::Result<u64> {
    let cutoff = now_ms() - retention_ms;
    let mut pruned = 0u64;
    for sql in [
        "DELETE FROM gossip_observations WHERE observed_at < $1",
        "DELETE FROM stats_samples WHERE timestamp < $1",
        "DELETE FROM credit_snapshots WHERE observed_at < $1",
        "DELETE FROM snapshot_version_stats WHERE snapshot_id IN (SELECT id FROM network_snapshots WHERE created_at < $1)",
        "DELETE FROM snapshot_seed_visibility WHERE snapshot_id IN (SELECT id FROM network_snapshots WHERE created_at < $1)",
        "DELETE FROM network_snapshots WHERE created_at < $1",
        "DELETE FROM ingestion_run_seeds WHERE run_id IN (SELECT id FROM ingestion_runs WHERE started_at < $1 AND finished_at IS NOT NULL)",
        "DELETE FROM ingestion_runs WHERE started_at < $1 AND finished_at IS NOT NULL",
    ] {
        let r = sqlx::query(sql).bind(cutoff).execute(pool).await?;
        pruned += r.rows_affected();
    }
    Ok(pruned)
}

/// Reclaim space after deletes (run on the vacuum schedule).
#[instrument(skip(pool), fields(repo = "store", operation = "vacuum"))]
pub async fn vacuum(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}
