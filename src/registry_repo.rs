// Peer identity registry. Canonical set of known peers keyed by pubkey, plus
// the per-peer reachability/backoff columns the dispatcher maintains.

use crate::config::SeedConfig;
use crate::models::{PeerNode, Seed};
use sqlx::SqlitePool;
use tracing::instrument;

/// Longest error message stored on a peer row.
const MAX_LAST_ERROR_LEN: usize = 500;

/// A peer the dispatcher could poll: has at least one gossip address.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollTarget {
    pub id: i64,
    pub address: String,
    /// Seed whose listing supplied the latest address; tags the stats sample.
    pub seed_id: i64,
    pub failure_count: i64,
    pub next_stats_allowed_at: Option<i64>,
}

#[derive(Clone)]
pub struct RegistryRepo {
    pool: SqlitePool,
}

impl RegistryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert configured seeds by base_url, then return the enabled set.
    pub async fn ensure_seeds(&self, seeds: &[SeedConfig]) -> anyhow::Result<Vec<Seed>> {
        for seed in seeds {
            sqlx::query(
                "INSERT INTO seeds (name, base_url, enabled) VALUES ($1, $2, $3)
                 ON CONFLICT(base_url) DO UPDATE SET name = excluded.name, enabled = excluded.enabled",
            )
            .bind(&seed.name)
            .bind(&seed.base_url)
            .bind(seed.enabled)
            .execute(&self.pool)
            .await?;
        }
        self.enabled_seeds().await
    }

    pub async fn enabled_seeds(&self) -> anyhow::Result<Vec<Seed>> {
        let seeds = sqlx::query_as::<_, Seed>(
            "SELECT id, name, base_url, enabled FROM seeds WHERE enabled = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(seeds)
    }

    /// Find-or-create a peer row. With a pubkey this is idempotent: repeated
    /// calls return the same row. Without one a fresh anonymous row is created
    /// every time; identifier-less peers are never merged (known limitation,
    /// matches the network's behavior for private pods).
    #[instrument(skip(self), fields(repo = "registry", operation = "upsert_from_gossip"))]
    pub async fn upsert_from_gossip(
        &self,
        pubkey: Option<&str>,
        now_ms: i64,
    ) -> anyhow::Result<i64> {
        match pubkey {
            Some(pk) => {
                let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM pnodes WHERE pubkey = $1")
                    .bind(pk)
                    .fetch_optional(&self.pool)
                    .await?;
                if let Some(id) = existing {
                    return Ok(id);
                }
                let r = sqlx::query("INSERT INTO pnodes (pubkey, created_at) VALUES ($1, $2)")
                    .bind(pk)
                    .bind(now_ms)
                    .execute(&self.pool)
                    .await?;
                Ok(r.last_insert_rowid())
            }
            None => {
                let r = sqlx::query("INSERT INTO pnodes (pubkey, created_at) VALUES (NULL, $1)")
                    .bind(now_ms)
                    .execute(&self.pool)
                    .await?;
                Ok(r.last_insert_rowid())
            }
        }
    }

    /// Denormalized gossip-derived fields: public flag and latest credit balance.
    /// Only overwrites what the listing actually reported.
    pub async fn update_gossip_fields(
        &self,
        peer_id: i64,
        is_public: Option<bool>,
        credits: Option<i64>,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        if let Some(public) = is_public {
            sqlx::query("UPDATE pnodes SET is_public = $1 WHERE id = $2")
                .bind(public)
                .bind(peer_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(credits) = credits {
            sqlx::query(
                "UPDATE pnodes SET latest_credits = $1, credits_updated_at = $2 WHERE id = $3",
            )
            .bind(credits)
            .bind(now_ms)
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Reachable, failure streak reset, next poll one base interval out.
    #[instrument(skip(self), fields(repo = "registry", operation = "mark_poll_success"))]
    pub async fn mark_poll_success(
        &self,
        peer_id: i64,
        now_ms: i64,
        next_allowed_at: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE pnodes SET reachable = 1, failure_count = 0, last_error = NULL,
                 last_stats_attempt_at = $1, last_stats_success_at = $1, next_stats_allowed_at = $2
             WHERE id = $3",
        )
        .bind(now_ms)
        .bind(next_allowed_at)
        .bind(peer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unreachable, failure streak +1, next poll pushed out by the backoff delay.
    #[instrument(skip(self, error), fields(repo = "registry", operation = "mark_poll_failure"))]
    pub async fn mark_poll_failure(
        &self,
        peer_id: i64,
        now_ms: i64,
        next_allowed_at: i64,
        error: &str,
    ) -> anyhow::Result<()> {
        let truncated = truncate_error(error);
        sqlx::query(
            "UPDATE pnodes SET reachable = 0, failure_count = failure_count + 1, last_error = $1,
                 last_stats_attempt_at = $2, next_stats_allowed_at = $3
             WHERE id = $4",
        )
        .bind(truncated)
        .bind(now_ms)
        .bind(next_allowed_at)
        .bind(peer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Peers the dispatcher could reach: each with its latest gossip address.
    /// Backoff filtering happens in the coordinator, not here.
    pub async fn poll_targets(&self) -> anyhow::Result<Vec<PollTarget>> {
        let targets = sqlx::query_as::<_, PollTarget>(
            r#"
            SELECT p.id, g.address, g.seed_id, p.failure_count, p.next_stats_allowed_at
            FROM pnodes p
            JOIN gossip_observations g ON g.id = (
                SELECT id FROM gossip_observations
                WHERE pnode_id = p.id
                ORDER BY observed_at DESC, id DESC LIMIT 1
            )
            ORDER BY p.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(targets)
    }

    pub async fn all_peers(&self) -> anyhow::Result<Vec<PeerNode>> {
        let peers = sqlx::query_as::<_, PeerNode>("SELECT * FROM pnodes ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(peers)
    }

    pub async fn peers_page(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<PeerNode>> {
        let peers =
            sqlx::query_as::<_, PeerNode>("SELECT * FROM pnodes ORDER BY id ASC LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
        Ok(peers)
    }

    /// Page of peers that a specific seed has ever reported.
    pub async fn peers_page_for_seed(
        &self,
        seed_id: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PeerNode>> {
        let peers = sqlx::query_as::<_, PeerNode>(
            r#"
            SELECT p.* FROM pnodes p
            WHERE EXISTS (SELECT 1 FROM gossip_observations g WHERE g.pnode_id = p.id AND g.seed_id = $1)
            ORDER BY p.id ASC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(seed_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(peers)
    }

    pub async fn count_peers(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pnodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn count_peers_for_seed(&self, seed_id: i64) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT pnode_id) FROM gossip_observations WHERE seed_id = $1",
        )
        .bind(seed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    pub async fn peer_by_pubkey(&self, pubkey: &str) -> anyhow::Result<Option<PeerNode>> {
        let peer = sqlx::query_as::<_, PeerNode>("SELECT * FROM pnodes WHERE pubkey = $1")
            .bind(pubkey)
            .fetch_optional(&self.pool)
            .await?;
        Ok(peer)
    }

    pub async fn seed_by_base_url(&self, base_url: &str) -> anyhow::Result<Option<Seed>> {
        let seed = sqlx::query_as::<_, Seed>(
            "SELECT id, name, base_url, enabled FROM seeds WHERE base_url = $1",
        )
        .bind(base_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(seed)
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_LAST_ERROR_LEN {
        return error.to_string();
    }
    let mut cut = MAX_LAST_ERROR_LEN;
    while !error.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &error[..cut])
}
