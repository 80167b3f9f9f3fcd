use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    pub seeds: Vec<SeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Seconds between automatic ingestion cycles.
    pub cycle_interval_secs: u64,
    /// Concurrency ceiling for stats polls within one cycle.
    #[serde(default = "default_stats_concurrency")]
    pub stats_concurrency: usize,
    /// Base delay for per-peer backoff after a failed poll.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Exponent cap: delay never exceeds base * 2^cap.
    #[serde(default = "default_backoff_cap_exponent")]
    pub backoff_cap_exponent: u32,
    /// Fixed port for get-stats calls; the gossip-reported port is never used.
    #[serde(default = "default_stats_port")]
    pub stats_port: u16,
    /// Per-request timeout for pRPC calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How often to log app stats (cycles run, peers polled) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stats_concurrency() -> usize {
    10
}

fn default_backoff_base_secs() -> u64 {
    60
}

fn default_backoff_cap_exponent() -> u32 {
    5
}

fn default_stats_port() -> u16 {
    6000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// A peer observed by a seed within this window counts as "fresh" for that seed.
    #[serde(default = "default_fresh_window_secs")]
    pub fresh_window_secs: u64,
    /// How often to prune history tables past retention (real seconds).
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            fresh_window_secs: default_fresh_window_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            vacuum_schedule: None,
            vacuum_interval_secs: default_vacuum_interval_secs(),
        }
    }
}

fn default_fresh_window_secs() -> u64 {
    3600
}

fn default_prune_interval_secs() -> u64 {
    3600
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
}

fn default_seed_enabled() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.ingest.cycle_interval_secs > 0,
            "ingest.cycle_interval_secs must be > 0, got {}",
            self.ingest.cycle_interval_secs
        );
        anyhow::ensure!(
            self.ingest.stats_concurrency > 0,
            "ingest.stats_concurrency must be > 0, got {}",
            self.ingest.stats_concurrency
        );
        anyhow::ensure!(
            self.ingest.backoff_base_secs > 0,
            "ingest.backoff_base_secs must be > 0, got {}",
            self.ingest.backoff_base_secs
        );
        anyhow::ensure!(
            self.ingest.backoff_cap_exponent <= 16,
            "ingest.backoff_cap_exponent must be <= 16, got {}",
            self.ingest.backoff_cap_exponent
        );
        anyhow::ensure!(
            self.ingest.stats_port > 0,
            "ingest.stats_port must be > 0, got {}",
            self.ingest.stats_port
        );
        anyhow::ensure!(
            self.ingest.request_timeout_secs > 0,
            "ingest.request_timeout_secs must be > 0, got {}",
            self.ingest.request_timeout_secs
        );
        anyhow::ensure!(
            self.ingest.stats_log_interval_secs > 0,
            "ingest.stats_log_interval_secs must be > 0, got {}",
            self.ingest.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.snapshot.fresh_window_secs > 0,
            "snapshot.fresh_window_secs must be > 0, got {}",
            self.snapshot.fresh_window_secs
        );
        anyhow::ensure!(
            !self.seeds.is_empty(),
            "at least one [[seeds]] entry required"
        );
        for seed in &self.seeds {
            anyhow::ensure!(
                !seed.name.is_empty(),
                "seeds.name must be non-empty for {}",
                seed.base_url
            );
            anyhow::ensure!(
                seed.base_url.starts_with("http://") || seed.base_url.starts_with("https://"),
                "seeds.base_url must be http(s), got {}",
                seed.base_url
            );
        }
        Ok(())
    }
}
