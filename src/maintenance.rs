// Background worker: prune history tables past retention, on an interval.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).

use std::str::FromStr;
use std::time::Duration;

use crate::store;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

const MS_PER_DAY: i64 = 86_400_000;

/// Config for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub prune_interval_secs: u64,
    pub retention_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

/// Spawns the maintenance worker. Returns a join handle.
pub fn spawn(pool: SqlitePool, config: MaintenanceConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(pool, config).await;
    })
}

#[instrument(skip(pool), fields(interval_secs = config.prune_interval_secs))]
async fn run(pool: SqlitePool, config: MaintenanceConfig) {
    let mut prune_interval = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));
    prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    let retention_ms = (config.retention_days as i64) * MS_PER_DAY;

    loop {
        tokio::select! {
            _ = prune_interval.tick() => {
                match store::prune_history(&pool, retention_ms).await {
                    Ok(deleted) if deleted > 0 => {
                        info!(rows_deleted = deleted, "history pruned");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "prune tick failed"),
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = store::vacuum(&pool).await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: MaintenanceConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
