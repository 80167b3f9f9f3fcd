// Background ingestion worker: triggers a coordinator cycle on a fixed
// interval. The coordinator itself guarantees single-flight, so an overlong
// cycle simply makes the next tick a no-op.

use crate::coordinator::{Coordinator, CycleOutcome};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::time::{Duration, interval};

/// Coordinator handle, shared counters, and shutdown for the worker.
pub struct WorkerDeps {
    pub coordinator: Arc<Coordinator>,
    pub cycles_completed_total: Arc<AtomicU64>,
    pub cycles_skipped_total: Arc<AtomicU64>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Worker timing and logging config.
/// Stats logging uses a real-time interval, independent of the cycle interval.
pub struct WorkerConfig {
    pub cycle_interval_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        coordinator,
        cycles_completed_total,
        cycles_skipped_total,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        cycle_interval_secs,
        stats_log_interval_secs,
    } = config;

    tokio::spawn(async move {
        let mut cycle_tick = interval(Duration::from_secs(cycle_interval_secs));
        cycle_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let worker_span = tracing::span!(tracing::Level::DEBUG, "worker", cycle_interval_secs);
        let _guard = worker_span.enter();

        loop {
            tokio::select! {
                _ = cycle_tick.tick() => {
                    match coordinator.run_cycle().await {
                        Ok(CycleOutcome::Completed(summary)) => {
                            cycles_completed_total
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            tracing::debug!(
                                run_id = summary.run_id,
                                operation = "run_cycle",
                                "scheduled ingestion cycle completed"
                            );
                        }
                        Ok(CycleOutcome::AlreadyRunning) => {
                            cycles_skipped_total
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            tracing::debug!(
                                operation = "run_cycle",
                                "previous cycle still running; tick skipped"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                operation = "run_cycle",
                                "ingestion cycle failed"
                            );
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Worker shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        cycles_completed_total =
                            cycles_completed_total.load(std::sync::atomic::Ordering::Relaxed),
                        cycles_skipped_total =
                            cycles_skipped_total.load(std::sync::atomic::Ordering::Relaxed),
                        "app stats"
                    );
                }
            }
        }
    })
}
