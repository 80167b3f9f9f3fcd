use anyhow::Result;
use podwatch::*;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let pool = store::connect(
        &app_config.database.path,
        app_config.database.max_pool_size,
    )
    .await?;
    store::init(&pool).await?;

    let registry = registry_repo::RegistryRepo::new(pool.clone());
    let telemetry = telemetry_repo::TelemetryRepo::new(pool.clone());
    let snapshots = snapshot_repo::SnapshotRepo::new(pool.clone());

    registry.ensure_seeds(&app_config.seeds).await?;

    let client = prpc_client::PrpcClient::new(std::time::Duration::from_secs(
        app_config.ingest.request_timeout_secs,
    ))?;
    let coordinator = Arc::new(coordinator::Coordinator::new(
        registry.clone(),
        telemetry.clone(),
        snapshots.clone(),
        client,
        &app_config.ingest,
        &app_config.snapshot,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let cycles_completed_total = Arc::new(AtomicU64::new(0));
    let cycles_skipped_total = Arc::new(AtomicU64::new(0));

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            coordinator: coordinator.clone(),
            cycles_completed_total: cycles_completed_total.clone(),
            cycles_skipped_total: cycles_skipped_total.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            cycle_interval_secs: app_config.ingest.cycle_interval_secs,
            stats_log_interval_secs: app_config.ingest.stats_log_interval_secs,
        },
    );
    maintenance::spawn(
        pool.clone(),
        maintenance::MaintenanceConfig {
            prune_interval_secs: app_config.snapshot.prune_interval_secs,
            retention_days: app_config.database.retention_days,
            vacuum_schedule: app_config.snapshot.vacuum_schedule.clone(),
            vacuum_interval_secs: app_config.snapshot.vacuum_interval_secs,
        },
    );

    let views = views::Views::new(registry, telemetry, snapshots);
    let app = routes::app(views, coordinator);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = worker_handle.await;
            }
        }
    }

    Ok(())
}
