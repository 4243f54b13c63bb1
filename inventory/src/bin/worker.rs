//! Inventory background worker.
//!
//! Seeds fast-path counters, then runs the seat sweep, consistency audit,
//! compensation worker and status report until Ctrl+C or SIGTERM.

use anyhow::Context;
use boxoffice_core::SystemClock;
use boxoffice_inventory::jobs::register_jobs;
use boxoffice_inventory::{Config, InventoryServices, Providers};
use boxoffice_postgres::{PostgresCompensationStore, PostgresSeatLockRepository, PostgresStockStore};
use boxoffice_redis::{RedisCounterCache, RedisSeatLockCache};
use boxoffice_runtime::metrics::MetricsServer;
use boxoffice_runtime::{JobScheduler, wait_for_signal};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting inventory worker");

    let config = Config::from_env().context("invalid configuration")?;

    let mut metrics = MetricsServer::new(config.metrics.addr);
    metrics.start().context("metrics server failed to start")?;

    info!("Connecting to PostgreSQL...");
    let pool = boxoffice_postgres::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("PostgreSQL connection failed")?;
    boxoffice_postgres::migrate(&pool)
        .await
        .context("schema migration failed")?;

    info!("Connecting to Redis...");
    let redis = boxoffice_redis::connect(&config.redis.url)
        .await
        .context("Redis connection failed")?;

    let providers = Providers {
        stocks: Arc::new(PostgresStockStore::new(pool.clone())),
        counters: Arc::new(RedisCounterCache::new(redis.clone(), config.fast_path.ttl)),
        seat_cache: Arc::new(RedisSeatLockCache::new(redis)),
        seat_locks: Arc::new(PostgresSeatLockRepository::new(pool.clone())),
        compensations: Arc::new(PostgresCompensationStore::new(pool)),
        clock: Arc::new(SystemClock),
    };
    let services = InventoryServices::new(&providers, &config);

    match services.fast_path.warm_up().await {
        Ok(report) => info!(seeded = report.seeded, failed = report.failed, "Fast-path counters warmed up"),
        Err(e) => warn!(error = %e, "Fast-path warm-up skipped; counters rebuild on first use"),
    }

    let mut scheduler = JobScheduler::new(config.metrics.shutdown_timeout);
    register_jobs(&mut scheduler, &services, &config);
    scheduler.start();
    info!("Inventory worker running");

    wait_for_signal().await;

    if let Err(stuck) = scheduler.shutdown().await {
        warn!(jobs = ?stuck, "Some jobs did not stop cleanly");
    }
    info!("Inventory worker stopped");
    Ok(())
}
