//! Background jobs run by the inventory worker.
//!
//! | job | interval | does |
//! |---|---|---|
//! | `seat-sweep` | 60s | release expired seat locks, reconcile drifted seats |
//! | `consistency-audit` | 5 min | [`ConsistencyAuditor::audit_now`](crate::auditor::ConsistencyAuditor::audit_now) |
//! | `compensation-worker` | 5s | retry due compensation tasks |
//! | `status-report` | 1 h | log terminal compensations, active locks and stock levels |

use crate::config::Config;
use crate::service::InventoryServices;
use boxoffice_core::CompensationStatus;
use boxoffice_runtime::{FnJob, JobScheduler};
use std::sync::Arc;

/// Register every inventory job on `scheduler`.
pub fn register_jobs(scheduler: &mut JobScheduler, services: &InventoryServices, config: &Config) {
    let svc = services.clone();
    scheduler.register(Arc::new(FnJob::new(
        "seat-sweep",
        config.seat_locks.sweep_interval,
        move || {
            let svc = svc.clone();
            async move { sweep(&svc).await }
        },
    )));

    let svc = services.clone();
    scheduler.register(Arc::new(FnJob::new(
        "consistency-audit",
        config.audit.interval,
        move || {
            let svc = svc.clone();
            async move {
                svc.auditor
                    .audit_now()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        },
    )));

    let svc = services.clone();
    scheduler.register(Arc::new(FnJob::new(
        "compensation-worker",
        config.compensation.poll_interval,
        move || {
            let svc = svc.clone();
            async move {
                svc.compensation
                    .run_once()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        },
    )));

    let svc = services.clone();
    scheduler.register(Arc::new(FnJob::new(
        "status-report",
        config.audit.report_interval,
        move || {
            let svc = svc.clone();
            async move { status_report(&svc).await }
        },
    )));
}

async fn sweep(services: &InventoryServices) -> Result<(), String> {
    let report = services
        .seats
        .sweep_expired()
        .await
        .map_err(|e| e.to_string())?;

    for (seat_id, session_id) in &report.drifted {
        if let Err(e) = services.auditor.audit_seat(seat_id, session_id).await {
            tracing::warn!(seat_id = %seat_id, error = %e, "Drift reconciliation failed");
        }
    }
    Ok(())
}

async fn status_report(services: &InventoryServices) -> Result<(), String> {
    let terminal = services
        .compensation
        .count_by_status(CompensationStatus::Terminal)
        .await
        .map_err(|e| e.to_string())?;
    let active_locks = services
        .seats
        .active_lock_count()
        .await
        .map_err(|e| e.to_string())?;
    let levels = services
        .auditor
        .stock_levels()
        .await
        .map_err(|e| e.to_string())?;

    tracing::info!(
        terminal_compensations = terminal,
        active_locks,
        sold_out = levels.sold_out,
        critical = levels.critical,
        low = levels.low,
        warning = levels.warning,
        healthy = levels.healthy,
        "Inventory status"
    );
    if terminal > 0 {
        tracing::warn!(terminal_compensations = terminal, "Compensations need operator attention");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::service::Providers;
    use boxoffice_core::environment::Clock;
    use boxoffice_testing::{
        InMemoryCompensationStore, InMemoryCounterCache, InMemorySeatLockCache,
        InMemorySeatLockRepository, InMemoryStockStore, test_clock,
    };
    use std::time::Duration;

    fn services() -> InventoryServices {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let providers = Providers {
            stocks: Arc::new(InMemoryStockStore::new()),
            counters: Arc::new(InMemoryCounterCache::with_clock(
                Arc::clone(&clock),
                Duration::from_secs(60),
            )),
            seat_cache: Arc::new(InMemorySeatLockCache::with_clock(Arc::clone(&clock))),
            seat_locks: Arc::new(InMemorySeatLockRepository::new()),
            compensations: Arc::new(InMemoryCompensationStore::new()),
            clock,
        };
        InventoryServices::new(&providers, &Config::default())
    }

    #[test]
    fn registers_four_jobs() {
        let mut scheduler = JobScheduler::new(Duration::from_secs(1));
        register_jobs(&mut scheduler, &services(), &Config::default());
        assert_eq!(scheduler.job_count(), 4);
    }

    #[tokio::test]
    async fn jobs_run_against_empty_stores() {
        let svc = services();
        sweep(&svc).await.unwrap();
        status_report(&svc).await.unwrap();
    }
}
