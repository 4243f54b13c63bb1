//! Prometheus metrics for the inventory core.
//!
//! Every metric is labelled from typed values: [`Operation::as_str`],
//! [`InventoryError::kind`], [`CompensationAction::as_str`] and
//! [`StockLevel::as_str`]. Call sites never hand-write label strings.
//!
//! # Example
//!
//! ```rust,no_run
//! use boxoffice_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use boxoffice_core::{
    CompensationAction, CompensationStatus, InventoryError, Operation, ReleaseReason, StockLevel,
};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            // Tests may start several servers in one process.
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        register_metrics();
        tokio::spawn(async move {
            // `ExporterError` implements neither `Display` nor `Debug`.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "inventory_operations_total",
        "Inventory operations by operation and outcome"
    );
    describe_histogram!(
        "inventory_operation_duration_seconds",
        "Time taken by inventory operations"
    );
    describe_counter!(
        "inventory_compensations_total",
        "Compensation tasks by action and resulting status"
    );
    describe_counter!(
        "inventory_audit_repairs_total",
        "Drift repairs made by the consistency auditor"
    );
    describe_gauge!(
        "inventory_stock_level_ratio",
        "Available units over total units per item"
    );
    describe_counter!(
        "inventory_seat_locks_swept_total",
        "Expired seat locks released by the sweep"
    );
    describe_counter!(
        "inventory_stock_levels_total",
        "Items observed at each stock level by the auditor"
    );
    describe_counter!(
        "inventory_releases_total",
        "Reservations given back by reason"
    );
    describe_counter!(
        "inventory_ledger_cas_conflicts_total",
        "Stock ledger writes that lost a version race"
    );
}

/// Outcome label for a result.
fn outcome<T>(result: &Result<T, InventoryError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

/// Per-operation metrics recorder.
pub struct OperationMetrics;

impl OperationMetrics {
    /// Record one completed operation.
    pub fn record<T>(op: Operation, result: &Result<T, InventoryError>, duration: Duration) {
        counter!(
            "inventory_operations_total",
            "operation" => op.as_str(),
            "component" => op.component().as_str(),
            "outcome" => outcome(result)
        )
        .increment(1);
        histogram!("inventory_operation_duration_seconds", "operation" => op.as_str())
            .record(duration.as_secs_f64());
    }
}

/// Compensation metrics recorder.
pub struct CompensationMetrics;

impl CompensationMetrics {
    /// Record a task entering `status`.
    pub fn record(action: &CompensationAction, status: CompensationStatus) {
        counter!(
            "inventory_compensations_total",
            "action" => action.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
    }
}

/// Auditor metrics recorder.
pub struct AuditMetrics;

impl AuditMetrics {
    /// Record a repaired item counter.
    pub fn record_item_repair() {
        counter!("inventory_audit_repairs_total", "target" => "item").increment(1);
    }

    /// Record a repaired seat lock.
    pub fn record_seat_repair() {
        counter!("inventory_audit_repairs_total", "target" => "seat").increment(1);
    }

    /// Publish an item's stock level.
    pub fn record_stock_level(item_id: &str, available: u32, total: u32) {
        let ratio = if total == 0 {
            0.0
        } else {
            f64::from(available) / f64::from(total)
        };
        gauge!("inventory_stock_level_ratio", "item_id" => item_id.to_string()).set(ratio);
        counter!(
            "inventory_stock_levels_total",
            "level" => StockLevel::classify(available, total).as_str()
        )
        .increment(1);
    }
}

/// Seat lock metrics recorder.
pub struct SeatLockMetrics;

impl SeatLockMetrics {
    /// Record locks released by a sweep.
    pub fn record_swept(count: usize) {
        counter!("inventory_seat_locks_swept_total").increment(count as u64);
    }
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a reservation given back.
    pub fn record_release(reason: ReleaseReason) {
        counter!("inventory_releases_total", "reason" => reason.as_str()).increment(1);
    }
}
