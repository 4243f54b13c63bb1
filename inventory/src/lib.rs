//! # Boxoffice Inventory
//!
//! Ticket inventory reservation and seat locking.
//!
//! - [`StockLedger`]: the durable, authoritative unit counts (CAS on a version)
//! - [`FastPathCounter`]: a cache counter that turns away most traffic before
//!   it reaches the ledger
//! - [`SeatLockCoordinator`]: dual-written seat locks with TTLs
//! - [`ReservationCoordinator`]: the order-creation saga
//! - [`CompensationLedger`]: durable retry of undo actions that failed inline
//! - [`ConsistencyAuditor`]: repairs caches toward the durable stores
//!
//! [`InventoryCore`] bundles them behind the operations the order and
//! ticket services call.
//!
//! ## Example
//!
//! ```ignore
//! let services = InventoryServices::new(&providers, &config);
//! let core = InventoryCore::new(services, mutex, orders, clock, &config);
//!
//! core.initialize_stock(&ItemId::new("T1"), 500).await?;
//! let reservation = core
//!     .reserve(&ReservationRequest::new(OwnerId::new("U1"), ItemId::new("T1"), 2))
//!     .await?;
//! core.confirm_reservation(&reservation).await?;
//! ```

/// Consistency auditor
pub mod auditor;

/// Compensation queue and worker
pub mod compensation;

/// Environment-driven configuration
pub mod config;

/// Fast-path counter
pub mod fast_path;

/// Background jobs for the worker binary
pub mod jobs;

/// Stock ledger
pub mod ledger;

/// Reservation saga
pub mod reservation;

/// Seat lock coordinator
pub mod seat_lock;

/// Service wiring and facade
pub mod service;

pub use auditor::{AuditReport, ConsistencyAuditor, ItemAudit, SeatAudit, StockLevelCounts};
pub use compensation::{CompensationLedger, CompensationQueue, CompensationRun};
pub use config::{Config, MutexGranularity};
pub use fast_path::{FastPathCounter, WarmUpReport};
pub use ledger::StockLedger;
pub use reservation::{ReservationCoordinator, ReservationRequest, SeatSelection};
pub use seat_lock::{LockRequest, LockedSeats, SeatLockCoordinator, SweepReport};
pub use service::{InventoryCore, InventoryServices, Providers};
