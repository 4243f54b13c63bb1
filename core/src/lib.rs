//! # Boxoffice Core
//!
//! Domain types and seams for the ticket inventory reservation core.
//!
//! This crate holds everything the inventory services agree on but that
//! carries no I/O of its own:
//!
//! - **Identifiers**: strongly typed ids for items, seats, sessions, venues and owners
//! - **Stock**: the durable [`StockRecord`] and its only legal transitions
//! - **Seats**: durable [`SeatLockRecord`] rows and their cache mirror
//! - **Compensation**: typed undo actions queued after a failed saga step
//! - **Operations**: the [`Operation`] tag carried alongside every call
//! - **Providers**: async traits for the durable store, cache, mutex and order sink
//!
//! ## Architecture Principles
//!
//! - The durable store is the source of truth, caches are disposable
//! - State transitions are pure functions over records
//! - All external dependencies are injected behind traits

// Re-export commonly used types
pub use compensation::{CompensationAction, CompensationStatus, CompensationTask};
pub use environment::{Clock, SystemClock};
pub use error::{InventoryError, Result};
pub use ids::{ItemId, OwnerId, SeatId, SessionId, VenueId};
pub use operation::{Component, Operation};
pub use reservation::{ReleaseReason, Reservation};
pub use seat::{LockKind, SeatLockCacheEntry, SeatLockRecord, SeatLockState};
pub use stock::{StockLevel, StockMutation, StockRecord};

/// Typed undo actions for the compensation ledger
pub mod compensation;

/// Error taxonomy shared by every inventory component
pub mod error;

/// Strongly typed identifiers
pub mod ids;

/// Operation tags for instrumentation and fault injection
pub mod operation;

/// Async provider traits (durable store, cache, mutex, order sink)
pub mod providers;

/// Reservation handles returned by the order-creation saga
pub mod reservation;

/// Seat lock records and cache entries
pub mod seat;

/// Stock ledger records and transitions
pub mod stock;

/// Environment module - injected dependencies that are not stores
///
/// Only time is abstracted here. Everything stateful lives behind the
/// traits in [`providers`].
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
