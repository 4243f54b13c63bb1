//! # Boxoffice Testing
//!
//! Testing utilities for the inventory core.
//!
//! This crate provides:
//! - In-memory implementations of every provider trait in `boxoffice_core::providers`
//! - A [`FaultInjector`] on each of them, keyed by [`Operation`](boxoffice_core::Operation)
//! - A controllable [`FixedClock`] so TTLs and expiries can be driven by tests
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_testing::{InMemoryStockStore, test_clock};
//!
//! #[tokio::test]
//! async fn release_failure_is_compensated() {
//!     let stocks = InMemoryStockStore::new();
//!     stocks.faults().fail_always(Operation::Release);
//!     // ... run the saga, then clear the fault and run the compensation worker
//! }
//! ```

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

/// In-memory cache providers: counters, seat lock entries, mutex
pub mod caches;

/// Operation-keyed fault injection
pub mod faults;

/// In-memory durable providers: stock rows, seat lock rows, compensation tasks, orders
pub mod stores;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Controllable clock for deterministic tests.
    ///
    /// Clones share the same time, so advancing one advances every provider
    /// built from it.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::minutes(5));
    /// assert_eq!(clock.now() - before, Duration::minutes(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

pub use caches::{InMemoryCounterCache, InMemoryMutex, InMemorySeatLockCache};
pub use faults::FaultInjector;
pub use mocks::{FixedClock, test_clock};
pub use stores::{
    InMemoryCompensationStore, InMemorySeatLockRepository, InMemoryStockStore, RecordingOrderSink,
};
