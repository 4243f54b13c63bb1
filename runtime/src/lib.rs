//! # Boxoffice Runtime
//!
//! Runtime plumbing shared by the inventory services and the worker binary.
//!
//! ## Components
//!
//! - **Retry**: the single bounded retry-with-backoff utility
//! - **Scheduler**: periodic background jobs with graceful shutdown
//! - **Metrics**: Prometheus exporter and typed metric recorders

/// Bounded retry with exponential or linear backoff
pub mod retry;

/// Periodic background jobs
pub mod scheduler;

/// Prometheus metrics for observability
pub mod metrics;

pub use retry::{Backoff, RetryPolicy, retry_with_backoff, retry_with_predicate};
pub use scheduler::{FnJob, JobScheduler, PeriodicJob, wait_for_signal};
