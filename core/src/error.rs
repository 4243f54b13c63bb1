//! Error types for inventory reservation and seat locking.

use crate::ids::{ItemId, SeatId};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Error taxonomy for the inventory core.
///
/// Business outcomes are returned to the caller as-is and never retried.
/// Infrastructure errors and optimistic conflicts are retried locally a
/// bounded number of times before they surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    // ═══════════════════════════════════════════════════════════
    // Business Outcomes
    // ═══════════════════════════════════════════════════════════

    /// The ledger does not hold enough available units.
    #[error("Insufficient stock for {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item that was short
        item_id: ItemId,
        /// Units requested
        requested: u32,
        /// Units available at the time of the check
        available: u32,
    },

    /// The item is sold out at the admission gate.
    #[error("Item {0} is out of stock")]
    OutOfStock(ItemId),

    /// The requested transition is illegal for the current record.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A lock is held by a different owner.
    #[error("Lock on {resource} is held by another owner")]
    NotOwner {
        /// Resource the caller tried to act on
        resource: String,
    },

    /// A seat could not be locked; the whole batch was released.
    #[error("Failed to lock seat {seat_id}: {reason}")]
    LockFailed {
        /// Seat that failed
        seat_id: SeatId,
        /// Why it failed
        reason: String,
    },

    /// A record that must exist does not.
    #[error("Not found: {0}")]
    NotFound(String),

    // ═══════════════════════════════════════════════════════════
    // Concurrency
    // ═══════════════════════════════════════════════════════════

    /// Optimistic concurrency collision that outlived its retry budget.
    #[error("Concurrent update conflict on {0}")]
    Conflict(String),

    /// A mutual-exclusion lock could not be acquired in time.
    #[error("Resource {0} is busy")]
    Busy(String),

    /// The fast-path counter is missing from the cache.
    #[error("Fast-path counter for {0} is not initialized")]
    NotInitialized(ItemId),

    // ═══════════════════════════════════════════════════════════
    // Compensation
    // ═══════════════════════════════════════════════════════════

    /// An undo action failed repeatedly and needs operator attention.
    #[error("Compensation {task_id} exhausted after {attempts} attempts: {last_error}")]
    CompensationExhausted {
        /// Compensation task id
        task_id: Uuid,
        /// Attempts made
        attempts: u32,
        /// Last error observed
        last_error: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure Errors
    // ═══════════════════════════════════════════════════════════

    /// Durable store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Cache store failure.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl InventoryError {
    /// Whether a local retry could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Cache(_) | Self::Conflict(_))
    }

    /// Whether this is a business-rule outcome that must reach the caller unchanged.
    #[must_use]
    pub const fn is_business(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::OutOfStock(_)
                | Self::InvalidState(_)
                | Self::NotOwner { .. }
                | Self::LockFailed { .. }
                | Self::NotFound(_)
        )
    }

    /// Short stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::OutOfStock(_) => "out_of_stock",
            Self::InvalidState(_) => "invalid_state",
            Self::NotOwner { .. } => "not_owner",
            Self::LockFailed { .. } => "lock_failed",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Busy(_) => "busy",
            Self::NotInitialized(_) => "not_initialized",
            Self::CompensationExhausted { .. } => "compensation_exhausted",
            Self::Database(_) => "database",
            Self::Cache(_) => "cache",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_transient() {
        assert!(InventoryError::Database("timeout".into()).is_transient());
        assert!(InventoryError::Cache("refused".into()).is_transient());
        assert!(InventoryError::Conflict("T1".into()).is_transient());
        assert!(!InventoryError::OutOfStock(ItemId::new("T1")).is_transient());
    }

    #[test]
    fn business_errors_are_not_transient() {
        let err = InventoryError::InsufficientStock {
            item_id: ItemId::new("T1"),
            requested: 3,
            available: 1,
        };
        assert!(err.is_business());
        assert!(!err.is_transient());
        assert_eq!(err.kind(), "insufficient_stock");
    }

    #[test]
    fn busy_is_neither_business_nor_transient() {
        let err = InventoryError::Busy("order:lock:create:U1".into());
        assert!(!err.is_business());
        assert!(!err.is_transient());
    }
}
