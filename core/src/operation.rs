//! Operation tags.
//!
//! Every call into the inventory core carries an [`Operation`]. Metrics labels,
//! log fields and test fault injection all key off this enum instead of
//! matching on method-name strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The component an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    /// Durable stock ledger
    Ledger,
    /// Cache-backed admission counter
    FastPath,
    /// Seat lock coordinator
    SeatLock,
    /// Consistency auditor
    Auditor,
    /// Order-creation saga
    Reservation,
    /// Compensation ledger
    Compensation,
}

impl Component {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ledger => "ledger",
            Self::FastPath => "fast_path",
            Self::SeatLock => "seat_lock",
            Self::Auditor => "auditor",
            Self::Reservation => "reservation",
            Self::Compensation => "compensation",
        }
    }
}

/// A single inventory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create a ledger row (idempotent)
    InitializeStock,
    /// Move units from available to locked
    Reserve,
    /// Move units from locked back to available
    Release,
    /// Move units from locked to sold
    Commit,
    /// Decrement the fast-path counter
    Prededuct,
    /// Increment the fast-path counter, capped
    Rollback,
    /// Overwrite the fast-path counter from the ledger
    Resync,
    /// Seed every fast-path counter at startup
    WarmUp,
    /// Lock a seat in cache and durable store
    LockSeat,
    /// Release a seat lock
    UnlockSeat,
    /// Confirm a seat lock after payment
    ConfirmSeat,
    /// Release expired durable seat locks
    SweepExpired,
    /// Compare one item's counter against the ledger
    AuditItem,
    /// Compare one seat's cache entry against the durable row
    AuditSeat,
    /// Acquire the per-resource mutual-exclusion lock
    AcquireMutex,
    /// Hand the reservation to the order collaborator
    PersistOrder,
    /// Run the whole reservation saga
    CreateReservation,
    /// Confirm a paid reservation
    ConfirmReservation,
    /// Give a reservation back
    CancelReservation,
    /// Re-run a queued undo action
    Compensate,
}

impl Operation {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitializeStock => "initialize_stock",
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Commit => "commit",
            Self::Prededuct => "prededuct",
            Self::Rollback => "rollback",
            Self::Resync => "resync",
            Self::WarmUp => "warm_up",
            Self::LockSeat => "lock_seat",
            Self::UnlockSeat => "unlock_seat",
            Self::ConfirmSeat => "confirm_seat",
            Self::SweepExpired => "sweep_expired",
            Self::AuditItem => "audit_item",
            Self::AuditSeat => "audit_seat",
            Self::AcquireMutex => "acquire_mutex",
            Self::PersistOrder => "persist_order",
            Self::CreateReservation => "create_reservation",
            Self::ConfirmReservation => "confirm_reservation",
            Self::CancelReservation => "cancel_reservation",
            Self::Compensate => "compensate",
        }
    }

    /// Owning component.
    #[must_use]
    pub const fn component(self) -> Component {
        match self {
            Self::InitializeStock | Self::Reserve | Self::Release | Self::Commit => {
                Component::Ledger
            }
            Self::Prededuct | Self::Rollback | Self::Resync | Self::WarmUp => Component::FastPath,
            Self::LockSeat | Self::UnlockSeat | Self::ConfirmSeat | Self::SweepExpired => {
                Component::SeatLock
            }
            Self::AuditItem | Self::AuditSeat => Component::Auditor,
            Self::AcquireMutex
            | Self::PersistOrder
            | Self::CreateReservation
            | Self::ConfirmReservation
            | Self::CancelReservation => Component::Reservation,
            Self::Compensate => Component::Compensation,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_operations_belong_to_ledger() {
        for op in [Operation::Reserve, Operation::Release, Operation::Commit] {
            assert_eq!(op.component(), Component::Ledger);
        }
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(Operation::AcquireMutex.as_str(), "acquire_mutex");
        assert_eq!(Operation::Prededuct.to_string(), "prededuct");
        assert_eq!(Component::FastPath.as_str(), "fast_path");
    }
}
