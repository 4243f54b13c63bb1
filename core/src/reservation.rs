//! Reservation handles.

use crate::ids::{ItemId, OwnerId, SeatId, SessionId, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a completed order-creation saga.
///
/// Holding a `Reservation` means the ledger has the units locked, the seats
/// (if any) are in `Locking` under `owner_id`, and the order collaborator has
/// accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id
    pub id: Uuid,
    /// Who reserved
    pub owner_id: OwnerId,
    /// What was reserved
    pub item_id: ItemId,
    /// How many units
    pub quantity: u32,
    /// Seats held for this reservation
    pub seats: Vec<SeatId>,
    /// Session the seats belong to
    pub session_id: Option<SessionId>,
    /// Venue the seats belong to
    pub venue_id: Option<VenueId>,
    /// Reference returned by the order collaborator
    pub order_ref: Option<String>,
    /// When the saga completed
    pub created_at: DateTime<Utc>,
}

/// Why a reservation is being given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseReason {
    /// Buyer cancelled
    Cancelled,
    /// Payment was declined
    PaymentFailed,
    /// Order expired unpaid
    Timeout,
}

impl ReleaseReason {
    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::PaymentFailed => "payment_failed",
            Self::Timeout => "timeout",
        }
    }
}
