//! Seat lock records.
//!
//! A seat lock lives in two places: a durable [`SeatLockRecord`] row keyed by
//! (seat, session), and a short-lived [`SeatLockCacheEntry`] under
//! `seat_lock:{seat}`. The durable row wins whenever the two disagree.

use crate::ids::{OwnerId, SeatId, SessionId, VenueId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a seat is being held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    /// Held while the buyer is choosing seats
    Selection,
    /// Held by an order awaiting payment
    Order,
}

impl LockKind {
    /// Storage code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Selection => 1,
            Self::Order => 2,
        }
    }

    /// Parse a storage code.
    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Selection),
            2 => Some(Self::Order),
            _ => None,
        }
    }
}

/// Durable lock state.
///
/// `Locking -> Confirmed` on payment, `Locking -> Released` on unlock or
/// expiry. A released seat may be locked again with a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeatLockState {
    /// Held, not yet paid
    Locking,
    /// Given up or expired
    Released,
    /// Paid
    Confirmed,
}

impl SeatLockState {
    /// Convert to database string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locking => "locking",
            Self::Released => "released",
            Self::Confirmed => "confirmed",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "locking" => Some(Self::Locking),
            "released" => Some(Self::Released),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }

    /// Whether this state excludes other owners.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Locking | Self::Confirmed)
    }
}

/// Durable seat lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLockRecord {
    /// Seat being held
    pub seat_id: SeatId,
    /// Session the hold applies to
    pub session_id: SessionId,
    /// Venue of the session
    pub venue_id: VenueId,
    /// Holder
    pub owner_id: OwnerId,
    /// Selection or order hold
    pub lock_kind: LockKind,
    /// When the hold was taken
    pub acquired_at: DateTime<Utc>,
    /// When the sweep may reclaim it
    pub expires_at: DateTime<Utc>,
    /// Current state
    pub state: SeatLockState,
}

impl SeatLockRecord {
    /// Whether `owner` holds this record.
    #[must_use]
    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        &self.owner_id == owner
    }

    /// Whether a `Locking` row has passed its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == SeatLockState::Locking && self.expires_at <= now
    }

    /// The cache value mirroring this row.
    #[must_use]
    pub fn cache_entry(&self) -> SeatLockCacheEntry {
        SeatLockCacheEntry {
            owner_id: self.owner_id.clone(),
            locked_at_ms: self.acquired_at.timestamp_millis(),
        }
    }
}

/// Cache value under `seat_lock:{seat}`, encoded as `owner:timestampMillis`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLockCacheEntry {
    /// Holder
    pub owner_id: OwnerId,
    /// Acquisition time in epoch milliseconds
    pub locked_at_ms: i64,
}

impl SeatLockCacheEntry {
    /// Cache key prefix.
    pub const KEY_PREFIX: &'static str = "seat_lock:";

    /// Entry for `owner` taken at `at`.
    #[must_use]
    pub fn new(owner_id: OwnerId, at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            locked_at_ms: at.timestamp_millis(),
        }
    }

    /// Cache key for `seat`.
    #[must_use]
    pub fn key(seat: &SeatId) -> String {
        format!("{}{seat}", Self::KEY_PREFIX)
    }

    /// Encode as the cache value.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.owner_id, self.locked_at_ms)
    }

    /// Decode a cache value. Splits on the last `:` so owners may contain colons.
    #[must_use]
    pub fn decode(value: &str) -> Option<Self> {
        let (owner, ts) = value.rsplit_once(':')?;
        if owner.is_empty() {
            return None;
        }
        let locked_at_ms = ts.parse().ok()?;
        Some(Self {
            owner_id: OwnerId::new(owner),
            locked_at_ms,
        })
    }
}
