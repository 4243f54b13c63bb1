//! Compensation tasks.
//!
//! When a saga step's undo action fails, the undo is captured as a
//! [`CompensationTask`] instead of being dropped. A background worker
//! re-runs the [`CompensationAction`] with backoff until it succeeds or the
//! task is marked [`CompensationStatus::Terminal`].

use crate::ids::{ItemId, OwnerId, SeatId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An undo action that can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CompensationAction {
    /// Give units back to the fast-path counter.
    RollbackFastPath {
        /// Item
        item_id: ItemId,
        /// Units to give back
        quantity: u32,
        /// Counter cap (the item's total units). Read from the ledger when
        /// unknown at scheduling time.
        max_units: Option<u32>,
    },
    /// Release locked units on the ledger.
    ReleaseReservation {
        /// Item
        item_id: ItemId,
        /// Units to release
        quantity: u32,
    },
    /// Release a seat lock.
    UnlockSeat {
        /// Seat
        seat_id: SeatId,
        /// Session
        session_id: SessionId,
        /// Expected holder
        owner_id: OwnerId,
    },
}

impl CompensationAction {
    /// Action name, used in storage and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RollbackFastPath { .. } => "rollback-fast-path",
            Self::ReleaseReservation { .. } => "release-reservation",
            Self::UnlockSeat { .. } => "unlock-seat",
        }
    }

    /// Key of the resource the action corrects.
    #[must_use]
    pub fn resource_key(&self) -> String {
        match self {
            Self::RollbackFastPath { item_id, .. } => format!("stock:ticket:{item_id}"),
            Self::ReleaseReservation { item_id, .. } => format!("ledger:{item_id}"),
            Self::UnlockSeat {
                seat_id, session_id, ..
            } => format!("seat:{session_id}:{seat_id}"),
        }
    }
}

/// Lifecycle of a compensation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompensationStatus {
    /// Waiting for (another) attempt
    Pending,
    /// Undo applied
    Resolved,
    /// Retries exhausted; needs an operator
    Terminal,
}

impl CompensationStatus {
    /// Convert to database string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Terminal => "terminal",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }
}

/// A queued undo action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationTask {
    /// Task id
    pub id: Uuid,
    /// Resource the action corrects
    pub resource_key: String,
    /// What to replay
    pub action: CompensationAction,
    /// Worker attempts so far
    pub attempts: u32,
    /// Most recent failure
    pub last_error: Option<String>,
    /// Lifecycle state
    pub status: CompensationStatus,
    /// When the task was queued
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Earliest time the worker may pick it up
    pub next_attempt_at: DateTime<Utc>,
}

impl CompensationTask {
    /// New pending task, due immediately.
    #[must_use]
    pub fn new(action: CompensationAction, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_key: action.resource_key(),
            action,
            attempts: 0,
            last_error: Some(error.into()),
            status: CompensationStatus::Pending,
            created_at: now,
            updated_at: now,
            next_attempt_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_with_kind_tag() {
        let action = CompensationAction::ReleaseReservation {
            item_id: ItemId::new("T1"),
            quantity: 2,
        };
        let json = serde_json::to_value(&action).unwrap_or_default();
        assert_eq!(json["kind"], "release-reservation");
        assert_eq!(json["item_id"], "T1");
        assert_eq!(action.as_str(), "release-reservation");
    }

    #[test]
    fn new_task_is_pending_and_keyed_by_resource() {
        let action = CompensationAction::RollbackFastPath {
            item_id: ItemId::new("T1"),
            quantity: 1,
            max_units: Some(5),
        };
        let task = CompensationTask::new(action, "cache down", Utc::now());
        assert_eq!(task.status, CompensationStatus::Pending);
        assert_eq!(task.resource_key, "stock:ticket:T1");
        assert_eq!(task.attempts, 0);
    }
}
