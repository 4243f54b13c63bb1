//! Stock ledger records.
//!
//! A [`StockRecord`] is the durable, authoritative count for one item. The
//! only legal ways to change `locked_units` and `sold_units` are the three
//! [`StockMutation`]s; [`StockRecord::apply`] validates each one and returns
//! the next record with its version bumped. Stores then persist that record
//! with a compare-and-swap on the version the caller read.

use crate::error::{InventoryError, Result};
use crate::ids::ItemId;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Durable per-item stock counters.
///
/// Invariant: `locked_units + sold_units <= total_units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Item key
    pub item_id: ItemId,
    /// Units ever sellable
    pub total_units: u32,
    /// Units held by in-flight reservations
    pub locked_units: u32,
    /// Units committed to paid orders
    pub sold_units: u32,
    /// Optimistic concurrency token
    pub version: i64,
}

impl StockRecord {
    /// Fresh record with nothing locked or sold.
    #[must_use]
    pub fn new(item_id: ItemId, total_units: u32) -> Self {
        Self {
            item_id,
            total_units,
            locked_units: 0,
            sold_units: 0,
            version: 0,
        }
    }

    /// Units neither locked nor sold.
    #[must_use]
    pub const fn available_units(&self) -> u32 {
        self.total_units
            .saturating_sub(self.locked_units)
            .saturating_sub(self.sold_units)
    }

    /// Whether the record satisfies the no-oversell invariant.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        (self.locked_units as u64) + (self.sold_units as u64) <= self.total_units as u64
    }

    /// Validate `mutation` and return the record it produces.
    ///
    /// The returned record carries `version + 1`.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InsufficientStock`] when reserving more than is available
    /// - [`InventoryError::InvalidState`] when releasing or committing more than is locked,
    ///   or when the quantity is zero
    pub fn apply(&self, mutation: StockMutation) -> Result<Self> {
        let quantity = mutation.quantity();
        if quantity == 0 {
            return Err(InventoryError::InvalidState(format!(
                "{} of zero units on {}",
                mutation.operation(),
                self.item_id
            )));
        }

        let mut next = self.clone();
        match mutation {
            StockMutation::Reserve(qty) => {
                let available = self.available_units();
                if available < qty {
                    return Err(InventoryError::InsufficientStock {
                        item_id: self.item_id.clone(),
                        requested: qty,
                        available,
                    });
                }
                next.locked_units += qty;
            }
            StockMutation::Release(qty) => {
                next.locked_units = self.locked_units.checked_sub(qty).ok_or_else(|| {
                    self.not_enough_locked(mutation)
                })?;
            }
            StockMutation::Commit(qty) => {
                next.locked_units = self.locked_units.checked_sub(qty).ok_or_else(|| {
                    self.not_enough_locked(mutation)
                })?;
                next.sold_units += qty;
            }
        }
        next.version += 1;
        Ok(next)
    }

    fn not_enough_locked(&self, mutation: StockMutation) -> InventoryError {
        InventoryError::InvalidState(format!(
            "cannot {} {} units on {}: only {} locked",
            mutation.operation(),
            mutation.quantity(),
            self.item_id,
            self.locked_units
        ))
    }
}

/// The three legal ledger transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMutation {
    /// available -> locked
    Reserve(u32),
    /// locked -> available
    Release(u32),
    /// locked -> sold
    Commit(u32),
}

impl StockMutation {
    /// Units moved by this mutation.
    #[must_use]
    pub const fn quantity(self) -> u32 {
        match self {
            Self::Reserve(q) | Self::Release(q) | Self::Commit(q) => q,
        }
    }

    /// Operation tag for this mutation.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::Reserve(_) => Operation::Reserve,
            Self::Release(_) => Operation::Release,
            Self::Commit(_) => Operation::Commit,
        }
    }
}

/// Coarse classification of how much of an item is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StockLevel {
    /// Nothing left
    SoldOut,
    /// Under 5% left
    Critical,
    /// Under 10% left
    Low,
    /// Under 20% left
    Warning,
    /// 20% or more left
    Healthy,
}

impl StockLevel {
    /// Classify `available` out of `total`.
    #[must_use]
    pub const fn classify(available: u32, total: u32) -> Self {
        if available == 0 || total == 0 {
            return Self::SoldOut;
        }
        let available = available as u64 * 100;
        let total = total as u64;
        if available < total * 5 {
            Self::Critical
        } else if available < total * 10 {
            Self::Low
        } else if available < total * 20 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    /// Label used in metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SoldOut => "sold_out",
            Self::Critical => "critical",
            Self::Low => "low",
            Self::Warning => "warning",
            Self::Healthy => "healthy",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(total: u32) -> StockRecord {
        StockRecord::new(ItemId::new("T1"), total)
    }

    #[test]
    fn reserve_locks_units_and_bumps_version() {
        let next = record(5).apply(StockMutation::Reserve(2)).unwrap();
        assert_eq!(next.locked_units, 2);
        assert_eq!(next.available_units(), 3);
        assert_eq!(next.version, 1);
    }

    #[test]
    fn reserve_beyond_available_is_insufficient() {
        let err = record(1).apply(StockMutation::Reserve(2)).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock { requested: 2, available: 1, .. }
        ));
    }

    #[test]
    fn release_more_than_locked_is_invalid() {
        let locked = record(5).apply(StockMutation::Reserve(1)).unwrap();
        let err = locked.apply(StockMutation::Release(2)).unwrap_err();
        assert!(matches!(err, InventoryError::InvalidState(_)));
    }

    #[test]
    fn commit_moves_locked_to_sold() {
        let locked = record(5).apply(StockMutation::Reserve(5)).unwrap();
        let sold = locked.apply(StockMutation::Commit(5)).unwrap();
        assert_eq!(sold.locked_units, 0);
        assert_eq!(sold.sold_units, 5);
        assert_eq!(sold.available_units(), 0);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(record(5).apply(StockMutation::Reserve(0)).is_err());
    }

    #[test]
    fn stock_levels_follow_thresholds() {
        assert_eq!(StockLevel::classify(0, 100), StockLevel::SoldOut);
        assert_eq!(StockLevel::classify(4, 100), StockLevel::Critical);
        assert_eq!(StockLevel::classify(5, 100), StockLevel::Low);
        assert_eq!(StockLevel::classify(19, 100), StockLevel::Warning);
        assert_eq!(StockLevel::classify(20, 100), StockLevel::Healthy);
    }

    fn mutation() -> impl Strategy<Value = StockMutation> {
        prop_oneof![
            (1u32..5).prop_map(StockMutation::Reserve),
            (1u32..5).prop_map(StockMutation::Release),
            (1u32..5).prop_map(StockMutation::Commit),
        ]
    }

    proptest! {
        #[test]
        fn no_sequence_of_transitions_oversells(total in 0u32..20, steps in prop::collection::vec(mutation(), 0..40)) {
            let mut current = record(total);
            for m in steps {
                if let Ok(next) = current.apply(m) {
                    prop_assert_eq!(next.version, current.version + 1);
                    current = next;
                }
                prop_assert!(current.is_consistent());
            }
        }
    }
}
