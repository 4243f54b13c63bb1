//! Fault injection for in-memory providers.

use boxoffice_core::{InventoryError, Operation, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Fails calls tagged with a given [`Operation`].
///
/// Each in-memory provider owns one injector, so a fault armed on the seat
/// lock repository does not affect the seat lock cache.
///
/// # Example
///
/// ```
/// use boxoffice_core::Operation;
/// use boxoffice_testing::FaultInjector;
///
/// let faults = FaultInjector::default();
/// faults.fail_next(Operation::Release, 1);
/// assert!(faults.check_database(Operation::Release).is_err());
/// assert!(faults.check_database(Operation::Release).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    remaining: Arc<Mutex<HashMap<Operation, usize>>>,
}

impl FaultInjector {
    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: Operation, times: usize) {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, times);
    }

    /// Fail every call of `op` until [`clear`](Self::clear).
    pub fn fail_always(&self, op: Operation) {
        self.fail_next(op, usize::MAX);
    }

    /// Stop failing `op`.
    pub fn clear(&self, op: Operation) {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op);
    }

    /// Whether the current call of `op` should fail. Consumes one armed failure.
    #[must_use]
    pub fn should_fail(&self, op: Operation) -> bool {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        match remaining.get_mut(&op) {
            Some(0) | None => false,
            Some(n) => {
                if *n != usize::MAX {
                    *n -= 1;
                }
                true
            }
        }
    }

    /// `Err(Database)` if `op` should fail.
    ///
    /// # Errors
    ///
    /// Returns an injected [`InventoryError::Database`].
    pub fn check_database(&self, op: Operation) -> Result<()> {
        if self.should_fail(op) {
            return Err(InventoryError::Database(format!("injected {op} failure")));
        }
        Ok(())
    }

    /// `Err(Cache)` if `op` should fail.
    ///
    /// # Errors
    ///
    /// Returns an injected [`InventoryError::Cache`].
    pub fn check_cache(&self, op: Operation) -> Result<()> {
        if self.should_fail(op) {
            return Err(InventoryError::Cache(format!("injected {op} failure")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_always_persists_until_cleared() {
        let faults = FaultInjector::default();
        faults.fail_always(Operation::Rollback);
        for _ in 0..5 {
            assert!(faults.check_cache(Operation::Rollback).is_err());
        }
        faults.clear(Operation::Rollback);
        assert!(faults.check_cache(Operation::Rollback).is_ok());
    }

    #[test]
    fn faults_are_scoped_to_their_operation() {
        let faults = FaultInjector::default();
        faults.fail_next(Operation::LockSeat, 2);
        assert!(faults.check_database(Operation::UnlockSeat).is_ok());
        assert!(faults.check_database(Operation::LockSeat).is_err());
        assert!(faults.check_database(Operation::LockSeat).is_err());
        assert!(faults.check_database(Operation::LockSeat).is_ok());
    }
}
