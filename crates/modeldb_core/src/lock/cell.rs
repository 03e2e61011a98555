//! Lockable resources.

use super::{LockCoordinator, RawLock, Transaction};
use crate::error::StoreResult;
use crate::types::LockId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A resource that can be locked inside a [`Transaction`].
pub trait Lockable {
    /// Returns the lock guarding this resource.
    fn lock_cell(&self) -> &LockCell;
}

/// A reader/writer lock with a process-unique id.
///
/// Dropping a cell purges it from the coordinator's lock history.
pub struct LockCell {
    id: LockId,
    lock: Arc<RawLock>,
    coordinator: Arc<LockCoordinator>,
}

impl LockCell {
    /// Creates a new lock registered with the given coordinator.
    pub fn new(coordinator: Arc<LockCoordinator>) -> Self {
        Self {
            id: LockId::new(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed)),
            lock: Arc::new(RawLock::new(())),
            coordinator,
        }
    }

    /// Returns the lock's id.
    #[must_use]
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Returns the coordinator this lock belongs to.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<LockCoordinator> {
        &self.coordinator
    }

    pub(crate) fn raw(&self) -> &Arc<RawLock> {
        &self.lock
    }

    /// Returns the calling thread's transaction, beginning one if needed.
    #[track_caller]
    pub fn begin(&self) -> Arc<Transaction> {
        self.coordinator.begin_on(self.id)
    }

    /// Joins or begins a transaction and takes a shared lock on this cell.
    ///
    /// A new transaction is keyed by the caller's location and this cell.
    #[track_caller]
    pub fn lock_shared(&self) -> StoreResult<Arc<Transaction>> {
        let txn = self.coordinator.begin_on(self.id);
        txn.get_shared_lock(self)?;
        Ok(txn)
    }

    /// Joins or begins a transaction and takes an exclusive lock on this cell.
    #[track_caller]
    pub fn lock_exclusive(&self) -> StoreResult<Arc<Transaction>> {
        let txn = self.coordinator.begin_on(self.id);
        txn.get_exclusive_lock(self)?;
        Ok(txn)
    }
}

impl Lockable for LockCell {
    fn lock_cell(&self) -> &LockCell {
        self
    }
}

impl Drop for LockCell {
    fn drop(&mut self) {
        self.coordinator.remove_lockable(self.id);
    }
}

impl fmt::Debug for LockCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockCell").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn ids_are_unique_and_increasing() {
        let coordinator = LockCoordinator::new(Config::default());
        let a = LockCell::new(Arc::clone(&coordinator));
        let b = LockCell::new(Arc::clone(&coordinator));
        assert!(a.id() < b.id());
    }

    #[test]
    fn lock_exclusive_joins_thread_transaction() {
        let coordinator = LockCoordinator::new(Config::default());
        let cell = LockCell::new(Arc::clone(&coordinator));

        let outer = coordinator.begin();
        let inner = cell.lock_exclusive().unwrap();
        assert!(Arc::ptr_eq(&outer, &inner));
        assert!(outer.holds_exclusive(&cell));
    }

    #[test]
    fn call_site_is_keyed_by_cell() {
        let coordinator = LockCoordinator::new(Config::default());
        let cells = [
            LockCell::new(Arc::clone(&coordinator)),
            LockCell::new(Arc::clone(&coordinator)),
        ];

        let sites: Vec<_> = cells
            .iter()
            .map(|cell| cell.lock_exclusive().unwrap().call_site())
            .collect();
        assert_eq!(sites[0].location(), sites[1].location());
        assert_eq!(sites[0].anchor(), Some(cells[0].id()));
        assert_ne!(sites[0], sites[1]);
    }

    #[test]
    fn locks_release_with_transaction() {
        let coordinator = LockCoordinator::new(Config::default());
        let cell = LockCell::new(Arc::clone(&coordinator));

        let txn = cell.lock_exclusive().unwrap();
        assert!(cell.raw().try_read().is_none());
        drop(txn);
        assert!(cell.raw().try_read().is_some());
    }
}
