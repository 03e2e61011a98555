//! Transaction registry and lock history owner.

use super::history::{CallSite, LockHistory, LockPlan};
use super::{RawLock, Transaction};
use crate::config::Config;
use crate::types::{LockId, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Sizes of the lock history tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    /// Remembered shared (call site, resource) pairs.
    pub shared: usize,
    /// Remembered exclusive (call site, resource) pairs.
    pub exclusive: usize,
}

/// Hands out per-thread transactions and keeps the lock history.
///
/// A coordinator is shared by every lockable resource of a database. At most
/// one transaction per thread is live in a coordinator at any time; nested
/// calls to [`begin`](Self::begin) join it.
pub struct LockCoordinator {
    config: Config,
    next_txn_id: AtomicU64,
    transactions: Mutex<HashMap<ThreadId, (TransactionId, Weak<Transaction>)>>,
    history: Mutex<LockHistory>,
}

impl LockCoordinator {
    /// Creates a new coordinator.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_txn_id: AtomicU64::new(1),
            transactions: Mutex::new(HashMap::new()),
            history: Mutex::new(LockHistory::default()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the calling thread's transaction, beginning one if needed.
    ///
    /// A new transaction remembers the caller's source location. If that
    /// location has needed enough resources before, they are acquired
    /// before this returns.
    #[track_caller]
    pub fn begin(self: &Arc<Self>) -> Arc<Transaction> {
        self.begin_at(CallSite::caller())
    }

    /// Like [`begin`](Self::begin), for a transaction begun implicitly by
    /// an operation on `resource`.
    #[track_caller]
    pub fn begin_on(self: &Arc<Self>, resource: LockId) -> Arc<Transaction> {
        self.begin_at(CallSite::caller_on(resource))
    }

    fn begin_at(self: &Arc<Self>, site: CallSite) -> Arc<Transaction> {
        if let Some(existing) = self.current() {
            return existing;
        }

        let owner = thread::current().id();
        let id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::Relaxed));
        let txn = Arc::new(Transaction::new(id, owner, site, Arc::clone(self)));
        txn.acquire_preemptively();

        self.transactions
            .lock()
            .insert(owner, (id, Arc::downgrade(&txn)));
        debug!("began {} at {}", id, txn.call_site());
        txn
    }

    /// Returns the calling thread's live transaction, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Transaction>> {
        let owner = thread::current().id();
        self.transactions
            .lock()
            .get(&owner)
            .and_then(|(_, txn)| txn.upgrade())
    }

    /// Returns the number of live transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.transactions
            .lock()
            .values()
            .filter(|(_, txn)| txn.strong_count() > 0)
            .count()
    }

    /// Returns the sizes of the lock history tables.
    #[must_use]
    pub fn history_stats(&self) -> HistoryStats {
        let history = self.history.lock();
        HistoryStats {
            shared: history.shared_len(),
            exclusive: history.exclusive_len(),
        }
    }

    /// Returns how many resources are remembered for a call site.
    #[must_use]
    pub fn history_for(&self, site: CallSite) -> usize {
        self.history.lock().entries_for(site)
    }

    /// Forgets a resource that is being destroyed.
    pub fn remove_lockable(&self, id: LockId) {
        self.history.lock().remove_resource(id);
    }

    pub(crate) fn deregister(&self, owner: ThreadId, id: TransactionId) {
        let mut transactions = self.transactions.lock();
        if transactions.get(&owner).is_some_and(|(current, _)| *current == id) {
            transactions.remove(&owner);
        }
    }

    pub(crate) fn record_shared(&self, site: CallSite, id: LockId, lock: Weak<RawLock>) {
        self.history.lock().record_shared(site, id, lock);
    }

    pub(crate) fn record_exclusive(&self, site: CallSite, id: LockId, lock: Weak<RawLock>) {
        self.history.lock().record_exclusive(site, id, lock);
    }

    pub(crate) fn plan(&self, site: CallSite) -> LockPlan {
        self.history.lock().plan(site)
    }
}
