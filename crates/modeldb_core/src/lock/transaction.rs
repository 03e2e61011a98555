//! Per-thread lock transactions.

use super::history::{CallSite, LockPlan};
use super::{LockCoordinator, Lockable, RawLock};
use crate::error::{StoreError, StoreResult};
use crate::types::{LockId, TransactionId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockUpgradableReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
type UpgradeGuard = ArcRwLockUpgradableReadGuard<RawRwLock, ()>;
type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Rounds of batch acquisition attempted before preemption gives up.
const PREEMPTIVE_ROUNDS: usize = 8;

struct Held<G> {
    lock: Weak<RawLock>,
    guard: G,
}

impl<G> Held<G> {
    fn new(lock: &Arc<RawLock>, guard: G) -> Self {
        Self {
            lock: Arc::downgrade(lock),
            guard,
        }
    }
}

/// Guards held by a transaction, by mode.
///
/// A resource appears in at most one of the maps. While an upgrade intent is
/// being promoted its guard is owned by the waiting call, and the resource is
/// recorded in `promoting` instead.
#[derive(Default)]
struct HeldLocks {
    shared: BTreeMap<LockId, Held<SharedGuard>>,
    upgrade: BTreeMap<LockId, Held<UpgradeGuard>>,
    exclusive: BTreeMap<LockId, Held<ExclusiveGuard>>,
    promoting: Option<LockId>,
}

impl HeldLocks {
    fn holds(&self, id: LockId) -> bool {
        self.shared.contains_key(&id)
            || self.upgrade.contains_key(&id)
            || self.exclusive.contains_key(&id)
            || self.promoting == Some(id)
    }

    fn len(&self) -> usize {
        self.shared.len()
            + self.upgrade.len()
            + self.exclusive.len()
            + usize::from(self.promoting.is_some())
    }

    /// Releases exclusive locks first, then upgrade intents, then shared locks.
    fn release(&mut self) {
        self.exclusive.clear();
        self.upgrade.clear();
        self.shared.clear();
    }
}

/// The set of locks a thread currently holds.
///
/// Obtained from [`LockCoordinator::begin`]; all handles on one thread share
/// the same transaction. Locks are held until the last handle is dropped,
/// at which point they are released and recorded in the lock history.
///
/// Only the owning thread takes locks, but any thread may query what is
/// held. The bookkeeping mutex is never held across a blocking wait.
pub struct Transaction {
    id: TransactionId,
    owner: ThreadId,
    call_site: CallSite,
    coordinator: Arc<LockCoordinator>,
    held: Mutex<HeldLocks>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        owner: ThreadId,
        call_site: CallSite,
        coordinator: Arc<LockCoordinator>,
    ) -> Self {
        Self {
            id,
            owner,
            call_site,
            coordinator,
            held: Mutex::new(HeldLocks::default()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the source location that began this transaction.
    #[must_use]
    pub fn call_site(&self) -> CallSite {
        self.call_site
    }

    /// Returns the thread that began this transaction.
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Takes a shared lock on a resource.
    ///
    /// Does nothing if the transaction already holds any lock on it.
    pub fn get_shared_lock<R: Lockable + ?Sized>(&self, resource: &R) -> StoreResult<()> {
        self.ensure_owner()?;
        let cell = resource.lock_cell();
        let id = cell.id();
        if self.held.lock().holds(id) {
            return Ok(());
        }

        match cell.raw().try_read_arc_for(self.timeout()) {
            Some(guard) => {
                self.held.lock().shared.insert(id, Held::new(cell.raw(), guard));
                Ok(())
            }
            None => Err(self.deadlock(id, cell.raw())),
        }
    }

    /// Takes an exclusive lock on a resource.
    ///
    /// A shared lock already held is promoted: an upgrade intent is taken
    /// while the shared lock is still held, then the shared lock is dropped
    /// and the intent upgraded.
    pub fn get_exclusive_lock<R: Lockable + ?Sized>(&self, resource: &R) -> StoreResult<()> {
        self.ensure_owner()?;
        let cell = resource.lock_cell();
        let id = cell.id();
        let raw = cell.raw();
        let timeout = self.timeout();
        let (intent, shared) = {
            let mut held = self.held.lock();
            if held.exclusive.contains_key(&id) {
                return Ok(());
            }
            let intent = held.upgrade.remove(&id).map(|entry| entry.guard);
            if intent.is_some() {
                held.promoting = Some(id);
            }
            (intent, held.shared.contains_key(&id))
        };

        let intent = match intent {
            Some(intent) => intent,
            None if shared => match raw.try_upgradable_read_arc_for(timeout) {
                Some(intent) => {
                    let mut held = self.held.lock();
                    held.shared.remove(&id);
                    held.promoting = Some(id);
                    intent
                }
                None => return Err(self.deadlock(id, raw)),
            },
            None => {
                return match raw.try_write_arc_for(timeout) {
                    Some(guard) => {
                        self.held.lock().exclusive.insert(id, Held::new(raw, guard));
                        Ok(())
                    }
                    None => Err(self.deadlock(id, raw)),
                };
            }
        };

        let upgraded = ArcRwLockUpgradableReadGuard::try_upgrade_for(intent, timeout);
        let mut held = self.held.lock();
        held.promoting = None;
        match upgraded {
            Ok(guard) => {
                held.exclusive.insert(id, Held::new(raw, guard));
                Ok(())
            }
            Err(intent) => {
                held.upgrade.insert(id, Held::new(raw, intent));
                drop(held);
                Err(self.deadlock(id, raw))
            }
        }
    }

    /// Returns `true` if the transaction holds at least a shared lock on the resource.
    #[must_use]
    pub fn holds_shared<R: Lockable + ?Sized>(&self, resource: &R) -> bool {
        self.held.lock().holds(resource.lock_cell().id())
    }

    /// Returns `true` if the transaction holds an exclusive lock on the resource.
    #[must_use]
    pub fn holds_exclusive<R: Lockable + ?Sized>(&self, resource: &R) -> bool {
        self.held
            .lock()
            .exclusive
            .contains_key(&resource.lock_cell().id())
    }

    /// Returns the number of resources currently locked.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.held.lock().len()
    }

    fn ensure_owner(&self) -> StoreResult<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(StoreError::WrongThread)
        }
    }

    fn timeout(&self) -> Duration {
        self.coordinator.config().deadlock_timeout
    }

    /// Records a timed out resource as exclusive history and builds the error.
    fn deadlock(&self, id: LockId, lock: &Arc<RawLock>) -> StoreError {
        warn!("{} timed out waiting for {} (begun at {})", self.id, id, self.call_site);
        self.coordinator
            .record_exclusive(self.call_site, id, Arc::downgrade(lock));
        StoreError::Deadlock { resource: id }
    }

    /// Acquires the locks remembered for this call site.
    ///
    /// Each round tries every lock without blocking, exclusive locks first.
    /// On the first failure everything is released, the failing lock is
    /// awaited with the deadlock timeout, and the round restarts. Giving up
    /// is not an error: the operation simply takes its locks as it goes.
    pub(crate) fn acquire_preemptively(&self) {
        let config = self.coordinator.config();
        if !config.preemptive_locking {
            return;
        }
        let plan = self.coordinator.plan(self.call_site);
        if plan.len() < config.preemptive_threshold.max(1) {
            return;
        }

        let timeout = self.timeout();
        for _ in 0..PREEMPTIVE_ROUNDS {
            let Blocked { id, lock, exclusive } = {
                let mut held = self.held.lock();
                match try_acquire_all(&mut held, &plan) {
                    Ok(()) => {
                        debug!("{} pre-acquired {} locks", self.id, plan.len());
                        return;
                    }
                    Err(blocked) => {
                        held.release();
                        blocked
                    }
                }
            };

            let acquired = if exclusive {
                match lock.try_write_arc_for(timeout) {
                    Some(guard) => {
                        self.held.lock().exclusive.insert(id, Held::new(&lock, guard));
                        true
                    }
                    None => false,
                }
            } else {
                match lock.try_read_arc_for(timeout) {
                    Some(guard) => {
                        self.held.lock().shared.insert(id, Held::new(&lock, guard));
                        true
                    }
                    None => false,
                }
            };
            if !acquired {
                debug!("{} abandoned pre-acquisition on {}", self.id, id);
                return;
            }
        }
        debug!("{} gave up pre-acquisition after {} rounds", self.id, PREEMPTIVE_ROUNDS);
        self.held.lock().release();
    }
}

struct Blocked {
    id: LockId,
    lock: Arc<RawLock>,
    exclusive: bool,
}

fn try_acquire_all(held: &mut HeldLocks, plan: &LockPlan) -> Result<(), Blocked> {
    for (id, lock) in &plan.exclusive {
        if held.holds(*id) {
            continue;
        }
        match lock.try_write_arc() {
            Some(guard) => {
                held.exclusive.insert(*id, Held::new(lock, guard));
            }
            None => {
                return Err(Blocked {
                    id: *id,
                    lock: Arc::clone(lock),
                    exclusive: true,
                })
            }
        }
    }
    for (id, lock) in &plan.shared {
        if held.holds(*id) {
            continue;
        }
        match lock.try_read_arc() {
            Some(guard) => {
                held.shared.insert(*id, Held::new(lock, guard));
            }
            None => {
                return Err(Blocked {
                    id: *id,
                    lock: Arc::clone(lock),
                    exclusive: false,
                })
            }
        }
    }
    Ok(())
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let mut held = std::mem::take(self.held.get_mut());

        let exclusive: Vec<_> = held
            .exclusive
            .iter()
            .map(|(id, entry)| (*id, entry.lock.clone()))
            .collect();
        let shared: Vec<_> = held
            .shared
            .iter()
            .map(|(id, entry)| (*id, entry.lock.clone()))
            .collect();
        let released = exclusive.len() + shared.len() + held.upgrade.len();

        held.release();
        self.coordinator.deregister(self.owner, self.id);

        for (id, lock) in exclusive {
            self.coordinator.record_exclusive(self.call_site, id, lock);
        }
        for (id, lock) in shared {
            self.coordinator.record_shared(self.call_site, id, lock);
        }
        debug!("ended {} releasing {} locks", self.id, released);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("call_site", &self.call_site)
            .field("locks", &self.lock_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lock::LockCell;
    use std::sync::{mpsc, Barrier};
    use std::time::Instant;

    fn coordinator(timeout: Duration) -> Arc<LockCoordinator> {
        LockCoordinator::new(Config::default().deadlock_timeout(timeout))
    }

    #[test]
    fn shared_lock_is_idempotent() {
        let coordinator = coordinator(Duration::from_secs(5));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let txn = coordinator.begin();

        txn.get_shared_lock(&cell).unwrap();
        txn.get_shared_lock(&cell).unwrap();
        assert_eq!(txn.lock_count(), 1);
        assert!(txn.holds_shared(&cell));
        assert!(!txn.holds_exclusive(&cell));
    }

    #[test]
    fn shared_request_after_exclusive_keeps_exclusive() {
        let coordinator = coordinator(Duration::from_secs(5));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let txn = coordinator.begin();

        txn.get_exclusive_lock(&cell).unwrap();
        txn.get_shared_lock(&cell).unwrap();
        txn.get_exclusive_lock(&cell).unwrap();
        assert_eq!(txn.lock_count(), 1);
        assert!(txn.holds_exclusive(&cell));
        assert!(cell.raw().try_read().is_none());
    }

    #[test]
    fn shared_lock_promotes_to_exclusive() {
        let coordinator = coordinator(Duration::from_secs(5));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let txn = coordinator.begin();

        txn.get_shared_lock(&cell).unwrap();
        assert!(cell.raw().try_read().is_some());
        txn.get_exclusive_lock(&cell).unwrap();
        assert!(txn.holds_exclusive(&cell));
        assert!(cell.raw().try_read().is_none());

        drop(txn);
        assert!(cell.raw().try_write().is_some());
    }

    #[test]
    fn use_from_other_thread_fails() {
        let coordinator = coordinator(Duration::from_secs(5));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let txn = coordinator.begin();

        let result = thread::scope(|scope| {
            scope
                .spawn(|| txn.get_shared_lock(&cell))
                .join()
                .unwrap()
        });
        assert!(matches!(result, Err(StoreError::WrongThread)));
        assert_eq!(txn.lock_count(), 0);
    }

    #[test]
    fn blocked_request_reports_deadlock() {
        let coordinator = coordinator(Duration::from_millis(50));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let txn = coordinator.begin();
        txn.get_exclusive_lock(&cell).unwrap();

        let result = thread::scope(|scope| {
            scope
                .spawn(|| {
                    let other = coordinator.begin();
                    other.get_shared_lock(&cell)
                })
                .join()
                .unwrap()
        });
        match result {
            Err(StoreError::Deadlock { resource }) => assert_eq!(resource, cell.id()),
            other => panic!("expected deadlock, got {other:?}"),
        }
        assert_eq!(coordinator.history_stats().exclusive, 1);
    }

    #[test]
    fn crossed_lock_order_is_detected() {
        let coordinator = coordinator(Duration::from_millis(100));
        let first = LockCell::new(Arc::clone(&coordinator));
        let second = LockCell::new(Arc::clone(&coordinator));
        let barrier = Barrier::new(2);

        let (left, right) = thread::scope(|scope| {
            let left = scope.spawn(|| {
                let txn = coordinator.begin();
                txn.get_exclusive_lock(&first).unwrap();
                barrier.wait();
                txn.get_exclusive_lock(&second)
            });
            let right = scope.spawn(|| {
                let txn = coordinator.begin();
                txn.get_exclusive_lock(&second).unwrap();
                barrier.wait();
                txn.get_exclusive_lock(&first)
            });
            (left.join().unwrap(), right.join().unwrap())
        });

        let deadlocks = [&left, &right]
            .iter()
            .filter(|result| matches!(result, Err(err) if err.is_deadlock()))
            .count();
        assert!(deadlocks >= 1);
    }

    fn begin_here(coordinator: &Arc<LockCoordinator>) -> Arc<Transaction> {
        coordinator.begin()
    }

    #[test]
    fn remembered_locks_are_acquired_up_front() {
        let coordinator = coordinator(Duration::from_secs(5));
        let read = LockCell::new(Arc::clone(&coordinator));
        let write = LockCell::new(Arc::clone(&coordinator));
        {
            let txn = begin_here(&coordinator);
            txn.get_shared_lock(&read).unwrap();
            txn.get_exclusive_lock(&write).unwrap();
        }

        let txn = begin_here(&coordinator);
        assert_eq!(coordinator.history_for(txn.call_site()), 2);
        assert!(txn.holds_shared(&read));
        assert!(txn.holds_exclusive(&write));
    }

    fn warm_history(coordinator: &Arc<LockCoordinator>, cells: &[&LockCell]) {
        let txn = begin_here(coordinator);
        for cell in cells {
            txn.get_exclusive_lock(*cell).unwrap();
        }
    }

    #[test]
    fn preemption_waits_out_a_busy_lock_and_restarts() {
        let coordinator = coordinator(Duration::from_secs(5));
        let a = LockCell::new(Arc::clone(&coordinator));
        let b = LockCell::new(Arc::clone(&coordinator));
        warm_history(&coordinator, &[&a, &b]);

        let locked = Barrier::new(2);
        let txn = thread::scope(|scope| {
            scope.spawn(|| {
                let guard = b.raw().write();
                locked.wait();
                thread::sleep(Duration::from_millis(100));
                drop(guard);
            });
            locked.wait();
            begin_here(&coordinator)
        });

        assert_eq!(txn.lock_count(), 2);
        assert!(txn.holds_exclusive(&a));
        assert!(txn.holds_exclusive(&b));
    }

    #[test]
    fn preemption_is_abandoned_when_a_lock_stays_busy() {
        let coordinator = coordinator(Duration::from_millis(50));
        let a = LockCell::new(Arc::clone(&coordinator));
        let b = LockCell::new(Arc::clone(&coordinator));
        warm_history(&coordinator, &[&a, &b]);

        let locked = Barrier::new(2);
        let done = Barrier::new(2);
        let (count, a_free) = thread::scope(|scope| {
            scope.spawn(|| {
                let _guard = b.raw().write();
                locked.wait();
                done.wait();
            });
            locked.wait();
            let txn = begin_here(&coordinator);
            let state = (txn.lock_count(), a.raw().try_write().is_some());
            txn.get_exclusive_lock(&a).unwrap();
            done.wait();
            state
        });

        assert_eq!(count, 0);
        assert!(a_free);
    }

    #[test]
    fn held_locks_are_readable_during_a_wait() {
        let coordinator = coordinator(Duration::from_secs(1));
        let held = LockCell::new(Arc::clone(&coordinator));
        let busy = LockCell::new(Arc::clone(&coordinator));
        let blocker = busy.raw().write();
        let (sender, receiver) = mpsc::channel();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let txn = coordinator.begin();
                txn.get_shared_lock(&held).unwrap();
                sender.send(Arc::clone(&txn)).unwrap();
                txn.get_exclusive_lock(&busy)
            });

            let txn = receiver.recv().unwrap();
            thread::sleep(Duration::from_millis(50));
            let started = Instant::now();
            assert!(txn.holds_shared(&held));
            assert!(!txn.holds_shared(&busy));
            assert_eq!(txn.lock_count(), 1);
            assert!(started.elapsed() < Duration::from_millis(500));

            drop(txn);
            drop(blocker);
            waiter.join().unwrap().unwrap();
        });
    }

    #[test]
    fn promotion_keeps_resource_reported_as_held() {
        let coordinator = coordinator(Duration::from_secs(1));
        let cell = LockCell::new(Arc::clone(&coordinator));
        let reader = cell.raw().read();
        let (sender, receiver) = mpsc::channel();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let txn = coordinator.begin();
                txn.get_shared_lock(&cell).unwrap();
                sender.send(Arc::clone(&txn)).unwrap();
                txn.get_exclusive_lock(&cell)
            });

            let txn = receiver.recv().unwrap();
            thread::sleep(Duration::from_millis(50));
            assert!(txn.holds_shared(&cell));
            assert!(!txn.holds_exclusive(&cell));
            assert_eq!(txn.lock_count(), 1);

            drop(txn);
            drop(reader);
            waiter.join().unwrap().unwrap();
        });
    }

    #[test]
    fn preemption_respects_threshold() {
        let coordinator = LockCoordinator::new(Config::default().preemptive_threshold(3));
        let a = LockCell::new(Arc::clone(&coordinator));
        let b = LockCell::new(Arc::clone(&coordinator));
        {
            let txn = begin_here(&coordinator);
            txn.get_exclusive_lock(&a).unwrap();
            txn.get_exclusive_lock(&b).unwrap();
        }

        let txn = begin_here(&coordinator);
        assert_eq!(txn.lock_count(), 0);
    }

    #[test]
    fn upgraded_locks_are_remembered_as_exclusive() {
        let coordinator = LockCoordinator::new(Config::default().preemptive_locking(false));
        let cell = LockCell::new(Arc::clone(&coordinator));
        {
            let txn = coordinator.begin();
            txn.get_shared_lock(&cell).unwrap();
            txn.get_exclusive_lock(&cell).unwrap();
        }
        let stats = coordinator.history_stats();
        assert_eq!(stats.exclusive, 1);
        assert_eq!(stats.shared, 0);
    }
}
