//! Integration tests for transactions across stores and threads.

use modeldb_core::{Config, Handle, Model, ModelId, ModelStore, StoreError, StoreResult};
use modeldb_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn short_timeout(preemptive: bool) -> Fixture {
    let config = Config::default()
        .deadlock_timeout(Duration::from_millis(100))
        .preemptive_locking(preemptive);
    Fixture::with_options(FixtureOptions::default().config(config))
}

#[test]
fn operations_join_the_callers_transaction() {
    with_fixture(|fx| {
        let txn = fx.db.transaction();
        fx.add_person("ann", 1);
        fx.people.get_all().unwrap();
        fx.groups.get_all().unwrap();

        assert_eq!(fx.db.coordinator().active_transactions(), 1);
        assert!(txn.holds_exclusive(&*fx.people));
        assert!(txn.holds_shared(&*fx.groups));
        assert!(!txn.holds_exclusive(&*fx.groups));
        drop(txn);
        assert_eq!(fx.db.coordinator().active_transactions(), 0);
    });
}

#[test]
fn shared_lock_upgrades_within_transaction() {
    with_fixture(|fx| {
        let txn = fx.db.transaction();
        fx.people.len().unwrap();
        fx.people.len().unwrap();
        assert!(txn.holds_shared(&*fx.people));

        fx.add_person("ann", 1);
        assert!(txn.holds_exclusive(&*fx.people));
        assert_eq!(fx.people.len().unwrap(), 1);
    });
}

#[test]
fn writers_wait_for_transaction_end() {
    let fx = Fixture::new();
    let txn = fx.db.transaction();
    fx.add_person("ann", 1);

    thread::scope(|scope| {
        let writer = scope.spawn(|| fx.people.store(&Handle::new(Person::new("bob", 2))));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fx.people.len().unwrap(), 1);
        drop(txn);
        writer.join().unwrap().unwrap();
    });
    assert_eq!(fx.people.len().unwrap(), 2);
}

#[test]
fn transaction_is_confined_to_its_thread() {
    let fx = Fixture::new();
    let txn = fx.db.transaction();
    let people = Arc::clone(&fx.people);

    let result = thread::spawn(move || txn.get_shared_lock(&*people))
        .join()
        .unwrap();
    assert!(matches!(result, Err(StoreError::WrongThread)));
}

#[test]
fn crossed_lock_order_reports_deadlock() {
    let fx = short_timeout(false);
    let barrier = Barrier::new(2);

    let results: Vec<Result<(), StoreError>> = thread::scope(|scope| {
        let forward = scope.spawn(|| {
            let _txn = fx.db.transaction();
            fx.people.store(&Handle::new(Person::new("ann", 1)))?;
            barrier.wait();
            fx.groups.store(&Handle::new(Group::new("club", None)))?;
            Ok(())
        });
        let backward = scope.spawn(|| {
            let _txn = fx.db.transaction();
            fx.groups.store(&Handle::new(Group::new("band", None)))?;
            barrier.wait();
            fx.people.store(&Handle::new(Person::new("bob", 2)))?;
            Ok(())
        });
        vec![forward.join().unwrap(), backward.join().unwrap()]
    });

    assert!(results
        .iter()
        .any(|result| matches!(result, Err(err) if err.is_deadlock())));
    assert!(fx.db.coordinator().history_stats().exclusive > 0);
}

#[test]
fn retry_recovers_from_crossed_lock_order() {
    let fx = short_timeout(true);
    let config = StressConfig {
        operations: 10,
        threads: 2,
        attempts: 50,
    };

    let result = stress_crossed_locks(&fx, &config);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.successful_ops, 20);
    assert_eq!(fx.people.len().unwrap(), 20);
    assert_eq!(fx.groups.len().unwrap(), 20);
}

#[test]
fn concurrent_lifecycles_leave_nothing_behind() {
    let fx = Fixture::new();
    let config = StressConfig {
        operations: 25,
        threads: 4,
        ..Default::default()
    };

    let result = stress_store_and_erase(&fx, &config);
    assert_eq!(result.successful_ops, 100);
    assert!(fx.people.is_empty().unwrap());
    assert!(fx.groups.is_empty().unwrap());
    assert!(fx.memberships.is_empty().unwrap());
    assert_eq!(
        fx.groups.get_index(&[Group::FOUNDER]).unwrap().len().unwrap(),
        0
    );
}

fn put<T: Model>(store: &ModelStore<T>, instance: T) -> StoreResult<ModelId> {
    store.store(&Handle::new(instance))
}

#[test]
fn lock_history_is_kept_per_store() {
    let config = Config::default().deadlock_timeout(Duration::from_secs(2));
    let fx = Fixture::with_options(FixtureOptions::default().config(config));
    for n in 0..3_u64 {
        put(&fx.groups, Group::new(format!("g{n}"), None)).unwrap();
        put(&fx.people, Person::new(format!("p{n}"), n)).unwrap();
    }

    let locked = Barrier::new(2);
    let done = Barrier::new(2);
    let (result, elapsed) = thread::scope(|scope| {
        scope.spawn(|| {
            let txn = fx.db.transaction();
            txn.get_exclusive_lock(&*fx.groups).unwrap();
            locked.wait();
            done.wait();
        });
        locked.wait();
        let started = Instant::now();
        let result = put(&fx.people, Person::new("late", 9));
        let elapsed = started.elapsed();
        done.wait();
        (result, elapsed)
    });

    result.unwrap();
    assert!(elapsed < Duration::from_secs(1), "people.store waited {elapsed:?}");
    assert_eq!(fx.people.len().unwrap(), 4);
}
