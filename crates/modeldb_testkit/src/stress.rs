//! Stress tests for ModelDB.
//!
//! These drivers run concurrent workloads against a [`Fixture`] and count
//! how many operations succeeded, and how many deadlocks were reported and
//! retried along the way.

use crate::fixtures::{Fixture, Group, Person};
use modeldb_core::{Handle, StoreError, StoreResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Operations that eventually succeeded.
    pub successful_ops: usize,
    /// Operations that failed after all retries.
    pub failed_ops: usize,
    /// Deadlocks reported, including the ones retried away.
    pub deadlocks: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    fn new(successful: usize, failed: usize, deadlocks: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            deadlocks,
            duration,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Deadlocks: {}", self.deadlocks);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Attempts per operation before giving up on deadlocks.
    pub attempts: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            attempts: 20,
        }
    }
}

#[derive(Default)]
struct Counters {
    successful: AtomicUsize,
    failed: AtomicUsize,
    deadlocks: AtomicUsize,
}

impl Counters {
    fn record(&self, result: StoreResult<()>) {
        match result {
            Ok(()) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn counted<R>(&self, result: StoreResult<R>) -> StoreResult<R> {
        if matches!(result, Err(StoreError::Deadlock { .. })) {
            self.deadlocks.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn finish(self, started: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.into_inner(),
            self.failed.into_inner(),
            self.deadlocks.into_inner(),
            started.elapsed(),
        )
    }
}

/// Each thread repeatedly creates a person, a group founded by them and a
/// membership, then erases the person, which cascades to the rest.
///
/// Every iteration runs in one transaction, so the stores are always locked
/// in the same order.
pub fn stress_store_and_erase(fx: &Fixture, config: &StressConfig) -> StressTestResult {
    let counters = Counters::default();
    let started = Instant::now();

    thread::scope(|scope| {
        for worker in 0..config.threads {
            let counters = &counters;
            scope.spawn(move || {
                for op in 0..config.operations {
                    let person = Handle::new(Person::new(format!("w{worker}-{op}"), op as u64));
                    let group = Handle::new(Group::new(format!("g{worker}-{op}"), None));
                    let result = fx.db.retry_on_deadlock(config.attempts, || {
                        counters.counted(lifecycle(fx, &person, &group))
                    });
                    counters.record(result);
                }
            });
        }
    });

    counters.finish(started)
}

fn lifecycle(fx: &Fixture, person: &Handle<Person>, group: &Handle<Group>) -> StoreResult<()> {
    let _txn = fx.db.transaction();
    let person_id = fx.people.store(person)?;
    fx.groups.update(group, |group| group.founder = Some(person_id))?;
    let group_id = fx.groups.store(group)?;
    fx.memberships.store(person_id, group_id)?;
    fx.people.erase(person)
}

/// Pairs of threads lock the people and groups stores in opposite orders.
///
/// Storing a handle twice is a no-op, so a retried attempt never leaves
/// duplicates behind.
///
/// The first collisions end in deadlocks; once the lock history of both
/// call sites names both stores, later transactions acquire them up front
/// in a common order. Configure a short deadlock timeout before running.
pub fn stress_crossed_locks(fx: &Fixture, config: &StressConfig) -> StressTestResult {
    let counters = Counters::default();
    let started = Instant::now();

    thread::scope(|scope| {
        for worker in 0..config.threads {
            let counters = &counters;
            scope.spawn(move || {
                for op in 0..config.operations {
                    let person = Handle::new(Person::new(format!("x{worker}-{op}"), op as u64));
                    let group = Handle::new(Group::new(format!("x{worker}-{op}"), None));
                    let result = fx.db.retry_on_deadlock(config.attempts, || {
                        let attempt = if worker % 2 == 0 {
                            people_then_groups(fx, &person, &group)
                        } else {
                            groups_then_people(fx, &person, &group)
                        };
                        counters.counted(attempt)
                    });
                    counters.record(result);
                }
            });
        }
    });

    counters.finish(started)
}

fn people_then_groups(fx: &Fixture, person: &Handle<Person>, group: &Handle<Group>) -> StoreResult<()> {
    let _txn = fx.db.transaction();
    fx.people.store(person)?;
    thread::yield_now();
    fx.groups.store(group)?;
    Ok(())
}

fn groups_then_people(fx: &Fixture, person: &Handle<Person>, group: &Handle<Group>) -> StoreResult<()> {
    let _txn = fx.db.transaction();
    fx.groups.store(group)?;
    thread::yield_now();
    fx.people.store(person)?;
    Ok(())
}

/// Readers look people up by number while writers rename them.
pub fn stress_readers_and_writers(fx: &Fixture, config: &StressConfig) -> StressTestResult {
    let people: Vec<Handle<Person>> = (0..config.threads)
        .map(|n| fx.add_person(&format!("r{n}"), n as u64).0)
        .collect();
    let counters = Counters::default();
    let started = Instant::now();

    thread::scope(|scope| {
        for (worker, person) in people.iter().enumerate() {
            let counters = &counters;
            scope.spawn(move || {
                for op in 0..config.operations {
                    let result = fx.db.retry_on_deadlock(config.attempts, || {
                        counters.counted(fx.people.update(person, |p| {
                            p.name = format!("r{worker}-{op}");
                        }))
                    });
                    counters.record(result);
                }
            });
            scope.spawn(move || {
                for _ in 0..config.operations {
                    let result = fx.db.retry_on_deadlock(config.attempts, || {
                        counters.counted(fx.people.get_list(&[Person::NUMBER], worker as u64))
                    });
                    counters.record(result.map(|_| ()));
                }
            });
        }
    });

    counters.finish(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::FixtureOptions;
    use modeldb_core::Config;

    #[test]
    fn test_store_and_erase() {
        let fx = Fixture::new();
        let config = StressConfig {
            operations: 50,
            ..Default::default()
        };

        let result = stress_store_and_erase(&fx, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 200);
        assert!(fx.people.is_empty().unwrap());
        assert!(fx.groups.is_empty().unwrap());
        assert!(fx.memberships.is_empty().unwrap());
    }

    #[test]
    fn test_crossed_locks_recover() {
        let config = Config::default().deadlock_timeout(Duration::from_millis(50));
        let fx = Fixture::with_options(FixtureOptions::default().config(config));
        let stress = StressConfig {
            operations: 20,
            threads: 2,
            attempts: 50,
        };

        let result = stress_crossed_locks(&fx, &stress);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(fx.people.len().unwrap(), 40);
        assert_eq!(fx.groups.len().unwrap(), 40);
    }

    #[test]
    fn test_readers_and_writers() {
        let fx = Fixture::new();
        let config = StressConfig {
            operations: 100,
            threads: 3,
            ..Default::default()
        };

        let result = stress_readers_and_writers(&fx, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 600);
        for n in 0..3u64 {
            let found = fx.people.get(&[Person::NUMBER], n).unwrap();
            assert_eq!(found.read().name, format!("r{n}-99"));
        }
    }
}
