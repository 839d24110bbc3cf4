// Generic test suites shared by every lock of this crate. Each lock module
// instantiates them from its own `#[cfg(test)]` module.
//
// Parts of this suite are modified from the Rust's Mutex test suite.
//
// Copyright 2014 The Rust Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use std::vec::Vec;

use crate::lock::{Lock, TimedLock};
use crate::registry::ThreadRegistry;
use crate::relax::Yield;
use crate::spin::TasLock;
use crate::Mutex;

/// An arbitrary unsigned integer type.
pub type Int = u32;

/// Thread counts the mutual exclusion grid runs with.
pub const THREADS: [usize; 5] = [1, 2, 4, 8, 16];

/// Total number of increments the mutual exclusion grid runs with.
pub const LIMITS: [Int; 2] = [1_000, 100_000];

/// Splits `total` increments among `threads` workers, the remainder going to
/// the first ones.
fn share(total: Int, threads: usize, index: usize) -> Int {
    let threads = threads as Int;
    let index = index as Int;
    total / threads + Int::from(index < total % threads)
}

/// Takes the protected data back once every worker was joined, without
/// acquiring the lock from yet another thread.
fn into_data<T, L>(mutex: Arc<Mutex<T, L>>) -> T {
    match Arc::try_unwrap(mutex) {
        Ok(mutex) => mutex.into_inner(),
        Err(_) => panic!("a worker still holds the mutex"),
    }
}

/// Spawns `threads` workers that together increment a protected counter
/// exactly `total` times, returning the final value of the counter.
pub fn lots_and_lots<L>(lock: L, threads: usize, total: Int) -> Int
where
    L: Lock + Send + Sync + 'static,
{
    let mutex = Arc::new(Mutex::with_lock(lock, 0));
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let mutex = Arc::clone(&mutex);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut node = L::Node::default();
                barrier.wait();
                for _ in 0..share(total, threads, index) {
                    mutex.lock_with_then(&mut node, |data| *data += 1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    into_data(mutex)
}

/// Runs [`lots_and_lots`] for every combination of [`THREADS`] (up to
/// `max_threads`) and [`LIMITS`], building a fresh lock for each run.
pub fn mutual_exclusion<L, F>(max_threads: usize, make: F)
where
    L: Lock + Send + Sync + 'static,
    F: Fn(usize) -> L,
{
    for threads in THREADS.into_iter().filter(|&n| n <= max_threads) {
        for total in LIMITS {
            let value = lots_and_lots(make(threads), threads, total);
            assert_eq!(value, total, "{threads} threads lost updates");
        }
    }
}

/// Same as [`lots_and_lots`] for locks that only support timed acquisition:
/// every worker retries with `patience` until it gets the lock.
pub fn timed_lots_and_lots<L>(lock: L, threads: usize, total: Int, patience: Duration) -> Int
where
    L: TimedLock + Send + Sync + 'static,
{
    let mutex = Arc::new(Mutex::with_lock(lock, 0));
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let mutex = Arc::clone(&mutex);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut node = L::Node::default();
                let mut done = 0;
                barrier.wait();
                while done < share(total, threads, index) {
                    let inc = |data: Option<&mut Int>| data.map(|data| *data += 1).is_some();
                    if mutex.try_lock_for_with_then(&mut node, patience, inc) {
                        done += 1;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    into_data(mutex)
}

/// Acquires and releases the same lock twice, with the same node.
pub fn smoke<L: Lock>(lock: L) {
    let mutex = Mutex::with_lock(lock, 1);
    let mut node = L::Node::default();
    mutex.lock_with_then(&mut node, |data| *data += 1);
    mutex.lock_with_then(&mut node, |data| *data += 1);
    assert_eq!(mutex.into_inner(), 3);
}

/// Checks that a queue lock grants the lock in the order threads joined its
/// queue.
///
/// The main thread holds the lock while it spawns `threads` workers, one at a
/// time. Before spawning the next worker it waits until `marker` reports a
/// new value, meaning the previous worker has joined the queue. Once all of
/// them are queued, the main thread releases the lock and the grant order
/// is compared against the join order.
pub fn fifo_order<L, M>(lock: L, threads: usize, marker: M)
where
    L: Lock + Send + Sync + 'static,
    L::Node: Send,
    M: Fn(&L) -> usize,
{
    let lock = Arc::new(lock);
    let granted = Arc::new(Mutex::<Vec<usize>, TasLock>::new(Vec::new()));
    let mut node = L::Node::default();
    // SAFETY: The node outlives the matching unlock below.
    unsafe { lock.lock(&mut node) };

    let mut handles = Vec::with_capacity(threads);
    for index in 0..threads {
        let before = marker(&lock);
        let c_lock = Arc::clone(&lock);
        let c_granted = Arc::clone(&granted);
        handles.push(thread::spawn(move || {
            let mut node = L::Node::default();
            // SAFETY: The node outlives the matching unlock below.
            unsafe { c_lock.lock(&mut node) };
            c_granted.lock_then(|order| order.push(index));
            // SAFETY: Acquired above with this same node.
            unsafe { c_lock.unlock(&mut node) };
        }));
        while marker(&lock) == before {
            thread::yield_now();
        }
    }
    // SAFETY: Acquired above with this same node.
    unsafe { lock.unlock(&mut node) };
    for handle in handles {
        handle.join().unwrap();
    }
    let order = granted.lock_then(core::mem::take);
    assert_eq!(order, (0..threads).collect::<Vec<_>>());
}

/// Counts how many critical sections overlapped, which must be zero.
pub fn no_overlap<L>(lock: L, threads: usize, iterations: usize)
where
    L: Lock + Send + Sync + 'static,
{
    let lock = Arc::new(lock);
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            thread::spawn(move || {
                let mut node = L::Node::default();
                for _ in 0..iterations {
                    // SAFETY: The node outlives the matching unlock below.
                    unsafe { lock.lock(&mut node) };
                    if inside.fetch_add(1, Ordering::Relaxed) != 0 {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    inside.fetch_sub(1, Ordering::Relaxed);
                    // SAFETY: Acquired above with this same node.
                    unsafe { lock.unlock(&mut node) };
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::Relaxed), 0);
}

/// Runs `f` against a lock that is held by another thread for the whole call.
pub fn while_held<L, F, Ret>(lock: Arc<L>, f: F) -> Ret
where
    L: Lock + Send + Sync + 'static,
    F: FnOnce(&L) -> Ret,
{
    let held = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let holder = thread::spawn({
        let lock = Arc::clone(&lock);
        let held = Arc::clone(&held);
        let release = Arc::clone(&release);
        move || {
            let mut node = L::Node::default();
            // SAFETY: The node outlives the matching unlock below.
            unsafe { lock.lock(&mut node) };
            held.wait();
            release.wait();
            // SAFETY: Acquired above with this same node.
            unsafe { lock.unlock(&mut node) };
        }
    });
    held.wait();
    let ret = f(&lock);
    release.wait();
    holder.join().unwrap();
    ret
}

/// How long a worker stays inside, and then outside, the critical section
/// while cluster affinity is measured. Sleeping while holding the lock makes
/// every other worker queue up behind it.
const AFFINITY_HOLD: Duration = Duration::from_micros(50);

/// Records the thread and cluster of every grant while `threads` workers
/// acquire the lock `iterations` times each, and returns the share of hand
/// overs between two distinct threads that stayed within one cluster.
pub fn cluster_affinity<L>(lock: L, registry: &Arc<ThreadRegistry>, threads: usize, iterations: usize) -> f64
where
    L: Lock + Send + Sync + 'static,
{
    let mutex = Arc::new(Mutex::with_lock(lock, Vec::with_capacity(threads * iterations)));
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|index| {
            let mutex = Arc::clone(&mutex);
            let barrier = Arc::clone(&barrier);
            let registry = Arc::clone(registry);
            thread::spawn(move || {
                let cluster = registry.cluster();
                let mut node = L::Node::default();
                barrier.wait();
                for _ in 0..iterations {
                    mutex.lock_with_then(&mut node, |grants| {
                        grants.push((index, cluster));
                        thread::sleep(AFFINITY_HOLD);
                    });
                    thread::sleep(AFFINITY_HOLD);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let grants = into_data(mutex);
    assert_eq!(grants.len(), threads * iterations);
    let handovers: Vec<_> = grants.windows(2).filter(|pair| pair[0].0 != pair[1].0).collect();
    assert!(!handovers.is_empty(), "the lock never changed hands");
    let same = handovers.iter().filter(|pair| pair[0].1 == pair[1].1).count();
    same as f64 / handovers.len() as f64
}

/// Checks that a hierarchical lock built by `make` hands the lock over
/// within a cluster more often than a random order would, and more often
/// than a test-and-set lock under the same load.
pub fn prefers_same_cluster<L, F>(make: F)
where
    L: Lock + Send + Sync + 'static,
    F: FnOnce(Arc<ThreadRegistry>) -> L,
{
    const WORKERS: usize = 8;
    const GROUP_SIZE: usize = 4;
    const ITERATIONS: usize = 100;

    let registry = || Arc::new(ThreadRegistry::new(GROUP_SIZE).unwrap());
    let flat = cluster_affinity(TasLock::<Yield>::new(), &registry(), WORKERS, ITERATIONS);
    let hier_registry = registry();
    let lock = make(Arc::clone(&hier_registry));
    let hier = cluster_affinity(lock, &hier_registry, WORKERS, ITERATIONS);

    // Another thread of the same cluster, out of every other thread.
    let random = (GROUP_SIZE - 1) as f64 / (WORKERS - 1) as f64;
    assert!(hier > random, "same cluster hand overs {hier}, random order {random}");
    assert!(hier > flat, "same cluster hand overs {hier}, test-and-set {flat}");
}
