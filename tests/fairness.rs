use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spinlocks::hier::HclhLock;
use spinlocks::queue::{ArrayLock, ClhLock, McsLock, TimeoutLock};
use spinlocks::registry::ThreadRegistry;
use spinlocks::{Lock, Mutex};

const WAITERS: usize = 4;
const SETTLE: Duration = Duration::from_millis(50);

/// Holds the lock while waiters arrive one by one, then returns the order
/// in which they were served.
fn service_order<L>(lock: L) -> Vec<usize>
where
    L: Lock + Send + Sync + 'static,
{
    let mutex = Arc::new(Mutex::with_lock(lock, Vec::new()));
    let handles = mutex.lock_then(|_| {
        (0..WAITERS)
            .map(|i| {
                let mutex = Arc::clone(&mutex);
                let handle = thread::spawn(move || mutex.lock_then(|order| order.push(i)));
                thread::sleep(SETTLE);
                handle
            })
            .collect::<Vec<_>>()
    });
    for handle in handles {
        handle.join().unwrap();
    }
    mutex.lock_then(|order| order.clone())
}

fn arrival() -> Vec<usize> {
    (0..WAITERS).collect()
}

#[test]
fn clh_serves_in_arrival_order() {
    assert_eq!(service_order(ClhLock::<spinlocks::relax::Spin>::new()), arrival());
}

#[test]
fn mcs_serves_in_arrival_order() {
    assert_eq!(service_order(McsLock::<spinlocks::relax::Spin>::new()), arrival());
}

#[test]
fn array_lock_serves_in_arrival_order() {
    let lock = ArrayLock::<spinlocks::relax::Spin>::with_capacity(WAITERS + 2).unwrap();
    assert_eq!(service_order(lock), arrival());
}

#[test]
fn hclh_serves_a_single_cluster_in_arrival_order() {
    let registry = Arc::new(ThreadRegistry::new(64).unwrap());
    assert_eq!(service_order(HclhLock::<spinlocks::relax::Spin>::new(registry)), arrival());
}

#[test]
fn timeout_lock_serves_patient_waiters_in_arrival_order() {
    let patience = Duration::from_secs(30);
    let mutex = Arc::new(Mutex::with_lock(TimeoutLock::<spinlocks::relax::Spin>::new(), Vec::new()));
    let handles = mutex.try_lock_for_then(patience, |held| {
        assert!(held.is_some());
        (0..WAITERS)
            .map(|i| {
                let mutex = Arc::clone(&mutex);
                let handle = thread::spawn(move || {
                    mutex.try_lock_for_then(patience, |order| order.map(|order| order.push(i)).is_some())
                });
                thread::sleep(SETTLE);
                handle
            })
            .collect::<Vec<_>>()
    });
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    let order = mutex.try_lock_for_then(patience, |order| order.map(|order| order.clone()));
    assert_eq!(order, Some(arrival()));
}
