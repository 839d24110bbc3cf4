use std::sync::atomic::{AtomicBool, AtomicU32, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};
use spinlocks::config::LockConfig;
use spinlocks::factory::{AnyLock, AnyNode, LockKind};

const PATIENCE: Duration = Duration::from_secs(1);

/// One critical section that bumps `data`, retrying timed locks until they
/// are acquired.
fn bump(lock: &AnyLock, node: &mut AnyNode, data: &AtomicU32) {
    let f = || data.store(data.load(Relaxed).wrapping_add(1), Relaxed);
    if lock.kind().is_timed() {
        while !lock.try_lock_for_with_then(node, PATIENCE, |held| held.then(f).is_some()).unwrap() {}
    } else {
        lock.lock_with_then(node, f).unwrap();
    }
}

fn build(kind: LockKind) -> AnyLock {
    let config = LockConfig::with_capacity(2);
    kind.build(&config, Arc::default()).unwrap()
}

fn lock_unlock(bencher: &mut Bencher, kind: LockKind) {
    let lock = build(kind);
    let data = AtomicU32::new(0);
    let mut node = lock.node();
    bencher.iter(|| bump(&lock, &mut node, &data));
    black_box(data.load(Relaxed));
}

fn lock_unlock_write_contention(bencher: &mut Bencher, kind: LockKind) {
    let lock = Arc::new(build(kind));
    let data = Arc::new(AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));
    // Registers the measuring thread before the contender, Peterson's lock
    // only knows ids 0 and 1.
    let mut node = lock.node();
    bump(&lock, &mut node, &data);

    let contender = thread::spawn({
        let lock = Arc::clone(&lock);
        let data = Arc::clone(&data);
        let done = Arc::clone(&done);
        move || {
            let mut node = lock.node();
            while !done.load(Relaxed) {
                for _ in 0..1000 {
                    bump(&lock, &mut node, &data);
                }
            }
        }
    });

    bencher.iter(|| bump(&lock, &mut node, &data));

    done.store(true, Relaxed);
    contender.join().unwrap();
}

fn uncontended(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("lock_unlock");
    for kind in LockKind::ALL {
        group.bench_function(kind.name(), |bench| lock_unlock(bench, kind));
    }
    group.finish();
}

fn contended(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("lock_unlock_write_contention");
    for kind in LockKind::ALL {
        group.bench_function(kind.name(), |bench| lock_unlock_write_contention(bench, kind));
    }
    group.finish();
}

criterion_group!(locks, uncontended, contended);
criterion_main!(locks);
