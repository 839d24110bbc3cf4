use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::thread;

use spinlocks::registry::ThreadRegistry;
use spinlocks::universal::{LfUniversal, Universal, WfUniversal, WfUniversalBack};

const THREADS: usize = 6;
const OPS: usize = 300;

/// Runs `OPS` increments on each of `THREADS` threads and returns every
/// count a caller got back, in per-thread order.
fn counts<U>(universal: U) -> Vec<Vec<u64>>
where
    U: Universal<u64> + Send + Sync + 'static,
{
    let universal = Arc::new(universal);
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let universal = Arc::clone(&universal);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..OPS).map(|_| universal.apply(|n: &mut u64| *n += 1)).collect()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn assert_counts(per_thread: Vec<Vec<u64>>) {
    for counts in &per_thread {
        assert!(counts.windows(2).all(|pair| pair[0] < pair[1]));
    }
    let mut all: Vec<_> = per_thread.into_iter().flatten().collect();
    all.sort_unstable();
    let total = (THREADS * OPS) as u64;
    assert_eq!(all, (1..=total).collect::<Vec<_>>());
}

#[test]
fn lock_free_counter() {
    assert_counts(counts(LfUniversal::new(THREADS, || 0).unwrap()));
}

#[test]
fn wait_free_counter() {
    assert_counts(counts(WfUniversal::new(THREADS, || 0).unwrap()));
}

#[test]
fn wait_free_back_counter() {
    assert_counts(counts(WfUniversalBack::new(THREADS, || 0).unwrap()));
}

#[test]
fn queue_object_sees_a_single_history() {
    const WORKERS: u32 = 4;
    // The main thread takes the id after the workers for the last look.
    let threads = WORKERS as usize + 1;
    let queue = Arc::new(WfUniversalBack::new(threads, VecDeque::new).unwrap());
    let handles: Vec<_> = (0..WORKERS)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..50 {
                    let value = t * 100 + i;
                    let seen = queue.apply(move |q: &mut VecDeque<u32>| {
                        q.push_back(value);
                        if q.len() > 8 {
                            q.pop_front();
                        }
                    });
                    assert_eq!(seen.back(), Some(&value));
                    assert!(seen.len() <= 8);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let last = queue.apply(|_: &mut VecDeque<u32>| {});
    assert_eq!(last.len(), 8);
    for worker in 0..WORKERS {
        let values: Vec<_> = last.iter().filter(|&&value| value / 100 == worker).collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[test]
fn registry_can_be_shared_and_reset_between_trials() {
    let registry = Arc::new(ThreadRegistry::default());
    for _ in 0..3 {
        let universal = WfUniversal::with_registry(2, Arc::clone(&registry), || 0_u64).unwrap();
        let universal = Arc::new(universal);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let universal = Arc::clone(&universal);
                thread::spawn(move || universal.apply(|n: &mut u64| *n += 1))
            })
            .collect();
        let mut seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, [1, 2]);
        registry.reset();
    }
}
