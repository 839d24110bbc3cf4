use std::env;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use spinlocks::config::LockConfig;
use spinlocks::factory::{AnyLock, LockKind};
use spinlocks::registry::ThreadRegistry;

// Usage: counter [LOCK] [THREADS] [LIMIT]
//
// Every thread keeps incrementing a shared counter under the lock until it
// reaches LIMIT, and the time each lock kind took is printed. Without LOCK,
// every kind is measured.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let kinds = match args.next() {
        Some(name) => vec![name.parse::<LockKind>()?],
        None => LockKind::ALL.to_vec(),
    };
    let threads: usize = args.next().map_or(Ok(4), |arg| arg.parse())?;
    let limit: u64 = args.next().map_or(Ok(1_000_000), |arg| arg.parse())?;

    for kind in kinds {
        let threads = kind.max_threads().map_or(threads, |max| threads.min(max));
        let registry = Arc::new(ThreadRegistry::default());
        let lock = kind.build(&LockConfig::with_capacity(threads), registry)?;
        let elapsed = reach_limit(lock, threads, limit)?;
        println!("{kind:>12} {threads:>3} threads {:>10.3} ms", elapsed.as_secs_f64() * 1e3);
    }
    Ok(())
}

fn reach_limit(lock: AnyLock, threads: usize, limit: u64) -> spinlocks::Result<Duration> {
    let lock = Arc::new(lock);
    let counter = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(threads + 1));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (lock, counter, barrier) = (Arc::clone(&lock), Arc::clone(&counter), Arc::clone(&barrier));
            thread::spawn(move || {
                let mut node = lock.node();
                let step = || {
                    let value = counter.load(Relaxed);
                    if value < limit {
                        counter.store(value + 1, Relaxed);
                    }
                };
                barrier.wait();
                let mut outcome = Ok(());
                while outcome.is_ok() && counter.load(Relaxed) < limit {
                    outcome = if lock.kind().is_timed() {
                        lock.try_lock_for_with_then(&mut node, Duration::from_millis(1), |held| {
                            if held {
                                step();
                            }
                        })
                    } else {
                        lock.lock_with_then(&mut node, step)
                    };
                }
                // Reach the second barrier even on failure, main waits on it.
                barrier.wait();
                outcome
            })
        })
        .collect();
    barrier.wait();
    let start = Instant::now();
    barrier.wait();
    let elapsed = start.elapsed();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }
    assert_eq!(counter.load(Relaxed), limit);
    Ok(elapsed)
}
