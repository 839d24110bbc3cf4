use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spinlocks::config::{BackoffConfig, HboConfig, LockConfig};
use spinlocks::factory::LockKind;
use spinlocks::registry::ThreadRegistry;
use spinlocks::Error;

#[test]
fn every_name_builds_its_kind() {
    let names = [
        "ALock",
        "BackoffLock",
        "CLHLock",
        "HBOLock",
        "HCLHLock",
        "MCSLock",
        "Peterson",
        "TASLock",
        "TOLock",
        "TTASLock",
    ];
    let config = LockConfig::with_capacity(4);
    for (name, kind) in names.into_iter().zip(LockKind::ALL) {
        let parsed: LockKind = name.parse().unwrap();
        assert_eq!(parsed, kind);
        let lock = parsed.build(&config, Arc::default()).unwrap();
        assert_eq!(lock.kind(), kind);
        assert_eq!(lock.node().kind(), kind);
    }
}

#[test]
fn custom_configuration_is_honored() {
    let config = LockConfig {
        capacity: 3,
        backoff: BackoffConfig::new(1, 4).unwrap(),
        hbo: HboConfig { local: BackoffConfig::new(1, 2).unwrap(), remote: BackoffConfig::new(4, 8).unwrap() },
    };
    let registry = Arc::new(ThreadRegistry::new(1).unwrap());
    for kind in [LockKind::Array, LockKind::Backoff, LockKind::Hbo] {
        let lock = Arc::new(kind.build(&config, Arc::clone(&registry)).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut node = lock.node();
                    for _ in 0..1_000 {
                        lock.lock_with_then(&mut node, || {
                            let value = counter.load(Relaxed);
                            counter.store(value + 1, Relaxed);
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Relaxed), 3_000, "{kind}");
        registry.reset();
    }
}

#[test]
fn timeout_lock_gives_up_while_held() {
    let lock = Arc::new(LockKind::Timeout.build(&LockConfig::default(), Arc::default()).unwrap());
    let mut node = lock.node();
    let outcome = lock.try_lock_for_with_then(&mut node, Duration::from_secs(1), |held| {
        assert!(held);
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let mut node = lock.node();
            lock.try_lock_for_with_then(&mut node, Duration::from_millis(5), |held| held).unwrap()
        })
        .join()
        .unwrap()
    });
    assert_eq!(outcome, Ok(false));
}

#[test]
fn unknown_name_is_reported() {
    let err = "FooLock".parse::<LockKind>().unwrap_err();
    assert_eq!(err.to_string(), "unknown lock `FooLock`");
    assert!(matches!(err, Error::UnknownLock(_)));
}
