// Parts of this suite are modified from the Rust's Mutex test suite.
//
// Copyright 2014 The Rust Project Developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![cfg(feature = "lock_api")]

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use spinlocks::lock_api::{backoff, tas, ttas};

type Mutex<T> = tas::Mutex<T>;

#[derive(Eq, PartialEq, Debug)]
struct NonCopy(i32);

#[test]
fn smoke() {
    let m = Mutex::new(());
    drop(m.lock());
    drop(m.lock());
}

#[test]
fn lots_and_lots() {
    static TAS: tas::Mutex<u32> = tas::Mutex::new(0);
    static TTAS: ttas::Mutex<u32> = ttas::Mutex::new(0);
    static BACKOFF: backoff::Mutex<u32> = backoff::Mutex::new(0);

    const ITERS: u32 = 1000;
    const CONCURRENCY: u32 = 3;

    fn inc() {
        for _ in 0..ITERS {
            *TAS.lock() += 1;
            *TTAS.lock() += 1;
            *BACKOFF.lock() += 1;
        }
    }

    let (tx, rx) = channel();
    for _ in 0..CONCURRENCY {
        let tx = tx.clone();
        thread::spawn(move || {
            inc();
            tx.send(()).unwrap();
        });
    }
    drop(tx);
    for _ in 0..CONCURRENCY {
        rx.recv().unwrap();
    }
    assert_eq!(*TAS.lock(), ITERS * CONCURRENCY);
    assert_eq!(*TTAS.lock(), ITERS * CONCURRENCY);
    assert_eq!(*BACKOFF.lock(), ITERS * CONCURRENCY);
}

#[test]
fn try_lock_fails_while_guarded() {
    let m: ttas::Mutex<_> = ttas::Mutex::new(0);
    let guard = m.lock();
    assert!(m.try_lock().is_none());
    assert!(m.is_locked());
    drop(guard);
    assert_eq!(m.try_lock().map(|g| *g), Some(0));
}

#[test]
fn test_into_inner() {
    let m = backoff::Mutex::new(NonCopy(10));
    assert_eq!(m.into_inner(), NonCopy(10));
}

#[test]
fn test_get_mut() {
    let mut m = Mutex::new(NonCopy(10));
    *m.get_mut() = NonCopy(20);
    assert_eq!(m.into_inner(), NonCopy(20));
}

#[test]
fn test_lock_arc_access_in_unwind() {
    let arc = Arc::new(Mutex::new(1));
    let arc2 = Arc::clone(&arc);
    let _ = thread::spawn(move || {
        struct Unwinder {
            i: Arc<Mutex<i32>>,
        }
        impl Drop for Unwinder {
            fn drop(&mut self) {
                *self.i.lock() += 1;
            }
        }
        let _u = Unwinder { i: arc2 };
        panic!();
    })
    .join();
    assert_eq!(*arc.lock(), 2);
}

#[test]
fn test_lock_unsized() {
    let lock: &Mutex<[i32]> = &Mutex::new([1, 2, 3]);
    {
        let b = &mut *lock.lock();
        b[0] = 4;
        b[2] = 5;
    }
    let comp: &[i32] = &[4, 2, 5];
    assert_eq!(&*lock.lock(), comp);
}
