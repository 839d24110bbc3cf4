//! Loom models shared by the lock modules.
//!
//! Protected data lives in a Loom [`UnsafeCell`], so that Loom reports any
//! access that the lock under test failed to serialize.

pub mod models {
    use core::array;

    use loom::cell::UnsafeCell;
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::lock::{Lock, RawLock, TryLock};

    // TODO: Three or more threads make queue lock models run for too long. A
    // model with three threads would cover a queue with a waiter in the
    // middle, not just a head and a tail.
    const LOCKS: usize = 2;
    const TRY_LOCKS: usize = 3;

    struct Shared<L> {
        lock: L,
        data: UnsafeCell<usize>,
    }

    // SAFETY: `data` is only reached while `lock` is held.
    unsafe impl<L: Sync> Sync for Shared<L> {}

    impl<L: RawLock> Shared<L> {
        fn new(lock: L) -> Arc<Self> {
            Arc::new(Self { lock, data: UnsafeCell::new(0) })
        }

        /// Increments the data and releases the lock held with `node`.
        ///
        /// # Safety
        ///
        /// The lock must be held with `node`.
        unsafe fn inc_and_unlock(&self, node: &mut L::Node) {
            // SAFETY: The caller holds the lock.
            self.data.with_mut(|data| unsafe { *data += 1 });
            unsafe { self.lock.unlock(node) };
        }

        /// Reads the data once every thread was joined.
        fn get(&self) -> usize {
            // SAFETY: Nobody holds the lock anymore.
            self.data.with(|data| unsafe { *data })
        }
    }

    fn inc<L: Lock>(shared: &Shared<L>) {
        let mut node = L::Node::default();
        // SAFETY: The node outlives the critical section.
        unsafe {
            shared.lock.lock(&mut node);
            shared.inc_and_unlock(&mut node);
        }
    }

    fn try_inc<L: TryLock>(shared: &Shared<L>) {
        let mut node = L::Node::default();
        // SAFETY: The node outlives the critical section.
        unsafe {
            if shared.lock.try_lock(&mut node) {
                shared.inc_and_unlock(&mut node);
            }
        }
    }

    /// Evaluates that concurrent `lock` calls will serialize all mutations
    /// against the shared data, therefore no data races.
    pub fn lock_join<L, F>(make: F)
    where
        L: Lock + Send + Sync + 'static,
        F: Fn() -> L + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = LOCKS;
            let shared = Shared::new(make());
            let handles: [_; RUNS] = array::from_fn(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || inc(&shared))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(RUNS, shared.get());
        });
    }

    /// Evaluates that concurrent `try_lock` calls will serialize all
    /// mutations against the shared data, therefore no data races.
    pub fn try_lock_join<L, F>(make: F)
    where
        L: TryLock + Send + Sync + 'static,
        F: Fn() -> L + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = TRY_LOCKS;
            let shared = Shared::new(make());
            let handles: [_; RUNS] = array::from_fn(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || try_inc(&shared))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert!((1..=RUNS).contains(&shared.get()));
        });
    }

    /// Evaluates that concurrent `lock` and `try_lock` calls will serialize
    /// all mutations against the shared data, therefore no data races.
    pub fn mixed_lock_join<L, F>(make: F)
    where
        L: Lock + TryLock + Send + Sync + 'static,
        F: Fn() -> L + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = LOCKS;
            let shared = Shared::new(make());
            let handles: [_; RUNS] = array::from_fn(|run| {
                let shared = Arc::clone(&shared);
                let f = if run % 2 == 0 { inc } else { try_inc };
                thread::spawn(move || f(&shared))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert!((1..=RUNS).contains(&shared.get()));
        });
    }
}
