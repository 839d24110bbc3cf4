use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicBool;
use crate::lock::{Lock, RawLock, TryLock};
use crate::relax::{Relax, Spin};

/// A test-and-set spin lock.
///
/// Every acquisition attempt is an atomic swap of a single shared flag. The
/// swap is a write, so each waiting thread invalidates the flag's cache line
/// on every iteration. [`TtasLock`](super::TtasLock) avoids that traffic.
///
/// No fairness guarantee is made: any waiting thread may be the next owner.
///
/// # Examples
///
/// ```
/// use spinlocks::spin::TasLock;
/// use spinlocks::Mutex;
///
/// let mutex = Mutex::<_, TasLock>::new(0);
/// mutex.lock_then(|data| *data += 1);
/// assert_eq!(mutex.into_inner(), 1);
/// ```
pub struct TasLock<R = Spin> {
    state: AtomicBool,
    relax: PhantomData<R>,
}

impl<R> TasLock<R> {
    /// Creates a new, unlocked and core based lock (const).
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { state: AtomicBool::new(false), relax: PhantomData }
    }

    /// Creates a new, unlocked and loom based lock (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { state: AtomicBool::new(false), relax: PhantomData }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed)
    }

    /// Attempts to acquire the lock with a single swap.
    pub fn try_acquire(&self) -> bool {
        !self.state.swap(true, Acquire)
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    pub unsafe fn release(&self) {
        self.state.store(false, Release);
    }
}

impl<R: Relax> TasLock<R> {
    /// Spins until the lock is acquired.
    pub fn acquire(&self) {
        let mut relax = R::new();
        while self.state.swap(true, Acquire) {
            relax.relax();
        }
    }
}

impl<R> Default for TasLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for TasLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TasLock").field("locked", &self.is_locked()).finish()
    }
}

// SAFETY: The swap only succeeds for one thread while the flag is set, and
// the acquire swap pairs with the release store of `unlock`.
unsafe impl<R> RawLock for TasLock<R> {
    type Node = ();

    unsafe fn unlock(&self, (): &mut ()) {
        self.release();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for TasLock<R> {
    unsafe fn lock(&self, (): &mut ()) {
        self.acquire();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R> TryLock for TasLock<R> {
    unsafe fn try_lock(&self, (): &mut ()) -> bool {
        self.try_acquire()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawMutex for TasLock<R> {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    fn lock(&self) {
        self.acquire();
    }

    fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    unsafe fn unlock(&self) {
        self.release();
    }

    fn is_locked(&self) -> bool {
        self.is_locked()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;

    use crate::relax::Yield;
    use crate::test::{self, Int};
    use crate::Mutex;

    type TasLock = super::TasLock<Yield>;

    #[test]
    fn smoke() {
        test::smoke(TasLock::new());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| TasLock::new());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(TasLock::new(), 4, 1_000);
    }

    #[test]
    fn repeated_round_trips() {
        for _ in 0..50 {
            assert_eq!(test::lots_and_lots(TasLock::new(), 4, 10_000), 10_000);
        }
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Arc::new(TasLock::new());
        let acquired = test::while_held(Arc::clone(&lock), |lock| lock.try_acquire());
        assert!(!acquired);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire());
    }

    #[test]
    fn try_lock_then_runs_with_data() {
        let mutex = Mutex::<Int, TasLock>::new(1);
        let value = mutex.try_lock_then(|data| data.map(|data| *data));
        assert_eq!(value, Some(1));
        let value = mutex.lock_then(|_| mutex.try_lock_then(|data| data.is_some()));
        assert!(!value);
    }

    #[test]
    fn lock_released_on_panic() {
        let mutex = Arc::new(Mutex::<Int, TasLock>::new(0));
        let c_mutex = Arc::clone(&mutex);
        let result = thread::spawn(move || {
            c_mutex.lock_then(|_| panic!("poisoned?"));
        })
        .join();
        assert!(result.is_err());
        assert!(!mutex.raw().is_locked());
        mutex.lock_then(|data| *data += 1);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;

    type TasLock = super::TasLock<Yield>;

    #[test]
    fn lock_join() {
        models::lock_join(TasLock::new);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(TasLock::new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(TasLock::new);
    }
}
