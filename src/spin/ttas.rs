use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicBool;
use crate::lock::{Lock, RawLock, TryLock};
use crate::relax::{Relax, Spin};

/// A test-and-test-and-set spin lock.
///
/// Waiters read the flag, which stays in their cache while the lock is held,
/// and only attempt the swap once they observe it cleared.
pub struct TtasLock<R = Spin> {
    state: AtomicBool,
    relax: PhantomData<R>,
}

impl<R> TtasLock<R> {
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

    /// Attempts to acquire the lock, failing without a write if it is held.
    pub fn try_acquire(&self) -> bool {
        !self.state.load(Relaxed) && !self.state.swap(true, Acquire)
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

impl<R: Relax> TtasLock<R> {
    /// Spins until the lock is acquired.
    pub fn acquire(&self) {
        loop {
            let mut relax = R::new();
            while self.state.load(Relaxed) {
                relax.relax();
            }
            if !self.state.swap(true, Acquire) {
                return;
            }
        }
    }
}

impl<R> Default for TtasLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for TtasLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtasLock").field("locked", &self.is_locked()).finish()
    }
}

// SAFETY: Ownership is only taken by the acquire swap that observed `false`.
unsafe impl<R> RawLock for TtasLock<R> {
    type Node = ();

    unsafe fn unlock(&self, (): &mut ()) {
        self.release();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for TtasLock<R> {
    unsafe fn lock(&self, (): &mut ()) {
        self.acquire();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R> TryLock for TtasLock<R> {
    unsafe fn try_lock(&self, (): &mut ()) -> bool {
        self.try_acquire()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawMutex for TtasLock<R> {
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

    use crate::relax::Yield;
    use crate::test;

    type TtasLock = super::TtasLock<Yield>;

    #[test]
    fn smoke() {
        test::smoke(TtasLock::new());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| TtasLock::new());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(TtasLock::new(), 8, 1_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Arc::new(TtasLock::new());
        assert!(!test::while_held(Arc::clone(&lock), |lock| lock.try_acquire()));
        assert!(lock.try_acquire());
        assert!(lock.is_locked());
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;

    type TtasLock = super::TtasLock<Yield>;

    #[test]
    fn lock_join() {
        models::lock_join(TtasLock::new);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(TtasLock::new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(TtasLock::new);
    }
}
