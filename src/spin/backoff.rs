use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::backoff::Backoff;
use crate::cfg::atomic::AtomicBool;
use crate::config::BackoffConfig;
use crate::error::Result;
use crate::lock::{Lock, RawLock, TryLock};

/// A test-and-test-and-set lock that backs off after every lost race.
///
/// A thread that sees the flag cleared but loses the swap to another thread
/// waits a random delay before reading again, with the delay bound doubling
/// up to [`BackoffConfig::max_delay`]. Each call to `lock` starts with a
/// fresh bound of [`BackoffConfig::min_delay`].
///
/// # Examples
///
/// ```
/// use spinlocks::config::BackoffConfig;
/// use spinlocks::spin::BackoffLock;
/// use spinlocks::Mutex;
///
/// let config = BackoffConfig::new(16, 512).unwrap();
/// let mutex = Mutex::with_lock(BackoffLock::with_config(config), 0);
/// mutex.lock_then(|data| *data += 1);
/// assert_eq!(mutex.into_inner(), 1);
/// ```
pub struct BackoffLock {
    state: AtomicBool,
    config: BackoffConfig,
}

impl BackoffLock {
    /// Creates a new, unlocked and core based lock with the default bounds
    /// (const).
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }

    /// Creates a new, unlocked and loom based lock with the default bounds
    /// (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::DEFAULT)
    }

    /// Creates a new, unlocked and core based lock with the given bounds
    /// (const).
    #[cfg(not(all(loom, test)))]
    pub const fn with_config(config: BackoffConfig) -> Self {
        Self { state: AtomicBool::new(false), config }
    }

    /// Creates a new, unlocked and loom based lock with the given bounds
    /// (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { state: AtomicBool::new(false), config }
    }

    /// Creates a new lock with delays starting at `min_delay` and capped at
    /// `max_delay` spin hints.
    ///
    /// Fails if `max_delay < min_delay` or if `min_delay` is zero.
    pub fn with_delays(min_delay: u32, max_delay: u32) -> Result<Self> {
        BackoffConfig::new(min_delay, max_delay).map(Self::with_config)
    }

    /// The delay bounds of this lock.
    pub const fn config(&self) -> BackoffConfig {
        self.config
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed)
    }

    /// Spins until the lock is acquired.
    pub fn acquire(&self) {
        let mut backoff = Backoff::from_config(self.config);
        loop {
            while self.state.load(Relaxed) {
                crate::cfg::hint::spin_loop();
            }
            if !self.state.swap(true, Acquire) {
                return;
            }
            backoff.wait();
        }
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

impl Default for BackoffLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for BackoffLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("BackoffLock");
        d.field("locked", &self.is_locked()).field("config", &self.config).finish()
    }
}

// SAFETY: Same protocol as `TtasLock`, backing off does not touch the flag.
unsafe impl RawLock for BackoffLock {
    type Node = ();

    unsafe fn unlock(&self, (): &mut ()) {
        self.release();
    }
}

// SAFETY: See `RawLock`.
unsafe impl Lock for BackoffLock {
    unsafe fn lock(&self, (): &mut ()) {
        self.acquire();
    }
}

// SAFETY: See `RawLock`.
unsafe impl TryLock for BackoffLock {
    unsafe fn try_lock(&self, (): &mut ()) -> bool {
        self.try_acquire()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawMutex for BackoffLock {
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
    use super::BackoffLock;
    use crate::config::BackoffConfig;
    use crate::test;
    use crate::Error;

    #[test]
    fn smoke() {
        test::smoke(BackoffLock::new());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| BackoffLock::new());
    }

    #[test]
    fn tight_bounds_mutual_exclusion() {
        let lock = BackoffLock::with_delays(1, 1).unwrap();
        assert_eq!(test::lots_and_lots(lock, 8, 10_000), 10_000);
    }

    #[test]
    fn rejects_inverted_delays() {
        let err = BackoffLock::with_delays(100, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "max_delay", .. }));
    }

    #[test]
    fn default_bounds() {
        assert_eq!(BackoffLock::default().config(), BackoffConfig::DEFAULT);
    }
}
