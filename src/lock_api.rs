//! Locking interfaces compatible with [lock_api].
//!
//! This module exports [`lock_api::Mutex`] and [`lock_api::MutexGuard`]
//! aliases for the spin locks that keep no per-thread state: [`TasLock`],
//! [`TtasLock`] and [`BackoffLock`]. Each of them implements [`RawMutex`].
//! Queue locks need a node that outlives the guard, which `lock_api` guards
//! cannot carry, so they are only available through [`crate::Mutex`].
//!
//! [lock_api]: https://crates.io/crates/lock_api
//! [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
//! [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`TasLock`]: crate::spin::TasLock
//! [`TtasLock`]: crate::spin::TtasLock
//! [`BackoffLock`]: crate::spin::BackoffLock

/// A lock that provides mutually exclusive data access that is compatible
/// with [`lock_api`](https://crates.io/crates/lock_api).
pub type Mutex<T, L> = lock_api::Mutex<L, T>;

/// A guard that provides mutable data access that is compatible with
/// [`lock_api`](https://crates.io/crates/lock_api).
pub type MutexGuard<'a, T, L> = lock_api::MutexGuard<'a, L, T>;

/// Aliases backed by a test-and-set lock.
pub mod tas {
    use crate::relax::Spin;
    use crate::spin::TasLock;

    /// A test-and-set lock compatible with the `lock_api` crate, waiting
    /// with the `R` relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use spinlocks::lock_api::tas::Mutex;
    ///
    /// let mutex: Mutex<_> = Mutex::new(0);
    /// *mutex.lock() += 1;
    /// assert_eq!(*mutex.lock(), 1);
    /// ```
    pub type Mutex<T, R = Spin> = super::Mutex<T, TasLock<R>>;

    /// A test-and-set guard.
    pub type MutexGuard<'a, T, R = Spin> = super::MutexGuard<'a, T, TasLock<R>>;
}

/// Aliases backed by a test-and-test-and-set lock.
pub mod ttas {
    use crate::relax::Spin;
    use crate::spin::TtasLock;

    /// A test-and-test-and-set lock compatible with the `lock_api` crate,
    /// waiting with the `R` relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use spinlocks::lock_api::ttas::Mutex;
    ///
    /// let mutex: Mutex<_> = Mutex::new(0);
    /// let data = mutex.try_lock().map(|guard| *guard);
    /// assert_eq!(data, Some(0));
    /// ```
    pub type Mutex<T, R = Spin> = super::Mutex<T, TtasLock<R>>;

    /// A test-and-test-and-set guard.
    pub type MutexGuard<'a, T, R = Spin> = super::MutexGuard<'a, T, TtasLock<R>>;
}

/// Aliases backed by an exponential backoff lock with the default bounds.
pub mod backoff {
    use crate::spin::BackoffLock;

    /// A backoff lock compatible with the `lock_api` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use spinlocks::lock_api::backoff::Mutex;
    ///
    /// static COUNT: Mutex<u32> = Mutex::new(0);
    /// *COUNT.lock() += 1;
    /// assert_eq!(*COUNT.lock(), 1);
    /// ```
    pub type Mutex<T> = super::Mutex<T, BackoffLock>;

    /// A backoff guard.
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, BackoffLock>;
}
