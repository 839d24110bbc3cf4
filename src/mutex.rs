use core::cell::UnsafeCell;
use core::fmt::{self, Debug, Formatter};
use core::time::Duration;

use crate::lock::{Lock, RawGuard, RawLock, TimedLock, TryLock};

/// A mutual exclusion primitive that pairs any raw lock of this crate with
/// the data it protects.
///
/// The data can only be reached from closures that run while the lock is
/// held: [`lock_with_then`], [`lock_then`], [`try_lock_with_then`] and
/// [`try_lock_for_with_then`]. Acquisitions borrow a queue node, the
/// `L::Node` type, for the closure scope. Threads that acquire the same lock
/// many times should keep one node around and pass it to the `*_with_*`
/// methods, which lets queue locks recycle their records.
///
/// [`lock_with_then`]: Mutex::lock_with_then
/// [`lock_then`]: Mutex::lock_then
/// [`try_lock_with_then`]: Mutex::try_lock_with_then
/// [`try_lock_for_with_then`]: Mutex::try_lock_for_with_then
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use spinlocks::queue::{ClhLock, ClhNode};
/// use spinlocks::Mutex;
///
/// const N: usize = 10;
///
/// let data = Arc::new(Mutex::<_, ClhLock>::new(0));
/// let handles: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::spawn(move || {
///             let mut node = ClhNode::new();
///             data.lock_with_then(&mut node, |data| *data += 1);
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(data.lock_then(|data| *data), N);
/// ```
pub struct Mutex<T: ?Sized, L> {
    lock: L,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`, on top of the raw lock ones.
unsafe impl<T: ?Sized + Send, L: Send> Send for Mutex<T, L> {}
unsafe impl<T: ?Sized + Send, L: Sync> Sync for Mutex<T, L> {}

impl<T, L> Mutex<T, L> {
    /// Creates a new mutex protecting `value` with an already built lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use spinlocks::queue::ArrayLock;
    /// use spinlocks::Mutex;
    ///
    /// let lock: ArrayLock = ArrayLock::with_capacity(4).unwrap();
    /// let mutex = Mutex::with_lock(lock, 0);
    /// ```
    pub const fn with_lock(lock: L, value: T) -> Self {
        Self { lock, data: UnsafeCell::new(value) }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T, L: Default> Mutex<T, L> {
    /// Creates a new mutex with a default constructed lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use spinlocks::spin::TasLock;
    /// use spinlocks::Mutex;
    ///
    /// let mutex = Mutex::<_, TasLock>::new(0);
    /// assert_eq!(mutex.into_inner(), 0);
    /// ```
    pub fn new(value: T) -> Self {
        Self::with_lock(L::default(), value)
    }
}

impl<T: ?Sized, L> Mutex<T, L> {
    /// Returns a mutable reference to the underlying data.
    ///
    /// No locking is needed since the call borrows the mutex mutably.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Returns a reference to the raw lock.
    pub const fn raw(&self) -> &L {
        &self.lock
    }
}

impl<T: ?Sized, L: Lock> Mutex<T, L> {
    /// Acquires this mutex with `node` and runs `f` against the protected
    /// data. The lock is released once `f` returns or unwinds.
    pub fn lock_with_then<F, Ret>(&self, node: &mut L::Node, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        // SAFETY: The guard's `drop` call is executed within this scope.
        let _guard = unsafe { RawGuard::lock(&self.lock, node) };
        // SAFETY: The lock is held for the guard's lifetime.
        f(unsafe { &mut *self.data.get() })
    }

    /// Acquires this mutex with a temporary node and runs `f` against the
    /// protected data.
    pub fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        self.lock_with_then(&mut L::Node::default(), f)
    }
}

impl<T: ?Sized, L: TryLock> Mutex<T, L> {
    /// Attempts to acquire this mutex without waiting and then runs `f`
    /// against the protected data, or against [`None`] on failure.
    pub fn try_lock_with_then<F, Ret>(&self, node: &mut L::Node, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        // SAFETY: On success the node is borrowed by the guard below.
        if !unsafe { self.lock.try_lock(node) } {
            return f(None);
        }
        // SAFETY: The lock was just acquired with this node.
        let _guard = unsafe { RawGuard::new(&self.lock, node) };
        // SAFETY: The lock is held for the guard's lifetime.
        f(Some(unsafe { &mut *self.data.get() }))
    }

    /// Same as [`try_lock_with_then`](Mutex::try_lock_with_then), with a
    /// temporary node.
    pub fn try_lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        self.try_lock_with_then(&mut L::Node::default(), f)
    }
}

impl<T: ?Sized, L: TimedLock> Mutex<T, L> {
    /// Spins for at most `timeout` trying to acquire this mutex, and then
    /// runs `f` against the protected data, or against [`None`] if the wait
    /// expired.
    pub fn try_lock_for_with_then<F, Ret>(&self, node: &mut L::Node, timeout: Duration, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        // SAFETY: On success the node is borrowed by the guard below.
        if !unsafe { self.lock.try_lock_for(node, timeout) } {
            return f(None);
        }
        // SAFETY: The lock was just acquired with this node.
        let _guard = unsafe { RawGuard::new(&self.lock, node) };
        // SAFETY: The lock is held for the guard's lifetime.
        f(Some(unsafe { &mut *self.data.get() }))
    }

    /// Same as [`try_lock_for_with_then`](Mutex::try_lock_for_with_then),
    /// with a temporary node.
    pub fn try_lock_for_then<F, Ret>(&self, timeout: Duration, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        self.try_lock_for_with_then(&mut L::Node::default(), timeout, f)
    }
}

impl<T: ?Sized, L: RawLock + Debug> Debug for Mutex<T, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("lock", &self.lock).finish_non_exhaustive()
    }
}

impl<T: Default, L: Default> Default for Mutex<T, L> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, L: Default> From<T> for Mutex<T, L> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}
