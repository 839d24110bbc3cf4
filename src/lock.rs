use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;

use crate::cfg::atomic::{fence, AtomicBool};
use crate::relax::Relax;

/// The capability every lock in this crate shares: releasing a lock that is
/// held through a per-thread queue record.
///
/// Locks that keep per-thread state (queue nodes, array slots, recycled CLH
/// records) keep it inside `Self::Node` instead of hidden thread-locals. A
/// thread owns one node and hands it, mutably borrowed, to both the acquire
/// and the matching [`unlock`] call. Locks without per-thread state use `()`.
///
/// # Safety
///
/// Implementors must guarantee that, between a successful acquisition by
/// [`Lock::lock`] or [`TimedLock::try_lock_for`] and the matching [`unlock`],
/// no other acquisition of the same lock succeeds, and that writes performed
/// by the holder before [`unlock`] are visible to the next holder.
///
/// [`unlock`]: RawLock::unlock
pub unsafe trait RawLock {
    /// The per-thread record used to form the waiting queue.
    type Node: Default;

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock, acquired with this very `node`,
    /// and the node must not have been moved since. Releasing a lock that is
    /// not held is undefined behavior for every lock in this crate; no
    /// ownership check is performed.
    unsafe fn unlock(&self, node: &mut Self::Node);
}

/// Locks that support an unbounded, blocking acquisition.
///
/// # Safety
///
/// See [`RawLock`].
pub unsafe trait Lock: RawLock {
    /// Spins until the lock is acquired.
    ///
    /// # Safety
    ///
    /// Queue locks publish the address of `node` to other threads. Once this
    /// call returns, `node` must not be moved, dropped or handed to another
    /// acquisition until the matching [`unlock`](RawLock::unlock) returned.
    unsafe fn lock(&self, node: &mut Self::Node);
}

/// Locks that support a single, non-blocking acquisition attempt.
///
/// # Safety
///
/// See [`RawLock`].
pub unsafe trait TryLock: RawLock {
    /// Attempts to acquire the lock without waiting, returns `true` on success.
    ///
    /// # Safety
    ///
    /// Same as [`Lock::lock`] when the attempt succeeds.
    unsafe fn try_lock(&self, node: &mut Self::Node) -> bool;
}

/// Locks that support a bounded-wait acquisition.
///
/// # Safety
///
/// See [`RawLock`].
pub unsafe trait TimedLock: RawLock {
    /// Spins for at most `timeout` trying to acquire the lock, returns `true`
    /// on success. When the wait expires the calling thread leaves the lock's
    /// queue and `false` is returned.
    ///
    /// # Safety
    ///
    /// Same as [`Lock::lock`] when the attempt succeeds.
    unsafe fn try_lock_for(&self, node: &mut Self::Node, timeout: Duration) -> bool;
}

/// Releases a held lock when dropped.
///
/// Never handed out to users: a forgotten guard would leave a queue node
/// linked into the lock while the caller regains access to it. Guards only
/// live inside closure scopes of this crate, see [`RawGuard::lock`].
#[must_use = "if unused the lock will immediately unlock"]
pub(crate) struct RawGuard<'a, L: RawLock> {
    lock: &'a L,
    node: &'a mut L::Node,
}

impl<'a, L: RawLock> RawGuard<'a, L> {
    /// Wraps a lock that has just been acquired with `node`.
    ///
    /// # Safety
    ///
    /// The lock must be held through `node` by the calling thread.
    pub(crate) unsafe fn new(lock: &'a L, node: &'a mut L::Node) -> Self {
        Self { lock, node }
    }
}

impl<'a, L: Lock> RawGuard<'a, L> {
    /// Acquires `lock` and returns a guard that will release it.
    ///
    /// # Safety
    ///
    /// The returned guard instance **must** be dropped, that is, it **must
    /// not** be "forgotten" (e.g. `core::mem::forget`), or being targeted by
    /// any other operation that would prevent it from executing its `drop`
    /// call.
    pub(crate) unsafe fn lock(lock: &'a L, node: &'a mut L::Node) -> Self {
        // SAFETY: The node stays borrowed until the guard unlocks.
        unsafe { lock.lock(node) };
        // SAFETY: The lock was just acquired with this node.
        unsafe { Self::new(lock, node) }
    }
}

impl<L: RawLock> Drop for RawGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: A guard only exists while the lock is held with its node.
        unsafe { self.lock.unlock(self.node) }
    }
}

/// Spin helpers for boolean flags that a second thread waits on.
///
/// A waiter loads the flag with a relaxed ordering while spinning, then
/// issues an acquire fence once it observed the awaited value. Paired with
/// the releasing store of the notifier, the writes made before the
/// notification are visible after the wait.
pub(crate) trait SpinFlag {
    /// Spins while the flag is `true`.
    fn wait_while_set<R: Relax>(&self);

    /// Spins while the flag is `false`.
    fn wait_until_set<R: Relax>(&self);

    /// Publishes `value` with release ordering.
    fn notify(&self, value: bool);
}

impl SpinFlag for AtomicBool {
    fn wait_while_set<R: Relax>(&self) {
        let mut relax = R::new();
        while self.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);
    }

    fn wait_until_set<R: Relax>(&self) {
        let mut relax = R::new();
        while !self.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);
    }

    fn notify(&self, value: bool) {
        self.store(value, Release);
    }
}
