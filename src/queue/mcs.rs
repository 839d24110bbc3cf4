use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::lock::{Lock, RawLock, SpinFlag, TryLock};
use crate::relax::{Relax, Spin};

/// A locally-accessible record for forming the waiting queue of a
/// [`McsLock`].
///
/// The record is linked into the lock while its thread waits for or holds
/// the lock, and it is reset at the start of every acquisition, so the same
/// node may be reused for any number of acquisitions, of any lock.
#[derive(Debug)]
pub struct McsNode {
    next: AtomicPtr<McsNode>,
    locked: AtomicBool,
}

impl McsNode {
    /// Creates new `McsNode` instance.
    pub fn new() -> Self {
        Self { next: AtomicPtr::new(ptr::null_mut()), locked: AtomicBool::new(false) }
    }

    /// Returns a raw mutable pointer of this node.
    fn as_ptr(&self) -> *mut Self {
        (self as *const Self).cast_mut()
    }

    /// Resets the links of this node before it is published.
    fn reset(&mut self) {
        self.next.store(ptr::null_mut(), Relaxed);
        self.locked.store(true, Relaxed);
    }

    /// A relaxed loop that returns a pointer to the successor once it
    /// finishes linking with the current thread.
    fn wait_next_relaxed<R: Relax>(&self) -> *mut Self {
        let mut relax = R::new();
        loop {
            let ptr = self.next.load(Relaxed);
            let true = ptr.is_null() else { return ptr };
            relax.relax();
        }
    }
}

impl Default for McsNode {
    fn default() -> Self {
        Self::new()
    }
}

/// The Mellor-Crummey and Scott list-based queue lock.
///
/// Every waiting thread spins on the `locked` flag of its own node. The lock
/// only holds a pointer to the tail of the queue, and the releasing thread
/// hands the lock directly to its successor, so threads acquire the lock in
/// the order they swapped themselves into the tail.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use spinlocks::queue::{McsLock, McsNode};
/// use spinlocks::Mutex;
///
/// let mutex = Arc::new(Mutex::<_, McsLock>::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     let mut node = McsNode::new();
///     c_mutex.lock_with_then(&mut node, |data| *data = 10);
/// })
/// .join().expect("thread::spawn failed");
///
/// let mut node = McsNode::new();
/// assert_eq!(mutex.lock_with_then(&mut node, |data| *data), 10);
/// ```
pub struct McsLock<R = Spin> {
    tail: AtomicPtr<McsNode>,
    relax: PhantomData<R>,
}

// SAFETY: The tail pointer is only dereferenced under the queue protocol.
unsafe impl<R> Send for McsLock<R> {}
// SAFETY: All shared state is atomic.
unsafe impl<R> Sync for McsLock<R> {}

impl<R> McsLock<R> {
    /// Creates a new, unlocked and core based lock (const).
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()), relax: PhantomData }
    }

    /// Creates a new, unlocked and loom based lock (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()), relax: PhantomData }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Relaxed).is_null()
    }

    /// Unlocks the lock if the candidate node is the queue's tail.
    fn try_unlock_release(&self, node: *mut McsNode) -> bool {
        self.tail.compare_exchange(node, ptr::null_mut(), Release, Relaxed).is_ok()
    }

    #[cfg(test)]
    fn tail_addr(&self) -> usize {
        self.tail.load(Relaxed) as usize
    }
}

impl<R> Default for McsLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for McsLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("McsLock").field("locked", &self.is_locked()).finish()
    }
}

// SAFETY: Only the thread whose node reached the queue head holds the lock,
// and the release store to the successor's flag pairs with its acquire fence.
unsafe impl<R: Relax> RawLock for McsLock<R> {
    type Node = McsNode;

    unsafe fn unlock(&self, node: &mut McsNode) {
        let mut next = node.next.load(Relaxed);
        // If we don't have a known successor currently,
        if next.is_null() {
            // and we are the tail, then dequeue and free the lock.
            let false = self.try_unlock_release(node.as_ptr()) else { return };
            // But if we are not the tail, then we have a pending successor. We
            // must wait for them to finish linking with us.
            next = node.wait_next_relaxed::<R>();
        }
        fence(Acquire);
        // Notify our successor that they hold the lock.
        // SAFETY: We already verified that our successor is not null.
        unsafe { &(*next).locked }.notify(false);
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for McsLock<R> {
    unsafe fn lock(&self, node: &mut McsNode) {
        node.reset();
        let pred = self.tail.swap(node.as_ptr(), AcqRel);
        // If we have a predecessor, complete the link so it will notify us.
        if !pred.is_null() {
            // SAFETY: Already verified that our predecessor is not null, and
            // it stays linked until it notifies us.
            unsafe { &(*pred).next }.store(node.as_ptr(), Release);
            node.locked.wait_while_set::<R>();
        }
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> TryLock for McsLock<R> {
    unsafe fn try_lock(&self, node: &mut McsNode) -> bool {
        node.reset();
        self.tail.compare_exchange(ptr::null_mut(), node.as_ptr(), AcqRel, Relaxed).is_ok()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::McsNode;
    use crate::relax::Yield;
    use crate::test;
    use crate::Mutex;

    type McsLock = super::McsLock<Yield>;

    #[test]
    fn smoke() {
        test::smoke(McsLock::new());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| McsLock::new());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(McsLock::new(), 8, 1_000);
    }

    #[test]
    fn fifo_order() {
        test::fifo_order(McsLock::new(), 8, McsLock::tail_addr);
    }

    #[test]
    fn node_reused_across_locks() {
        let a = Mutex::<_, McsLock>::new(1);
        let b = Mutex::<_, McsLock>::new(2);
        let mut node = McsNode::new();
        let sum = a.lock_with_then(&mut node, |a| *a) + b.lock_with_then(&mut node, |b| *b);
        assert_eq!(sum, 3);
        assert!(!a.raw().is_locked());
        assert!(!b.raw().is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = Arc::new(Mutex::<_, McsLock>::new(()));
        let c_mutex = Arc::clone(&mutex);
        let acquired = mutex.lock_then(|()| {
            std::thread::spawn(move || c_mutex.try_lock_then(|data| data.is_some()))
                .join()
                .unwrap()
        });
        assert!(!acquired);
        assert!(mutex.try_lock_then(|data| data.is_some()));
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;

    type McsLock = super::McsLock<Yield>;

    #[test]
    fn lock_join() {
        models::lock_join(McsLock::new);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(McsLock::new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(McsLock::new);
    }
}
