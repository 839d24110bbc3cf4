use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{AcqRel, Relaxed};

use crate::cfg::atomic::{AtomicBool, AtomicPtr};
use crate::lock::{Lock, RawLock, SpinFlag};
use crate::relax::{Relax, Spin};

/// The record a CLH waiter publishes. Its successor spins on `locked`.
#[derive(Debug)]
struct QNode {
    locked: AtomicBool,
}

impl QNode {
    fn alloc(locked: bool) -> NonNull<Self> {
        let node = Box::new(Self { locked: AtomicBool::new(locked) });
        NonNull::from(Box::leak(node))
    }

    /// # Safety
    ///
    /// `node` must come from [`QNode::alloc`] and must not be reachable by
    /// any other thread.
    unsafe fn free(node: NonNull<Self>) {
        drop(unsafe { Box::from_raw(node.as_ptr()) });
    }
}

/// A thread's handle on the CLH record it will enqueue next.
///
/// Releasing a [`ClhLock`] leaves the handle's old record in the queue, for
/// the successor to spin on, and the handle adopts the record of its
/// predecessor instead. Records therefore circulate between threads and no
/// allocation happens past the first acquisition. Dropping the handle frees
/// the record it currently owns.
pub struct ClhNode {
    node: NonNull<QNode>,
    pred: *mut QNode,
}

// SAFETY: The handle exclusively owns `node` whenever it is not enqueued, and
// enqueued records are only reached through atomics.
unsafe impl Send for ClhNode {}

impl ClhNode {
    /// Allocates a new handle with a fresh record.
    pub fn new() -> Self {
        Self { node: QNode::alloc(false), pred: ptr::null_mut() }
    }
}

impl Default for ClhNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ClhNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClhNode").field("node", &self.node).finish_non_exhaustive()
    }
}

impl Drop for ClhNode {
    fn drop(&mut self) {
        // SAFETY: An idle handle is the only owner of its record.
        unsafe { QNode::free(self.node) }
    }
}

/// The Craig, Landin and Hagersten queue lock.
///
/// The lock is a pointer to the most recently enqueued record. A thread
/// marks its own record as locked, swaps it into the tail and spins on the
/// record it replaced, until its predecessor clears it. The queue is implicit:
/// a waiter only knows its predecessor, and the lock is granted in tail swap
/// order.
///
/// # Examples
///
/// ```
/// use spinlocks::queue::{ClhLock, ClhNode};
/// use spinlocks::Mutex;
///
/// let mutex = Mutex::<_, ClhLock>::new(0);
/// let mut node = ClhNode::new();
/// for _ in 0..10 {
///     mutex.lock_with_then(&mut node, |data| *data += 1);
/// }
/// assert_eq!(mutex.into_inner(), 10);
/// ```
pub struct ClhLock<R = Spin> {
    tail: AtomicPtr<QNode>,
    relax: PhantomData<R>,
}

// SAFETY: The tail record is owned by the lock while it is not held, and is
// only reached through atomics.
unsafe impl<R> Send for ClhLock<R> {}
// SAFETY: All shared state is atomic.
unsafe impl<R> Sync for ClhLock<R> {}

impl<R> ClhLock<R> {
    /// Creates a new, unlocked lock, with an initial record as its tail.
    pub fn new() -> Self {
        let tail = AtomicPtr::new(QNode::alloc(false).as_ptr());
        Self { tail, relax: PhantomData }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        // SAFETY: The tail always points to a live record.
        unsafe { &*self.tail.load(Relaxed) }.locked.load(Relaxed)
    }

    #[cfg(test)]
    fn tail_addr(&self) -> usize {
        self.tail.load(Relaxed) as usize
    }
}

impl<R> Default for ClhLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for ClhLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClhLock").field("locked", &self.is_locked()).finish()
    }
}

impl<R> Drop for ClhLock<R> {
    fn drop(&mut self) {
        let tail = self.tail.load(Relaxed);
        // SAFETY: With no holders left, the tail record is referenced by no
        // handle: its last owner adopted its predecessor on unlock.
        if let Some(tail) = NonNull::new(tail) {
            unsafe { QNode::free(tail) }
        }
    }
}

// SAFETY: Clearing our record with release ordering pairs with the acquire
// fence of the only thread spinning on it.
unsafe impl<R: Relax> RawLock for ClhLock<R> {
    type Node = ClhNode;

    unsafe fn unlock(&self, node: &mut ClhNode) {
        // SAFETY: The record is live, our successor (or the tail) owns it now.
        unsafe { node.node.as_ref() }.locked.notify(false);
        // SAFETY: The lock returned with a non-null predecessor, which no
        // other thread references anymore.
        node.node = unsafe { NonNull::new_unchecked(node.pred) };
        node.pred = ptr::null_mut();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for ClhLock<R> {
    unsafe fn lock(&self, node: &mut ClhNode) {
        // SAFETY: An idle handle exclusively owns its record.
        let qnode = unsafe { node.node.as_ref() };
        qnode.locked.store(true, Relaxed);
        let pred = self.tail.swap(node.node.as_ptr(), AcqRel);
        node.pred = pred;
        // SAFETY: The tail is never null and our predecessor keeps its record
        // alive until we stop spinning on it.
        unsafe { &*pred }.locked.wait_while_set::<R>();
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::ClhNode;
    use crate::relax::Yield;
    use crate::test;
    use crate::Mutex;

    type ClhLock = super::ClhLock<Yield>;

    #[test]
    fn smoke() {
        test::smoke(ClhLock::new());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| ClhLock::new());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(ClhLock::new(), 8, 1_000);
    }

    #[test]
    fn fifo_order() {
        test::fifo_order(ClhLock::new(), 8, ClhLock::tail_addr);
    }

    #[test]
    fn records_circulate_between_locks() {
        let a = Mutex::<_, ClhLock>::new(0);
        let b = Mutex::<_, ClhLock>::new(0);
        let mut node = ClhNode::new();
        for _ in 0..100 {
            a.lock_with_then(&mut node, |a| *a += 1);
            b.lock_with_then(&mut node, |b| *b += 1);
        }
        drop(node);
        assert!(!a.raw().is_locked());
        assert_eq!(a.into_inner() + b.into_inner(), 200);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;

    #[test]
    fn lock_join() {
        models::lock_join(super::ClhLock::<Yield>::new);
    }
}
