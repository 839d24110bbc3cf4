use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::Relaxed;

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{AtomicBool, AtomicUsize};
use crate::error::{Error, Result};
use crate::lock::{Lock, RawLock, SpinFlag};
use crate::relax::{Relax, Spin};

/// The slot an [`ArrayLock`] assigned to a thread for its current
/// acquisition.
#[derive(Debug, Default)]
pub struct ArrayNode {
    slot: usize,
}

impl ArrayNode {
    /// Creates a new node.
    pub const fn new() -> Self {
        Self { slot: 0 }
    }
}

/// Anderson's array-based queue lock.
///
/// A shared counter hands out tickets, and ticket `t` waits on slot
/// `t % capacity` of a flag array. Each flag lives on its own cache line, so
/// every waiter spins on a distinct location. Releasing the lock clears the
/// holder's slot and raises the next one.
///
/// # Preconditions
///
/// No more than `capacity` threads may contend for the lock at the same time.
/// With more, two threads share a slot and mutual exclusion is lost. No
/// check is performed.
///
/// # Examples
///
/// ```
/// use spinlocks::queue::{ArrayLock, ArrayNode};
/// use spinlocks::relax::Spin;
/// use spinlocks::Mutex;
///
/// let mutex = Mutex::with_lock(ArrayLock::<Spin>::with_capacity(8).unwrap(), 0);
/// let mut node = ArrayNode::new();
/// mutex.lock_with_then(&mut node, |data| *data += 1);
/// assert_eq!(mutex.into_inner(), 1);
/// ```
pub struct ArrayLock<R = Spin> {
    tail: CachePadded<AtomicUsize>,
    flags: Box<[CachePadded<AtomicBool>]>,
    relax: PhantomData<R>,
}

impl<R> ArrayLock<R> {
    /// Creates a new lock for at most `capacity` concurrent threads.
    ///
    /// Fails with [`Error::InvalidArgument`] if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid("capacity", "must be greater than zero"));
        }
        Ok(Self::with_slots(capacity))
    }

    /// Builds a lock with `capacity` slots, the first one raised.
    fn with_slots(capacity: usize) -> Self {
        let flags = (0..capacity).map(|slot| CachePadded::new(AtomicBool::new(slot == 0)));
        let tail = CachePadded::new(AtomicUsize::new(0));
        Self { tail, flags: flags.collect(), relax: PhantomData }
    }

    /// The number of slots of this lock.
    pub fn capacity(&self) -> usize {
        self.flags.len()
    }

    #[cfg(test)]
    fn tickets(&self) -> usize {
        self.tail.load(Relaxed)
    }
}

impl<R> Default for ArrayLock<R> {
    /// Creates a lock with one slot per available processor.
    fn default() -> Self {
        let capacity = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_slots(capacity)
    }
}

impl<R> Debug for ArrayLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ArrayLock");
        d.field("capacity", &self.capacity()).field("tail", &self.tail.load(Relaxed)).finish()
    }
}

// SAFETY: Exactly one flag is raised while nobody holds the lock, and only
// the holder of a ticket for that slot may clear it.
unsafe impl<R: Relax> RawLock for ArrayLock<R> {
    type Node = ArrayNode;

    unsafe fn unlock(&self, node: &mut ArrayNode) {
        let slot = node.slot;
        self.flags[slot].store(false, Relaxed);
        self.flags[(slot + 1) % self.capacity()].notify(true);
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for ArrayLock<R> {
    unsafe fn lock(&self, node: &mut ArrayNode) {
        let slot = self.tail.fetch_add(1, Relaxed) % self.capacity();
        node.slot = slot;
        self.flags[slot].wait_until_set::<R>();
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::ArrayNode;
    use crate::relax::Yield;
    use crate::test;
    use crate::Error;
    use crate::Mutex;

    type ArrayLock = super::ArrayLock<Yield>;

    #[test]
    fn smoke() {
        test::smoke(ArrayLock::with_capacity(1).unwrap());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |threads| ArrayLock::with_capacity(threads).unwrap());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(ArrayLock::with_capacity(8).unwrap(), 8, 1_000);
    }

    #[test]
    fn fifo_order() {
        // One slot for the holder plus one for each waiter.
        test::fifo_order(ArrayLock::with_capacity(9).unwrap(), 8, ArrayLock::tickets);
    }

    #[test]
    fn wraps_around_the_array() {
        let mutex = Mutex::with_lock(ArrayLock::with_capacity(3).unwrap(), 0);
        let mut node = ArrayNode::new();
        for _ in 0..10 {
            mutex.lock_with_then(&mut node, |data| *data += 1);
        }
        assert_eq!(mutex.into_inner(), 10);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ArrayLock::with_capacity(0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "capacity", .. }));
    }

    #[test]
    fn default_has_one_slot_per_processor() {
        let lock = ArrayLock::default();
        let processors = std::thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(lock.capacity(), processors);
        test::smoke(lock);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;

    #[test]
    fn lock_join() {
        models::lock_join(|| super::ArrayLock::<Yield>::with_capacity(2).unwrap());
    }
}
