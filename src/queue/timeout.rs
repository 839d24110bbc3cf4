use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use core::time::Duration;
use std::time::Instant;

use crate::cfg::atomic::AtomicPtr;
use crate::lock::{RawLock, TimedLock};
use crate::relax::{Relax, Spin};

/// The record a [`TimeoutLock`] waiter enqueues, one per attempt.
///
/// `pred` is null while its owner waits or holds the lock. It is set to the
/// owner's predecessor if the owner gave up, or to [`available`] once the
/// owner released the lock.
#[derive(Debug)]
struct QNode {
    pred: AtomicPtr<QNode>,
}

impl QNode {
    fn alloc() -> *mut Self {
        Box::into_raw(Box::new(Self { pred: AtomicPtr::new(ptr::null_mut()) }))
    }

    /// # Safety
    ///
    /// `node` must come from [`QNode::alloc`], and the caller must be the
    /// last thread able to reach it.
    unsafe fn free(node: *mut Self) {
        drop(unsafe { Box::from_raw(node) });
    }
}

/// Marks the record of a thread that released the lock. Never dereferenced.
fn available() -> *mut QNode {
    NonNull::dangling().as_ptr()
}

/// Either acquired, or timed out behind the contained predecessor.
type Waited = Result<(), *mut QNode>;

/// The record a [`TimeoutLock`] holder needs to release the lock.
#[derive(Debug)]
pub struct TimeoutNode {
    qnode: *mut QNode,
}

// SAFETY: The record belongs to the lock's queue, not to the thread.
unsafe impl Send for TimeoutNode {}

impl TimeoutNode {
    /// Creates a new, empty node.
    pub const fn new() -> Self {
        Self { qnode: ptr::null_mut() }
    }
}

impl Default for TimeoutNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A CLH-style queue lock whose waiters may give up.
///
/// Acquisition is only available through
/// [`try_lock_for`](TimedLock::try_lock_for): a waiter that runs out of
/// time either removes itself from the tail of the queue or, if somebody
/// already queued behind it, leaves a pointer to its own predecessor in its
/// record so the successor can skip it. A releasing thread that has a
/// successor marks its record as available instead of clearing the tail.
///
/// The acquisition state is checked once before the deadline is, so a zero
/// timeout behaves like a single try-lock attempt.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use spinlocks::queue::{TimeoutLock, TimeoutNode};
/// use spinlocks::Mutex;
///
/// let mutex = Mutex::<_, TimeoutLock>::new(0);
/// let mut node = TimeoutNode::new();
/// let timeout = Duration::from_millis(10);
/// let done = mutex.try_lock_for_with_then(&mut node, timeout, |data| {
///     data.map(|data| *data += 1).is_some()
/// });
/// assert!(done);
/// assert_eq!(mutex.into_inner(), 1);
/// ```
pub struct TimeoutLock<R = Spin> {
    tail: AtomicPtr<QNode>,
    relax: PhantomData<R>,
}

// SAFETY: Records reachable from the tail are owned by the queue.
unsafe impl<R> Send for TimeoutLock<R> {}
// SAFETY: All shared state is atomic.
unsafe impl<R> Sync for TimeoutLock<R> {}

impl<R> TimeoutLock<R> {
    /// Creates a new, unlocked lock.
    pub fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()), relax: PhantomData }
    }

    /// Returns `true` if some thread holds, waits for or abandoned a record
    /// in this lock.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_queued(&self) -> bool {
        !self.tail.load(Relaxed).is_null()
    }
}

impl<R: Relax> TimeoutLock<R> {
    /// Walks past abandoned predecessors until the lock is released to the
    /// caller or the deadline expires. Returns the last predecessor on timeout.
    fn wait(&self, mut pred: *mut QNode, start: Instant, timeout: Duration) -> Waited {
        let mut relax = R::new();
        loop {
            // SAFETY: Only the successor of a record frees it, that is us.
            let pred_pred = unsafe { &(*pred).pred }.load(Acquire);
            if pred_pred == available() {
                // SAFETY: The releasing thread is done with its record.
                unsafe { QNode::free(pred) };
                return Ok(());
            }
            if !pred_pred.is_null() {
                // SAFETY: The abandoning thread is done with its record.
                unsafe { QNode::free(pred) };
                pred = pred_pred;
                continue;
            }
            if start.elapsed() >= timeout {
                return Err(pred);
            }
            relax.relax();
        }
    }
}

impl<R> Default for TimeoutLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for TimeoutLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutLock").field("queued", &self.is_queued()).finish()
    }
}

impl<R> Drop for TimeoutLock<R> {
    fn drop(&mut self) {
        // Without holders or waiters, the queue only has abandoned and
        // released records, chained through `pred`.
        let mut node = self.tail.load(Relaxed);
        while !node.is_null() && node != available() {
            // SAFETY: Nobody else references the queue anymore.
            let pred = unsafe { &(*node).pred }.load(Relaxed);
            unsafe { QNode::free(node) };
            node = pred;
        }
    }
}

// SAFETY: The lock is only granted to the record whose predecessor was
// marked available, or to a record swapped into an empty queue. Both paths
// read the release of the previous holder with acquire ordering.
unsafe impl<R: Relax> RawLock for TimeoutLock<R> {
    type Node = TimeoutNode;

    unsafe fn unlock(&self, node: &mut TimeoutNode) {
        let qnode = core::mem::replace(&mut node.qnode, ptr::null_mut());
        if self.tail.compare_exchange(qnode, ptr::null_mut(), Release, Relaxed).is_ok() {
            // SAFETY: No successor ever saw our record.
            unsafe { QNode::free(qnode) };
        } else {
            // SAFETY: Our successor frees the record once it sees the mark.
            unsafe { &(*qnode).pred }.store(available(), Release);
        }
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> TimedLock for TimeoutLock<R> {
    unsafe fn try_lock_for(&self, node: &mut TimeoutNode, timeout: Duration) -> bool {
        let start = Instant::now();
        let qnode = QNode::alloc();
        let pred = self.tail.swap(qnode, AcqRel);
        if pred.is_null() {
            node.qnode = qnode;
            return true;
        }
        let Err(pred) = self.wait(pred, start, timeout) else {
            node.qnode = qnode;
            return true;
        };
        if self.tail.compare_exchange(qnode, pred, Release, Relaxed).is_ok() {
            // SAFETY: We were still the tail, so nobody saw our record.
            unsafe { QNode::free(qnode) };
        } else {
            // SAFETY: Our successor frees the record once it skips it.
            unsafe { &(*qnode).pred }.store(pred, Release);
        }
        log::trace!("timeout lock attempt abandoned after {:?}", start.elapsed());
        false
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::TimeoutNode;
    use crate::relax::Yield;
    use crate::test::{self, Int};
    use crate::Mutex;

    type TimeoutLock = super::TimeoutLock<Yield>;

    const PATIENCE: Duration = Duration::from_millis(50);

    #[test]
    fn smoke() {
        let mutex = Mutex::<Int, TimeoutLock>::new(1);
        let mut node = TimeoutNode::new();
        for _ in 0..2 {
            let inc = |data: Option<&mut Int>| data.map(|data| *data += 1).is_some();
            assert!(mutex.try_lock_for_with_then(&mut node, PATIENCE, inc));
        }
        assert!(!mutex.raw().is_queued());
        assert_eq!(mutex.into_inner(), 3);
    }

    #[test]
    fn mutual_exclusion() {
        for threads in test::THREADS {
            for total in test::LIMITS {
                let lock = TimeoutLock::new();
                let value = test::timed_lots_and_lots(lock, threads, total, PATIENCE);
                assert_eq!(value, total);
            }
        }
    }

    #[test]
    fn mutual_exclusion_with_abandoned_attempts() {
        // Short patience makes waiters time out and leave the queue.
        let lock = TimeoutLock::new();
        let value = test::timed_lots_and_lots(lock, 8, 10_000, Duration::from_micros(1));
        assert_eq!(value, 10_000);
    }

    #[test]
    fn zero_timeout_under_contention_returns_quickly() {
        let mutex = Arc::new(Mutex::<(), TimeoutLock>::new(()));
        let c_mutex = Arc::clone(&mutex);
        let elapsed = mutex.try_lock_for_then(PATIENCE, |data| {
            assert!(data.is_some());
            thread::spawn(move || {
                let start = Instant::now();
                let got = c_mutex.try_lock_for_then(Duration::ZERO, |data| data.is_some());
                assert!(!got);
                start.elapsed()
            })
            .join()
            .unwrap()
        });
        assert!(elapsed < Duration::from_secs(1));
        assert!(mutex.try_lock_for_then(Duration::ZERO, |data| data.is_some()));
    }

    #[test]
    fn abandoned_attempts_leave_the_queue() {
        let mutex = Arc::new(Mutex::<Int, TimeoutLock>::new(0));
        let mut node = TimeoutNode::new();
        let acquired = mutex.try_lock_for_with_then(&mut node, PATIENCE, |data| {
            let data = data.unwrap();
            // Two waiters give up while queued behind us.
            for _ in 0..2 {
                let c_mutex = Arc::clone(&mutex);
                let got = thread::spawn(move || {
                    c_mutex.try_lock_for_then(Duration::from_millis(5), |data| data.is_some())
                })
                .join()
                .unwrap();
                assert!(!got);
            }
            *data += 1;
            true
        });
        assert!(acquired);
        let value = mutex.try_lock_for_with_then(&mut node, PATIENCE, |data| data.map(|d| *d));
        assert_eq!(value, Some(1));
    }
}
