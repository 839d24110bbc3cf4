use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_utils::CachePadded;
use static_assertions::{const_assert, const_assert_eq};

use crate::cfg::atomic::{fence, AtomicPtr, AtomicU32};
use crate::lock::{Lock, RawLock};
use crate::registry::ThreadRegistry;
use crate::relax::{Relax, Spin};

/// Set on the last record of a local segment once it joined the global queue.
const TAIL_WHEN_SPLICED: u32 = 1 << 31;
/// Set while the owner of the record holds or waits for the lock.
const SUCCESSOR_MUST_WAIT: u32 = 1 << 30;
/// The low bits of the state word carry the cluster of the record's owner.
const CLUSTER_MASK: u32 = SUCCESSOR_MUST_WAIT - 1;

/// Number of local queues of a [`HclhLock`].
pub const MAX_CLUSTERS: usize = 32;

const_assert_eq!(TAIL_WHEN_SPLICED & SUCCESSOR_MUST_WAIT, 0);
const_assert_eq!(TAIL_WHEN_SPLICED & CLUSTER_MASK, 0);
const_assert!(MAX_CLUSTERS - 1 <= CLUSTER_MASK as usize);

/// A queue record, allocated by and owned by one lock's [`Records`].
struct QNode {
    state: AtomicU32,
    next_alloc: *mut QNode,
}

impl QNode {
    /// Atomically replaces the state word with `f(state)`.
    fn update<F: Fn(u32) -> u32>(&self, f: F) {
        let mut state = self.state.load(Relaxed);
        loop {
            match self.state.compare_exchange_weak(state, f(state), AcqRel, Relaxed) {
                Ok(_) => return,
                Err(actual) => state = actual,
            }
        }
    }

    /// Waits on a local predecessor. Returns `true` once it handed the lock
    /// to us, or `false` if we must splice the local queue as cluster master.
    fn wait_for_grant_or_cluster_master<R: Relax>(&self, cluster: u32) -> bool {
        let mut relax = R::new();
        loop {
            let state = self.state.load(Relaxed);
            if state & CLUSTER_MASK != cluster || state & TAIL_WHEN_SPLICED != 0 {
                return false;
            }
            if state & SUCCESSOR_MUST_WAIT == 0 {
                fence(Acquire);
                return true;
            }
            relax.relax();
        }
    }

    /// Waits on a global predecessor until it released the lock.
    fn wait_while_successor_must_wait<R: Relax>(&self) {
        let mut relax = R::new();
        while self.state.load(Relaxed) & SUCCESSOR_MUST_WAIT != 0 {
            relax.relax();
        }
        fence(Acquire);
    }
}

/// Every record one lock ever allocated, shared by the lock and the handles
/// bound to it. Records are freed once both are gone.
#[derive(Debug)]
struct Records {
    arena: AtomicPtr<QNode>,
    free: Mutex<Vec<*mut QNode>>,
}

// SAFETY: Records are only reached through atomics, and idle records sit in
// `free` behind a mutex.
unsafe impl Send for Records {}
// SAFETY: See `Send`.
unsafe impl Sync for Records {}

impl Records {
    fn new() -> Self {
        Self { arena: AtomicPtr::new(ptr::null_mut()), free: Mutex::new(Vec::new()) }
    }

    /// Hands out an idle record, allocating one if none was given back.
    fn take(&self) -> *mut QNode {
        let idle = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        idle.unwrap_or_else(|| self.alloc())
    }

    /// Takes back an idle record that a handle no longer uses.
    fn give(&self, node: *mut QNode) {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).push(node);
    }

    fn alloc(&self) -> *mut QNode {
        let state = AtomicU32::new(0);
        let node = Box::into_raw(Box::new(QNode { state, next_alloc: ptr::null_mut() }));
        let mut head = self.arena.load(Relaxed);
        loop {
            // SAFETY: The record is not published yet.
            unsafe { (*node).next_alloc = head };
            match self.arena.compare_exchange_weak(head, node, Release, Relaxed) {
                Ok(_) => return node,
                Err(actual) => head = actual,
            }
        }
    }

    #[cfg(test)]
    fn allocated(&self) -> usize {
        let mut count = 0;
        let mut node = self.arena.load(Acquire);
        while !node.is_null() {
            count += 1;
            // SAFETY: Records live as long as `self`.
            node = unsafe { (*node).next_alloc };
        }
        count
    }
}

impl Drop for Records {
    fn drop(&mut self) {
        let mut node = self.arena.load(Relaxed);
        while !node.is_null() {
            // SAFETY: Every record came from `alloc`, and with the lock and
            // all of its handles gone nobody dereferences them again.
            let next = unsafe { (*node).next_alloc };
            drop(unsafe { Box::from_raw(node) });
            node = next;
        }
    }
}

/// A thread's handle on the record it will enqueue next in a [`HclhLock`].
///
/// Records belong to the lock that allocated them and circulate between
/// threads the same way [`ClhNode`](crate::queue::ClhNode) records do. A
/// handle is bound to one lock at a time: used with another lock, it gives
/// its record back to the previous lock and takes one from the new lock.
/// Dropping the handle gives its record back as well, so temporary handles
/// do not grow the lock's memory.
#[derive(Debug)]
pub struct HclhNode {
    records: Option<Arc<Records>>,
    node: *mut QNode,
    pred: *mut QNode,
}

// SAFETY: The handle keeps its records alive and only points into them.
unsafe impl Send for HclhNode {}

impl HclhNode {
    /// Creates a new handle, not yet bound to any lock.
    pub const fn new() -> Self {
        Self { records: None, node: ptr::null_mut(), pred: ptr::null_mut() }
    }

    /// Gives the idle record back to the lock it came from, if any.
    fn unbind(&mut self) {
        if let Some(records) = self.records.take() {
            records.give(self.node);
        }
        self.node = ptr::null_mut();
    }
}

impl Drop for HclhNode {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl Default for HclhNode {
    fn default() -> Self {
        Self::new()
    }
}

/// The hierarchical CLH queue lock.
///
/// Threads first join the CLH queue of their cluster. A thread whose local
/// predecessor is still waiting in the same cluster simply waits for it. The
/// others become cluster master and splice the whole local queue, up to its
/// current tail, into the global queue with a single compare-and-swap. Each
/// splice therefore moves a batch of same-cluster waiters that will be
/// granted the lock one after another.
///
/// Within one cluster, the lock is granted in local queue order.
///
/// Clusters come from the lock's [`ThreadRegistry`]. Clusters beyond
/// [`MAX_CLUSTERS`] share local queues, modulo [`MAX_CLUSTERS`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use spinlocks::hier::{HclhLock, HclhNode};
/// use spinlocks::registry::ThreadRegistry;
/// use spinlocks::relax::Spin;
/// use spinlocks::Mutex;
///
/// let registry = Arc::new(ThreadRegistry::new(4).unwrap());
/// let mutex = Mutex::with_lock(HclhLock::<Spin>::new(registry), 0);
/// let mut node = HclhNode::new();
/// for _ in 0..10 {
///     mutex.lock_with_then(&mut node, |data| *data += 1);
/// }
/// assert_eq!(mutex.into_inner(), 10);
/// ```
pub struct HclhLock<R = Spin> {
    global: CachePadded<AtomicPtr<QNode>>,
    local: Box<[CachePadded<AtomicPtr<QNode>>]>,
    records: Arc<Records>,
    registry: Arc<ThreadRegistry>,
    relax: PhantomData<R>,
}

// SAFETY: Records outlive the lock and are only reached through atomics
// while it is shared.
unsafe impl<R> Send for HclhLock<R> {}
// SAFETY: All shared state is atomic.
unsafe impl<R> Sync for HclhLock<R> {}

impl<R> HclhLock<R> {
    /// Creates a new, unlocked lock whose clusters come from `registry`.
    pub fn new(registry: Arc<ThreadRegistry>) -> Self {
        let local = (0..MAX_CLUSTERS).map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())));
        let records = Records::new();
        // The head record never had an owner, its successor may go.
        let head = records.alloc();
        Self {
            global: CachePadded::new(AtomicPtr::new(head)),
            local: local.collect(),
            records: Arc::new(records),
            registry,
            relax: PhantomData,
        }
    }

    /// The registry that assigns clusters to threads.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    fn cluster(&self) -> u32 {
        // The modulo keeps the value within `CLUSTER_MASK`.
        (self.registry.cluster() % MAX_CLUSTERS) as u32
    }

    #[cfg(test)]
    fn local_tail_addr(&self) -> usize {
        self.local[self.cluster() as usize].load(Relaxed) as usize
    }
}

impl<R> Default for HclhLock<R> {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl<R> Debug for HclhLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let group_size = self.registry.group_size();
        f.debug_struct("HclhLock").field("group_size", &group_size).finish_non_exhaustive()
    }
}

// SAFETY: A record's successor waits until its owner clears the successor
// must wait bit with release ordering, on both the local and global paths.
unsafe impl<R: Relax> RawLock for HclhLock<R> {
    type Node = HclhNode;

    unsafe fn unlock(&self, node: &mut HclhNode) {
        let cluster = self.cluster();
        // SAFETY: Both records belong to this lock and stay allocated.
        let (qnode, pred) = unsafe { (&*node.node, &*node.pred) };
        qnode.update(|state| state & !SUCCESSOR_MUST_WAIT);
        pred.update(|_| cluster | SUCCESSOR_MUST_WAIT);
        node.node = node.pred;
        node.pred = ptr::null_mut();
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for HclhLock<R> {
    unsafe fn lock(&self, node: &mut HclhNode) {
        let bound = matches!(&node.records, Some(records) if Arc::ptr_eq(records, &self.records));
        if !bound {
            node.unbind();
            node.node = self.records.take();
            node.records = Some(Arc::clone(&self.records));
        }
        let cluster = self.cluster();
        let my = node.node;
        // Recycled records carry the cluster of their previous owner.
        // SAFETY: An idle handle exclusively owns its record.
        unsafe { &*my }.update(|_| cluster | SUCCESSOR_MUST_WAIT);

        let local = &self.local[cluster as usize];
        let mut pred = local.load(Relaxed);
        while let Err(actual) = local.compare_exchange_weak(pred, my, AcqRel, Relaxed) {
            pred = actual;
        }
        // SAFETY: Records are never freed while the lock is alive.
        if !pred.is_null() && unsafe { &*pred }.wait_for_grant_or_cluster_master::<R>(cluster) {
            node.pred = pred;
            return;
        }

        // Cluster master: splice the local queue into the global one.
        let (gpred, local_tail) = loop {
            let gpred = self.global.load(Acquire);
            let local_tail = local.load(Acquire);
            if self.global.compare_exchange_weak(gpred, local_tail, AcqRel, Relaxed).is_ok() {
                break (gpred, local_tail);
            }
        };
        // SAFETY: Records are never freed while the lock is alive.
        unsafe { &*local_tail }.update(|state| state | TAIL_WHEN_SPLICED);
        unsafe { &*gpred }.wait_while_successor_must_wait::<R>();
        node.pred = gpred;
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::{HclhNode, MAX_CLUSTERS};
    use crate::lock::{Lock, RawLock};
    use crate::registry::ThreadRegistry;
    use crate::relax::Yield;
    use crate::test;
    use crate::Mutex;

    type HclhLock = super::HclhLock<Yield>;

    fn lock(group_size: usize) -> HclhLock {
        HclhLock::new(Arc::new(ThreadRegistry::new(group_size).unwrap()))
    }

    #[test]
    fn smoke() {
        test::smoke(lock(2));
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(16, |_| lock(2));
    }

    #[test]
    fn single_cluster_mutual_exclusion() {
        assert_eq!(test::lots_and_lots(lock(64), 8, 10_000), 10_000);
    }

    #[test]
    fn more_clusters_than_local_queues() {
        let threads = MAX_CLUSTERS + 8;
        assert_eq!(test::lots_and_lots(lock(1), threads, 10_000), 10_000);
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(lock(2), 8, 1_000);
    }

    #[test]
    fn fifo_order_within_cluster() {
        test::fifo_order(lock(64), 8, HclhLock::local_tail_addr);
    }

    #[test]
    fn prefers_same_cluster_grants() {
        test::prefers_same_cluster(HclhLock::new);
    }

    #[test]
    fn temporary_handles_recycle_records() {
        let lock = lock(2);
        for _ in 0..1_000 {
            let mut node = HclhNode::new();
            // SAFETY: The node outlives the matching unlock below.
            unsafe {
                lock.lock(&mut node);
                lock.unlock(&mut node);
            }
        }
        // The initial head plus the one record the handles pass around.
        assert_eq!(lock.records.allocated(), 2);
        let mutex = Mutex::with_lock(lock, 0);
        for _ in 0..1_000 {
            mutex.lock_then(|data| *data += 1);
        }
        assert_eq!(mutex.raw().records.allocated(), 2);
    }

    #[test]
    fn handle_outlives_lock() {
        let mut node = HclhNode::new();
        let mutex = Mutex::with_lock(lock(2), 0);
        mutex.lock_with_then(&mut node, |data| *data += 1);
        assert_eq!(mutex.into_inner(), 1);
        drop(node);
    }

    #[test]
    fn handle_rebinds_between_locks() {
        let a = Mutex::with_lock(lock(2), 0);
        let b = Mutex::with_lock(lock(2), 0);
        let mut node = HclhNode::new();
        for _ in 0..10 {
            a.lock_with_then(&mut node, |a| *a += 1);
            b.lock_with_then(&mut node, |b| *b += 1);
        }
        drop(a);
        b.lock_with_then(&mut node, |b| *b += 1);
        assert_eq!(b.into_inner(), 11);
    }
}
