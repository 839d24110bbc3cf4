//! Universal constructions.
//!
//! A universal construction turns any sequential object into a linearizable
//! concurrent one without a lock. Callers hand it an operation, a closure
//! that mutates the object, and the construction agrees with the other
//! threads on a total order of operations by appending them to a shared log.
//! The caller then replays the log up to its own entry and gets back the
//! state of the object right after its operation took effect.
//!
//! - [`LfUniversal`]: lock-free, a thread only appends its own entry.
//! - [`WfUniversal`]: wait-free, threads help the pending entries of others
//!   in round-robin order.
//! - [`WfUniversalBack`]: [`WfUniversal`] with a snapshot cached on every
//!   entry, so replays start from the nearest snapshot instead of from the
//!   initial state.
//!
//! Entries are kept until the construction is dropped. Every call to
//! [`apply`](Universal::apply) adds one entry, so memory grows with the
//! number of applied operations.
//!
//! Operations must be deterministic: the same operation is replayed by every
//! thread whose entry comes later in the log.

use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{AtomicPtr, AtomicU64};
use crate::error::{Error, Result};
use crate::registry::ThreadRegistry;

mod back;
mod lock_free;
mod wait_free;

pub use back::WfUniversalBack;
pub use lock_free::LfUniversal;
pub use wait_free::WfUniversal;

/// A shared object that any thread can mutate through [`apply`].
///
/// [`apply`]: Universal::apply
pub trait Universal<T> {
    /// Appends `op` to the object's history and returns the object state
    /// right after `op` was applied.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread's registry id is not smaller than the
    /// number of threads the construction was built for.
    fn apply<F>(&self, op: F) -> T
    where
        F: Fn(&mut T) + Send + Sync + 'static;
}

/// A type-erased, replayable operation.
type Op<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A type-erased constructor of the initial object state.
type Init<T> = Box<dyn Fn() -> T + Send + Sync>;

/// One log entry.
///
/// `next` is decided once, by the first compare-and-swap from null, and is
/// the consensus on which entry follows this one. `seq` is `0` until the
/// entry is linked, then its position in the log. `pred` is set before
/// `seq`. `state` optionally caches the object state after `op`.
pub(crate) struct Node<T> {
    op: Option<Op<T>>,
    next: AtomicPtr<Node<T>>,
    seq: AtomicU64,
    pred: AtomicPtr<Node<T>>,
    state: AtomicPtr<T>,
}

impl<T> Node<T> {
    fn alloc(op: Option<Op<T>>, seq: u64) -> *mut Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let pred = AtomicPtr::new(ptr::null_mut());
        let state = AtomicPtr::new(ptr::null_mut());
        Box::into_raw(Box::new(Self { op, next, seq: AtomicU64::new(seq), pred, state }))
    }

    fn as_ptr(&self) -> *mut Self {
        (self as *const Self).cast_mut()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq.load(Acquire)
    }

    fn is_linked(&self) -> bool {
        self.seq() != 0
    }

    /// Proposes `prefer` as the successor of this entry and returns the one
    /// that won.
    fn decide_next(&self, prefer: *mut Self) -> *mut Self {
        match self.next.compare_exchange(ptr::null_mut(), prefer, AcqRel, Acquire) {
            Ok(_) => prefer,
            Err(winner) => winner,
        }
    }

    /// Records this entry's position right after `before`. Every thread that
    /// links the same pair writes the same values.
    fn link_after(&self, before: &Self) {
        let seq = before.seq() + 1;
        let current = self.seq.load(Relaxed);
        debug_assert!(current == 0 || current == seq, "entry linked at {current} and {seq}");
        self.pred.store(before.as_ptr(), Relaxed);
        self.seq.store(seq, Release);
    }

    fn apply(&self, state: &mut T) {
        if let Some(op) = &self.op {
            op(state);
        }
    }
}

/// The log and per-thread head pointers shared by every construction.
pub(crate) struct Log<T> {
    sentinel: *mut Node<T>,
    heads: Box<[CachePadded<AtomicPtr<Node<T>>>]>,
    init: Init<T>,
    registry: Arc<ThreadRegistry>,
}

// SAFETY: Entries are only reached through atomics, and object states are
// moved or cloned across threads.
unsafe impl<T: Send> Send for Log<T> {}
// SAFETY: Cached states are shared between threads by reference.
unsafe impl<T: Send + Sync> Sync for Log<T> {}

impl<T> Log<T> {
    pub(crate) fn new<I>(threads: usize, registry: Arc<ThreadRegistry>, init: I) -> Result<Self>
    where
        I: Fn() -> T + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(Error::invalid("threads", "must be greater than zero"));
        }
        let sentinel = Node::alloc(None, 1);
        let heads = Self::slots(threads, sentinel);
        Ok(Self { sentinel, heads, init: Box::new(init), registry })
    }

    /// Per-thread slots, all pointing to the sentinel.
    pub(crate) fn slots(threads: usize, sentinel: *mut Node<T>) -> Box<[CachePadded<AtomicPtr<Node<T>>>]> {
        (0..threads).map(|_| CachePadded::new(AtomicPtr::new(sentinel))).collect()
    }

    pub(crate) fn sentinel(&self) -> *mut Node<T> {
        self.sentinel
    }

    pub(crate) fn threads(&self) -> usize {
        self.heads.len()
    }

    pub(crate) fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    /// The calling thread's slot index.
    pub(crate) fn slot(&self) -> usize {
        let id = self.registry.id();
        let threads = self.threads();
        assert!(id < threads, "thread id {id} out of range for {threads} threads");
        id
    }

    /// Allocates the entry for `op`.
    pub(crate) fn entry<F>(op: F) -> *mut Node<T>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Node::alloc(Some(Box::new(op)), 0)
    }

    /// The entry with the highest position any thread has reported.
    pub(crate) fn max_head(&self) -> &Node<T> {
        let mut max = self.sentinel;
        // SAFETY: Entries live as long as the log.
        let mut max_seq = unsafe { &*max }.seq();
        for head in self.heads.iter() {
            let node = head.load(Acquire);
            let seq = unsafe { &*node }.seq();
            if seq > max_seq {
                max = node;
                max_seq = seq;
            }
        }
        // SAFETY: Entries live as long as the log.
        unsafe { &*max }
    }

    pub(crate) fn head(&self, slot: usize) -> &Node<T> {
        // SAFETY: Entries live as long as the log.
        unsafe { &*self.heads[slot].load(Acquire) }
    }

    pub(crate) fn set_head(&self, slot: usize, node: &Node<T>) {
        self.heads[slot].store(node.as_ptr(), Release);
    }

    /// Makes the winner of the consensus on `before`'s successor its
    /// successor, and returns it.
    pub(crate) fn append(&self, before: &Node<T>, prefer: *mut Node<T>) -> &Node<T> {
        // SAFETY: Both candidates and winners are entries of this log.
        let after = unsafe { &*before.decide_next(prefer) };
        after.link_after(before);
        after
    }

    /// Rebuilds the object from the initial state up to and including `own`.
    pub(crate) fn replay(&self, own: &Node<T>) -> T {
        let mut state = (self.init)();
        let mut node = self.sentinel;
        while !ptr::eq(node, own) {
            // SAFETY: Every entry before a linked entry has its successor set.
            node = unsafe { &*node }.next.load(Acquire);
            unsafe { &*node }.apply(&mut state);
        }
        state
    }

    /// Rebuilds the object up to and including `own`, starting from the
    /// nearest cached snapshot and caching every state it computes.
    pub(crate) fn replay_cached(&self, own: &Node<T>) -> T
    where
        T: Clone,
    {
        // SAFETY: Entries live as long as the log, and linked entries have
        // their predecessor set.
        let mut start = own;
        let mut state = loop {
            let cached = start.state.load(Acquire);
            if !cached.is_null() {
                break unsafe { &*cached }.clone();
            }
            let pred = start.pred.load(Acquire);
            if pred.is_null() {
                break (self.init)();
            }
            start = unsafe { &*pred };
        };
        let mut node = start;
        while !ptr::eq(node, own) {
            node = unsafe { &*node.next.load(Acquire) };
            node.apply(&mut state);
            Self::cache(node, &state);
        }
        state
    }

    /// Replays every linked entry on the calling thread, in log order, and
    /// returns the positions it went through along with the final state.
    #[cfg(test)]
    pub(crate) fn replay_all(&self) -> (Vec<u64>, T) {
        let mut state = (self.init)();
        let mut seqs = Vec::new();
        // SAFETY: Entries live as long as the log.
        let mut node = unsafe { &*self.sentinel }.next.load(Acquire);
        while !node.is_null() {
            let entry = unsafe { &*node };
            seqs.push(entry.seq());
            entry.apply(&mut state);
            node = entry.next.load(Acquire);
        }
        (seqs, state)
    }

    fn cache(node: &Node<T>, state: &T)
    where
        T: Clone,
    {
        if !node.state.load(Relaxed).is_null() {
            return;
        }
        let snapshot = Box::into_raw(Box::new(state.clone()));
        let cached = node.state.compare_exchange(ptr::null_mut(), snapshot, AcqRel, Relaxed);
        if cached.is_err() {
            // SAFETY: The snapshot was never published.
            drop(unsafe { Box::from_raw(snapshot) });
        }
    }
}

impl<T> Drop for Log<T> {
    fn drop(&mut self) {
        // Every entry ever allocated was linked before its `apply` returned.
        let mut node = self.sentinel;
        while !node.is_null() {
            // SAFETY: No thread can reach the log anymore.
            let entry = unsafe { Box::from_raw(node) };
            let state = entry.state.load(Relaxed);
            if !state.is_null() {
                drop(unsafe { Box::from_raw(state) });
            }
            node = entry.next.load(Relaxed);
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::{LfUniversal, Log, Universal, WfUniversal, WfUniversalBack};
    use crate::registry::ThreadRegistry;

    /// Every thread appends its id once. Returns the state each one saw.
    fn append_ids<U>(universal: &Arc<U>, threads: usize) -> Vec<Vec<usize>>
    where
        U: Universal<Vec<usize>> + Send + Sync + 'static,
    {
        let handles: Vec<_> = (0..threads)
            .map(|id| {
                let universal = Arc::clone(universal);
                thread::spawn(move || universal.apply(move |ids: &mut Vec<usize>| ids.push(id)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    /// Results must all be prefixes of the longest one, which holds every
    /// id exactly once. Replaying the log alone, in position order, must
    /// rebuild that longest result.
    fn assert_linearizable(mut results: Vec<Vec<usize>>, threads: usize, log: &Log<Vec<usize>>) {
        results.sort_by_key(Vec::len);
        let longest = results.last().unwrap().clone();
        let mut sorted = longest.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..threads).collect::<Vec<_>>());
        for (len, result) in results.iter().enumerate() {
            assert_eq!(result.len(), len + 1);
            assert_eq!(result[..], longest[..len + 1]);
        }
        let (seqs, state) = log.replay_all();
        // The sentinel sits at position 1.
        assert_eq!(seqs, (2..threads as u64 + 2).collect::<Vec<_>>());
        assert_eq!(state, longest);
    }

    fn registry() -> Arc<ThreadRegistry> {
        Arc::new(ThreadRegistry::default())
    }

    #[test]
    fn lock_free_append_ids() {
        for threads in [1, 2, 4, 8, 16] {
            let universal = LfUniversal::with_registry(threads, registry(), Vec::new).unwrap();
            let universal = Arc::new(universal);
            let results = append_ids(&universal, threads);
            assert_linearizable(results, threads, universal.log());
        }
    }

    #[test]
    fn wait_free_append_ids() {
        for threads in [1, 2, 4, 8, 16] {
            let universal = WfUniversal::with_registry(threads, registry(), Vec::new).unwrap();
            let universal = Arc::new(universal);
            let results = append_ids(&universal, threads);
            assert_linearizable(results, threads, universal.log());
        }
    }

    #[test]
    fn wait_free_back_append_ids() {
        for threads in [1, 2, 4, 8, 16] {
            let universal = WfUniversalBack::with_registry(threads, registry(), Vec::new).unwrap();
            let universal = Arc::new(universal);
            let results = append_ids(&universal, threads);
            assert_linearizable(results, threads, universal.log());
        }
    }
}
