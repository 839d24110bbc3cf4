//! Dense per-thread identities and their cluster mapping.
//!
//! Several algorithms index per-thread state by a small integer: Peterson's
//! lock needs ids `0` and `1`, the universal constructions own one announce
//! slot per thread and the hierarchical locks derive a cluster from the id.
//! A [`ThreadRegistry`] hands those integers out, lazily, the first time a
//! thread asks for its id.

use core::cell::Cell;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use thread_local::ThreadLocal;

use crate::error::{Error, Result};

/// Source of registry identities, only used to tell registries apart in logs.
static NEXT_REGISTRY: AtomicUsize = AtomicUsize::new(0);

/// The id a thread received during one trial.
#[derive(Debug, Clone, Copy)]
struct Assigned {
    epoch: usize,
    id: usize,
}

/// The identity of a thread within a [`ThreadRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadSlot {
    /// Dense thread id, starting at `0`.
    pub id: usize,
    /// Cluster of the thread, `id / group_size`.
    pub cluster: usize,
}

/// Assigns each participating thread a dense integer id and a cluster id.
///
/// Ids are handed out in first-touch order starting from `0` and stay stable
/// for the lifetime of the thread, until [`reset`] starts a new trial. Every
/// registry owns one thread-local slot per participating thread, so [`id`]
/// is a constant time lookup that does not write shared memory after the
/// first call in a trial. The slots are released with the registry.
///
/// Every registry is independent: threads get one id per registry, and
/// resetting one registry does not affect another.
///
/// [`reset`]: ThreadRegistry::reset
/// [`id`]: ThreadRegistry::id
///
/// # Examples
///
/// ```
/// use std::thread;
/// use spinlocks::registry::ThreadRegistry;
///
/// let registry = ThreadRegistry::new(2).unwrap();
/// assert_eq!(registry.id(), 0);
/// let other = thread::scope(|s| s.spawn(|| registry.current()).join().unwrap());
/// assert_eq!(other.id, 1);
/// assert_eq!(other.cluster, 0);
/// ```
#[derive(Debug)]
pub struct ThreadRegistry {
    uid: usize,
    epoch: AtomicUsize,
    next_id: AtomicUsize,
    group_size: usize,
    assigned: ThreadLocal<Cell<Option<Assigned>>>,
}

impl ThreadRegistry {
    /// Number of consecutive ids that share a cluster by default.
    pub const DEFAULT_GROUP_SIZE: usize = 2;

    /// Creates a registry mapping every `group_size` consecutive ids to the
    /// same cluster.
    ///
    /// Fails with [`InvalidArgument`](Error::InvalidArgument) if
    /// `group_size` is zero.
    pub fn new(group_size: usize) -> Result<Self> {
        if group_size == 0 {
            return Err(Error::invalid("group_size", "must be greater than zero"));
        }
        Ok(Self::with_group_size(group_size))
    }

    fn with_group_size(group_size: usize) -> Self {
        let uid = NEXT_REGISTRY.fetch_add(1, Relaxed);
        log::debug!("thread registry {uid} created with group size {group_size}");
        let epoch = AtomicUsize::new(0);
        let next_id = AtomicUsize::new(0);
        let assigned = ThreadLocal::new();
        Self { uid, epoch, next_id, group_size, assigned }
    }

    /// Number of consecutive ids that share a cluster.
    pub const fn group_size(&self) -> usize {
        self.group_size
    }

    /// Returns the calling thread's id, assigning one on first use.
    pub fn id(&self) -> usize {
        let epoch = self.epoch.load(Acquire);
        let slot = self.assigned.get_or(|| Cell::new(None));
        match slot.get() {
            Some(assigned) if assigned.epoch == epoch => assigned.id,
            _ => {
                let id = self.next_id.fetch_add(1, AcqRel);
                log::trace!("thread {:?} registered as {id}", std::thread::current().id());
                slot.set(Some(Assigned { epoch, id }));
                id
            }
        }
    }

    /// Number of threads that hold a slot in this registry, across trials.
    #[cfg(test)]
    fn slots(&mut self) -> usize {
        self.assigned.iter_mut().count()
    }

    /// Returns the cluster a given id belongs to.
    pub const fn cluster_of(&self, id: usize) -> usize {
        id / self.group_size
    }

    /// Returns the calling thread's cluster.
    pub fn cluster(&self) -> usize {
        self.cluster_of(self.id())
    }

    /// Returns both the id and the cluster of the calling thread.
    pub fn current(&self) -> ThreadSlot {
        let id = self.id();
        ThreadSlot { id, cluster: self.cluster_of(id) }
    }

    /// Number of ids handed out in the current trial.
    pub fn registered(&self) -> usize {
        self.next_id.load(Acquire)
    }

    /// Starts a new trial: the id counter restarts at `0` and every thread
    /// is assigned a fresh id on its next lookup.
    ///
    /// Must not be called while threads that use this registry are inside a
    /// lock or a universal construction. Doing so is not memory unsafe, but
    /// two threads may end up sharing an id.
    pub fn reset(&self) {
        self.next_id.store(0, Release);
        let epoch = self.epoch.fetch_add(1, AcqRel) + 1;
        log::debug!("thread registry {} reset, epoch {epoch}", self.uid);
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::with_group_size(Self::DEFAULT_GROUP_SIZE)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::ThreadRegistry;

    #[test]
    fn ids_are_stable_per_thread() {
        let registry = ThreadRegistry::default();
        let first = registry.id();
        assert_eq!(first, registry.id());
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn ids_are_dense_and_unique() {
        const THREADS: usize = 16;
        let registry = Arc::new(ThreadRegistry::new(4).unwrap());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.current()
                })
            })
            .collect();
        let slots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ids: HashSet<_> = slots.iter().map(|slot| slot.id).collect();
        assert_eq!(ids, (0..THREADS).collect());
        for slot in slots {
            assert_eq!(slot.cluster, slot.id / 4);
        }
    }

    #[test]
    fn reset_restarts_numbering() {
        let registry = ThreadRegistry::default();
        let other = thread::scope(|s| s.spawn(|| registry.id()).join().unwrap());
        assert_eq!(other, 0);
        assert_eq!(registry.id(), 1);
        registry.reset();
        assert_eq!(registry.registered(), 0);
        assert_eq!(registry.id(), 0);
        assert_eq!(registry.id(), 0);
    }

    #[test]
    fn registries_are_independent() {
        let a = ThreadRegistry::default();
        let b = ThreadRegistry::default();
        thread::scope(|s| s.spawn(|| a.id()).join().unwrap());
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 0);
        b.reset();
        assert_eq!(a.id(), 1);
    }

    #[test]
    fn lookups_ignore_other_registries() {
        let busy: Vec<_> = (0..10_000).map(|_| ThreadRegistry::default()).collect();
        for registry in &busy {
            assert_eq!(registry.id(), 0);
        }
        let mut fresh = ThreadRegistry::default();
        thread::scope(|s| s.spawn(|| fresh.id()).join().unwrap());
        assert_eq!(fresh.id(), 1);
        assert_eq!(fresh.id(), 1);
        assert_eq!(fresh.slots(), 2);
        fresh.reset();
        assert_eq!(fresh.id(), 0);
        assert_eq!(fresh.slots(), 2);
    }

    #[test]
    fn zero_group_size_is_rejected() {
        assert!(ThreadRegistry::new(0).is_err());
    }
}
