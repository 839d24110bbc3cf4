use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{Acquire, Release};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use super::{Log, Node, Universal};
use crate::cfg::atomic::AtomicPtr;
use crate::error::Result;
use crate::registry::ThreadRegistry;

/// The wait-free universal construction.
///
/// A caller announces its entry in its own slot, then keeps appending
/// entries after the furthest head it knows of. At each position it first
/// offers the slot of the thread whose turn it is, `(position + 1) % threads`,
/// and only falls back to its own entry when that slot has nothing pending.
/// A pending entry is thus linked after at most `threads` positions, by its
/// owner or by a helper, so every call finishes in a bounded number of steps.
///
/// The state returned by [`apply`](Universal::apply) is rebuilt from the
/// initial state each time, see [`WfUniversalBack`](super::WfUniversalBack)
/// for a caching variant.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use spinlocks::universal::{Universal, WfUniversal};
///
/// let counter = Arc::new(WfUniversal::new(4, || 0_u64).unwrap());
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let counter = Arc::clone(&counter);
///         thread::spawn(move || counter.apply(|n: &mut u64| *n += 1))
///     })
///     .collect();
/// let mut seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
/// seen.sort_unstable();
/// assert_eq!(seen, [1, 2, 3, 4]);
/// ```
pub struct WfUniversal<T> {
    log: Log<T>,
    announce: Box<[CachePadded<AtomicPtr<Node<T>>>]>,
}

impl<T> WfUniversal<T> {
    /// Creates a construction for `threads` threads, identified by a fresh
    /// [`ThreadRegistry`], whose object starts as `init()`.
    ///
    /// Fails if `threads` is zero.
    pub fn new<I>(threads: usize, init: I) -> Result<Self>
    where
        I: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_registry(threads, Arc::default(), init)
    }

    /// Creates a construction for the first `threads` ids of `registry`.
    ///
    /// Fails if `threads` is zero.
    pub fn with_registry<I>(threads: usize, registry: Arc<ThreadRegistry>, init: I) -> Result<Self>
    where
        I: Fn() -> T + Send + Sync + 'static,
    {
        let log = Log::new(threads, registry, init)?;
        let announce = Log::slots(threads, log.sentinel());
        log::debug!("wait-free universal construction for {threads} threads");
        Ok(Self { log, announce })
    }

    /// The number of threads this construction serves.
    pub fn threads(&self) -> usize {
        self.log.threads()
    }

    /// The registry that identifies the calling threads.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        self.log.registry()
    }

    pub(crate) fn log(&self) -> &Log<T> {
        &self.log
    }

    /// Announces and links the entry of `op`, helping pending entries of
    /// other threads along the way.
    pub(crate) fn link<F>(&self, op: F) -> &Node<T>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let slot = self.log.slot();
        let node = Log::entry(op);
        self.announce[slot].store(node, Release);
        self.log.set_head(slot, self.log.max_head());
        // SAFETY: Entries live as long as the log.
        let own = unsafe { &*node };
        let threads = self.threads() as u64;
        while !own.is_linked() {
            let before = self.log.head(slot);
            let turn = ((before.seq() + 1) % threads) as usize;
            let help = self.announce[turn].load(Acquire);
            let prefer = if unsafe { &*help }.is_linked() { node } else { help };
            let after = self.log.append(before, prefer);
            self.log.set_head(slot, after);
        }
        self.log.set_head(slot, own);
        own
    }
}

impl<T> Universal<T> for WfUniversal<T> {
    fn apply<F>(&self, op: F) -> T
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let own = self.link(op);
        self.log.replay(own)
    }
}

impl<T> Debug for WfUniversal<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WfUniversal").field("threads", &self.threads()).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::WfUniversal;
    use crate::registry::ThreadRegistry;
    use crate::universal::Universal;
    use crate::Error;

    #[test]
    fn sequential_history() {
        let universal = WfUniversal::new(1, String::new).unwrap();
        assert_eq!(universal.apply(|s: &mut String| s.push('a')), "a");
        assert_eq!(universal.apply(|s: &mut String| s.push('b')), "ab");
        assert_eq!(universal.apply(|s: &mut String| s.push('c')), "abc");
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = WfUniversal::new(0, || 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "threads", .. }));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn unregistered_thread_panics() {
        let registry = Arc::new(ThreadRegistry::default());
        let universal = WfUniversal::with_registry(1, Arc::clone(&registry), || 0).unwrap();
        thread::scope(|s| s.spawn(|| registry.id()).join().unwrap());
        universal.apply(|n: &mut i32| *n += 1);
    }

    #[test]
    fn every_increment_sees_a_distinct_count() {
        const THREADS: usize = 8;
        const OPS: usize = 200;
        let universal = Arc::new(WfUniversal::new(THREADS, || 0_usize).unwrap());
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let universal = Arc::clone(&universal);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..OPS).map(|_| universal.apply(|n: &mut usize| *n += 1)).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            let counts = handle.join().unwrap();
            // A thread's own operations are ordered as it issued them.
            assert!(counts.windows(2).all(|pair| pair[0] < pair[1]));
            seen.extend(counts);
        }
        assert_eq!(seen, (1..=THREADS * OPS).collect());
    }
}
