use core::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use super::{Universal, WfUniversal};
use crate::error::Result;
use crate::registry::ThreadRegistry;

/// The wait-free universal construction with cached snapshots.
///
/// Entries are linked exactly as in [`WfUniversal`]. Each entry also caches
/// the object state right after its operation, set once by the first thread
/// that computes it. To answer a call, a thread walks back from its own entry
/// to the nearest cached snapshot, clones it, and only replays the entries
/// after that one, caching their states as it goes.
///
/// # Examples
///
/// ```
/// use spinlocks::universal::{Universal, WfUniversalBack};
///
/// let log = WfUniversalBack::new(1, Vec::new).unwrap();
/// assert_eq!(log.apply(|v: &mut Vec<u8>| v.push(1)), [1]);
/// assert_eq!(log.apply(|v: &mut Vec<u8>| v.push(2)), [1, 2]);
/// ```
pub struct WfUniversalBack<T> {
    inner: WfUniversal<T>,
}

impl<T: Clone> WfUniversalBack<T> {
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
        WfUniversal::with_registry(threads, registry, init).map(|inner| Self { inner })
    }
}

impl<T> WfUniversalBack<T> {
    /// The number of threads this construction serves.
    pub fn threads(&self) -> usize {
        self.inner.threads()
    }

    /// The registry that identifies the calling threads.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        self.inner.registry()
    }

    #[cfg(test)]
    pub(crate) fn log(&self) -> &super::Log<T> {
        self.inner.log()
    }
}

impl<T: Clone> Universal<T> for WfUniversalBack<T> {
    fn apply<F>(&self, op: F) -> T
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let own = self.inner.link(op);
        self.inner.log().replay_cached(own)
    }
}

impl<T> Debug for WfUniversalBack<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WfUniversalBack").field("threads", &self.threads()).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::WfUniversalBack;
    use crate::universal::Universal;

    #[test]
    fn cached_replay_matches_history() {
        let universal = WfUniversalBack::new(1, Vec::new).unwrap();
        for i in 0..20 {
            let seen = universal.apply(move |v: &mut Vec<usize>| v.push(i));
            assert_eq!(seen, (0..=i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn each_operation_runs_once_when_snapshots_are_warm() {
        let calls = Arc::new(AtomicUsize::new(0));
        let universal = WfUniversalBack::new(1, || 0_u32).unwrap();
        for expected in 1..=10 {
            let calls = Arc::clone(&calls);
            let seen = universal.apply(move |n: &mut u32| {
                calls.fetch_add(1, Ordering::Relaxed);
                *n += 1;
            });
            assert_eq!(seen, expected);
        }
        // Every replay started from the previous entry's snapshot.
        assert_eq!(calls.load(Ordering::Relaxed), 10);
    }
}
