use core::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use super::{Log, Universal};
use crate::error::Result;
use crate::registry::ThreadRegistry;

/// The lock-free universal construction.
///
/// A caller repeatedly tries to append its own entry after the furthest head
/// any thread reported, until its entry wins a position. Some thread always
/// wins, but a given caller may keep losing.
///
/// # Examples
///
/// ```
/// use spinlocks::universal::{LfUniversal, Universal};
///
/// let queue = LfUniversal::new(1, Vec::new).unwrap();
/// queue.apply(|q: &mut Vec<&str>| q.push("a"));
/// assert_eq!(queue.apply(|q: &mut Vec<&str>| q.push("b")), ["a", "b"]);
/// ```
pub struct LfUniversal<T> {
    log: Log<T>,
}

impl<T> LfUniversal<T> {
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
        log::debug!("lock-free universal construction for {threads} threads");
        Ok(Self { log })
    }

    /// The number of threads this construction serves.
    pub fn threads(&self) -> usize {
        self.log.threads()
    }

    /// The registry that identifies the calling threads.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        self.log.registry()
    }

    #[cfg(test)]
    pub(crate) fn log(&self) -> &Log<T> {
        &self.log
    }
}

impl<T> Universal<T> for LfUniversal<T> {
    fn apply<F>(&self, op: F) -> T
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let slot = self.log.slot();
        let node = Log::entry(op);
        // SAFETY: Entries live as long as the log.
        let own = unsafe { &*node };
        while !own.is_linked() {
            let before = self.log.max_head();
            let after = self.log.append(before, node);
            self.log.set_head(slot, after);
        }
        self.log.replay(own)
    }
}

impl<T> Debug for LfUniversal<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LfUniversal").field("threads", &self.threads()).finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::LfUniversal;
    use crate::universal::Universal;

    #[test]
    fn sequential_history() {
        let universal = LfUniversal::new(2, || 1_u64).unwrap();
        assert_eq!(universal.apply(|n: &mut u64| *n *= 3), 3);
        assert_eq!(universal.apply(|n: &mut u64| *n += 1), 4);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(LfUniversal::new(0, || ()).is_err());
    }
}
