use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Arc;

use crate::backoff::Backoff;
use crate::cfg::atomic::AtomicUsize;
use crate::config::HboConfig;
use crate::lock::{Lock, RawLock, TryLock};
use crate::registry::ThreadRegistry;

/// Lock word value while nobody holds the lock.
const FREE: usize = usize::MAX;

/// The hierarchical backoff lock.
///
/// The lock word holds the cluster of the current holder. A thread that
/// fails to acquire the lock backs off for a short while if the holder is in
/// its own cluster, and for a long while otherwise, so the lock tends to
/// stay within a cluster. There is no ordering guarantee.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use spinlocks::hier::HboLock;
/// use spinlocks::registry::ThreadRegistry;
/// use spinlocks::Mutex;
///
/// let registry = Arc::new(ThreadRegistry::new(4).unwrap());
/// let mutex = Mutex::with_lock(HboLock::new(registry), 0);
/// mutex.lock_then(|data| *data += 1);
/// assert_eq!(mutex.into_inner(), 1);
/// ```
pub struct HboLock {
    state: AtomicUsize,
    config: HboConfig,
    registry: Arc<ThreadRegistry>,
}

impl HboLock {
    /// Creates a new, unlocked lock with the default backoff bounds.
    pub fn new(registry: Arc<ThreadRegistry>) -> Self {
        Self::with_config(registry, HboConfig::DEFAULT)
    }

    /// Creates a new, unlocked lock with the given backoff bounds.
    pub fn with_config(registry: Arc<ThreadRegistry>, config: HboConfig) -> Self {
        Self { state: AtomicUsize::new(FREE), config, registry }
    }

    /// The registry that assigns clusters to threads.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    /// Returns the cluster of the current holder, if any.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn holder_cluster(&self) -> Option<usize> {
        let state = self.state.load(Relaxed);
        (state != FREE).then_some(state)
    }

    fn try_acquire(&self, cluster: usize) -> Result<usize, usize> {
        self.state.compare_exchange(FREE, cluster, Acquire, Relaxed)
    }
}

impl Default for HboLock {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl Debug for HboLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("HboLock");
        d.field("holder_cluster", &self.holder_cluster()).field("config", &self.config).finish()
    }
}

// SAFETY: Only the compare-and-swap from `FREE` takes ownership.
unsafe impl RawLock for HboLock {
    type Node = ();

    unsafe fn unlock(&self, (): &mut ()) {
        self.state.store(FREE, Release);
    }
}

// SAFETY: See `RawLock`.
unsafe impl Lock for HboLock {
    unsafe fn lock(&self, (): &mut ()) {
        let cluster = self.registry.cluster();
        let mut local = Backoff::from_config(self.config.local);
        let mut remote = Backoff::from_config(self.config.remote);
        loop {
            match self.try_acquire(cluster) {
                Ok(_) => return,
                Err(holder) if holder == cluster => local.wait(),
                Err(_) => remote.wait(),
            }
        }
    }
}

// SAFETY: See `RawLock`.
unsafe impl TryLock for HboLock {
    unsafe fn try_lock(&self, (): &mut ()) -> bool {
        self.try_acquire(self.registry.cluster()).is_ok()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::HboLock;
    use crate::config::{BackoffConfig, HboConfig};
    use crate::registry::ThreadRegistry;
    use crate::test;

    fn lock(group_size: usize) -> HboLock {
        HboLock::new(Arc::new(ThreadRegistry::new(group_size).unwrap()))
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
    fn no_overlap() {
        test::no_overlap(lock(4), 8, 1_000);
    }

    #[test]
    fn tight_bounds_mutual_exclusion() {
        let tight = BackoffConfig::new(1, 1).unwrap();
        let config = HboConfig { local: tight, remote: tight };
        let registry = Arc::new(ThreadRegistry::new(2).unwrap());
        let lock = HboLock::with_config(registry, config);
        assert_eq!(test::lots_and_lots(lock, 8, 10_000), 10_000);
    }

    #[test]
    fn holder_cluster_is_published() {
        let registry = Arc::new(ThreadRegistry::new(1).unwrap());
        let lock = Arc::new(HboLock::new(Arc::clone(&registry)));
        // This thread takes id 0, the holder spawned below id 1.
        assert_eq!(registry.cluster(), 0);
        let holder = test::while_held(Arc::clone(&lock), |lock| lock.holder_cluster());
        assert_eq!(holder, Some(1));
        assert_eq!(lock.holder_cluster(), None);
    }

    #[test]
    fn prefers_same_cluster_grants() {
        let local = BackoffConfig::new(1, 16).unwrap();
        let remote = BackoffConfig::new(4_096, 1 << 16).unwrap();
        let config = HboConfig { local, remote };
        test::prefers_same_cluster(|registry| HboLock::with_config(registry, config));
    }
}
