use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::Arc;

use crate::cfg::atomic::{AtomicBool, AtomicUsize};
use crate::lock::{Lock, RawLock};
use crate::registry::ThreadRegistry;
use crate::relax::{Relax, Spin};

/// Peterson's two-thread lock.
///
/// Each side raises its own flag, volunteers as the victim and waits while
/// the other side's flag is raised and it is still the victim. The protocol
/// depends on a store followed by a load of a different location being
/// ordered, so every access is sequentially consistent.
///
/// # Preconditions
///
/// Only the two threads that received ids `0` and `1` from the lock's
/// [`ThreadRegistry`] may ever use an instance. A third thread breaks mutual
/// exclusion. Debug builds assert the id, release builds panic on the out of
/// bounds flag access before touching the lock.
pub struct PetersonLock<R = Spin> {
    flag: [AtomicBool; 2],
    victim: AtomicUsize,
    registry: Arc<ThreadRegistry>,
    relax: PhantomData<R>,
}

impl<R> PetersonLock<R> {
    /// Creates a new, unlocked lock identifying its two threads through
    /// `registry`.
    pub fn new(registry: Arc<ThreadRegistry>) -> Self {
        let flag = [AtomicBool::new(false), AtomicBool::new(false)];
        Self { flag, victim: AtomicUsize::new(0), registry, relax: PhantomData }
    }

    /// The registry that identifies the two sides.
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    fn side(&self) -> usize {
        let id = self.registry.id();
        debug_assert!(id < 2, "thread id {id} used a two-thread Peterson lock");
        id
    }
}

impl<R> Default for PetersonLock<R> {
    fn default() -> Self {
        Self::new(Arc::default())
    }
}

impl<R> Debug for PetersonLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let flag = [self.flag[0].load(Relaxed), self.flag[1].load(Relaxed)];
        let victim = self.victim.load(Relaxed);
        f.debug_struct("PetersonLock").field("flag", &flag).field("victim", &victim).finish()
    }
}

// SAFETY: Peterson's algorithm, with sequentially consistent accesses. The
// SeqCst flag store of `unlock` is a release for the next holder.
unsafe impl<R> RawLock for PetersonLock<R> {
    type Node = ();

    unsafe fn unlock(&self, (): &mut ()) {
        self.flag[self.side()].store(false, SeqCst);
    }
}

// SAFETY: See `RawLock`.
unsafe impl<R: Relax> Lock for PetersonLock<R> {
    unsafe fn lock(&self, (): &mut ()) {
        let i = self.side();
        let j = 1 - i;
        self.flag[i].store(true, SeqCst);
        self.victim.store(i, SeqCst);
        let mut relax = R::new();
        while self.flag[j].load(SeqCst) && self.victim.load(SeqCst) == i {
            relax.relax();
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use crate::registry::ThreadRegistry;
    use crate::relax::Yield;
    use crate::test;

    type PetersonLock = super::PetersonLock<Yield>;

    fn lock() -> PetersonLock {
        PetersonLock::new(Arc::new(ThreadRegistry::default()))
    }

    #[test]
    fn smoke() {
        test::smoke(lock());
    }

    #[test]
    fn mutual_exclusion() {
        test::mutual_exclusion(2, |_| lock());
    }

    #[test]
    fn no_overlap() {
        test::no_overlap(lock(), 2, 10_000);
    }

    #[test]
    fn counting_only_registers_the_two_workers() {
        let registry = Arc::new(ThreadRegistry::default());
        let lock = PetersonLock::new(Arc::clone(&registry));
        assert_eq!(test::lots_and_lots(lock, 2, 1_000), 1_000);
        assert_eq!(registry.registered(), 2);
    }
}
