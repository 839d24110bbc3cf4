//! Building locks by name and driving them through one dynamic interface.
//!
//! Benchmarks and tools that pick the lock at run time use [`LockKind`] to
//! name a family, [`LockKind::build`] to construct it, and the resulting
//! [`AnyLock`] to run critical sections with a matching [`AnyNode`].

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;
use core::time::Duration;
use std::sync::Arc;

use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::hier::{HboLock, HclhLock, HclhNode};
use crate::lock::{Lock, RawGuard, TimedLock};
use crate::queue::{ArrayLock, ArrayNode, ClhLock, ClhNode, McsLock, McsNode, TimeoutLock, TimeoutNode};
use crate::registry::ThreadRegistry;
use crate::spin::{BackoffLock, PetersonLock, TasLock, TtasLock};

/// The lock families of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// [`ArrayLock`], displayed as `ALock`.
    Array,
    /// [`BackoffLock`].
    Backoff,
    /// [`ClhLock`], displayed as `CLHLock`.
    Clh,
    /// [`HboLock`], displayed as `HBOLock`.
    Hbo,
    /// [`HclhLock`], displayed as `HCLHLock`.
    Hclh,
    /// [`McsLock`], displayed as `MCSLock`.
    Mcs,
    /// [`TasLock`], displayed as `TASLock`.
    Tas,
    /// [`TtasLock`], displayed as `TTASLock`.
    Ttas,
    /// [`TimeoutLock`], displayed as `TOLock`.
    Timeout,
    /// [`PetersonLock`], displayed as `Peterson`.
    Peterson,
}

impl LockKind {
    /// Every lock family, in alphabetical order of their names.
    pub const ALL: [Self; 10] = [
        Self::Array,
        Self::Backoff,
        Self::Clh,
        Self::Hbo,
        Self::Hclh,
        Self::Mcs,
        Self::Peterson,
        Self::Tas,
        Self::Timeout,
        Self::Ttas,
    ];

    /// The name this family is displayed as and parsed from.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Array => "ALock",
            Self::Backoff => "BackoffLock",
            Self::Clh => "CLHLock",
            Self::Hbo => "HBOLock",
            Self::Hclh => "HCLHLock",
            Self::Mcs => "MCSLock",
            Self::Tas => "TASLock",
            Self::Ttas => "TTASLock",
            Self::Timeout => "TOLock",
            Self::Peterson => "Peterson",
        }
    }

    /// Whether the family is acquired with a timeout instead of an
    /// unbounded wait.
    pub const fn is_timed(self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// The largest number of threads that may use one instance, if bounded.
    pub const fn max_threads(self) -> Option<usize> {
        match self {
            Self::Peterson => Some(2),
            _ => None,
        }
    }

    /// Builds a new, unlocked instance of this family.
    ///
    /// `registry` identifies threads for the families that need it: Peterson
    /// and the hierarchical locks. Fails if `config` holds an invalid
    /// capacity for [`ArrayLock`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use spinlocks::config::LockConfig;
    /// use spinlocks::factory::LockKind;
    ///
    /// let kind: LockKind = "MCSLock".parse().unwrap();
    /// let lock = kind.build(&LockConfig::default(), Arc::default()).unwrap();
    /// let mut node = lock.node();
    /// assert_eq!(lock.lock_with_then(&mut node, || 42), Ok(42));
    /// ```
    pub fn build(self, config: &LockConfig, registry: Arc<ThreadRegistry>) -> Result<AnyLock> {
        let inner = match self {
            Self::Array => Inner::Array(ArrayLock::with_capacity(config.capacity)?),
            Self::Backoff => Inner::Backoff(BackoffLock::with_config(config.backoff)),
            Self::Clh => Inner::Clh(ClhLock::new()),
            Self::Hbo => Inner::Hbo(HboLock::with_config(registry, config.hbo)),
            Self::Hclh => Inner::Hclh(HclhLock::new(registry)),
            Self::Mcs => Inner::Mcs(McsLock::new()),
            Self::Tas => Inner::Tas(TasLock::new()),
            Self::Ttas => Inner::Ttas(TtasLock::new()),
            Self::Timeout => Inner::Timeout(TimeoutLock::new()),
            Self::Peterson => Inner::Peterson(PetersonLock::new(registry)),
        };
        log::debug!("built {self} with {config:?}");
        Ok(AnyLock { inner })
    }
}

impl Display for LockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LockKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == s).ok_or_else(|| Error::UnknownLock(s.to_owned()))
    }
}

#[derive(Debug)]
enum Inner {
    Array(ArrayLock),
    Backoff(BackoffLock),
    Clh(ClhLock),
    Hbo(HboLock),
    Hclh(HclhLock),
    Mcs(McsLock),
    Tas(TasLock),
    Ttas(TtasLock),
    Timeout(TimeoutLock),
    Peterson(PetersonLock),
}

impl Inner {
    const fn kind(&self) -> LockKind {
        match self {
            Self::Array(_) => LockKind::Array,
            Self::Backoff(_) => LockKind::Backoff,
            Self::Clh(_) => LockKind::Clh,
            Self::Hbo(_) => LockKind::Hbo,
            Self::Hclh(_) => LockKind::Hclh,
            Self::Mcs(_) => LockKind::Mcs,
            Self::Tas(_) => LockKind::Tas,
            Self::Ttas(_) => LockKind::Ttas,
            Self::Timeout(_) => LockKind::Timeout,
            Self::Peterson(_) => LockKind::Peterson,
        }
    }
}

/// A lock of any family, built by [`LockKind::build`].
#[derive(Debug)]
pub struct AnyLock {
    inner: Inner,
}

impl AnyLock {
    /// The family of this lock.
    pub const fn kind(&self) -> LockKind {
        self.inner.kind()
    }

    /// Creates a queue node for this lock. Every thread needs its own.
    pub fn node(&self) -> AnyNode {
        let inner = match self.inner {
            Inner::Array(_) => NodeInner::Array(ArrayNode::new()),
            Inner::Clh(_) => NodeInner::Clh(ClhNode::new()),
            Inner::Hclh(_) => NodeInner::Hclh(HclhNode::new()),
            Inner::Mcs(_) => NodeInner::Mcs(McsNode::new()),
            Inner::Timeout(_) => NodeInner::Timeout(TimeoutNode::new()),
            _ => NodeInner::Unit,
        };
        AnyNode { kind: self.kind(), inner }
    }

    /// Acquires the lock with `node`, runs `f` and releases the lock.
    ///
    /// Fails without touching the lock if this family only supports timed
    /// acquisitions, or if `node` was created for another family.
    pub fn lock_with_then<F, Ret>(&self, node: &mut AnyNode, f: F) -> Result<Ret>
    where
        F: FnOnce() -> Ret,
    {
        let kind = self.check(node)?;
        let ret = match (&self.inner, &mut node.inner) {
            (Inner::Array(lock), NodeInner::Array(node)) => locked(lock, node, f),
            (Inner::Clh(lock), NodeInner::Clh(node)) => locked(lock, node, f),
            (Inner::Hclh(lock), NodeInner::Hclh(node)) => locked(lock, node, f),
            (Inner::Mcs(lock), NodeInner::Mcs(node)) => locked(lock, node, f),
            (Inner::Backoff(lock), NodeInner::Unit) => locked(lock, &mut (), f),
            (Inner::Hbo(lock), NodeInner::Unit) => locked(lock, &mut (), f),
            (Inner::Tas(lock), NodeInner::Unit) => locked(lock, &mut (), f),
            (Inner::Ttas(lock), NodeInner::Unit) => locked(lock, &mut (), f),
            (Inner::Peterson(lock), NodeInner::Unit) => locked(lock, &mut (), f),
            _ => return Err(Error::unsupported(kind, "lock")),
        };
        Ok(ret)
    }

    /// Spins for at most `timeout` trying to acquire the lock with `node`,
    /// then runs `f` with whether the lock was acquired, and releases it if
    /// it was.
    ///
    /// Fails without touching the lock if this family does not support timed
    /// acquisitions, or if `node` was created for another family.
    pub fn try_lock_for_with_then<F, Ret>(&self, node: &mut AnyNode, timeout: Duration, f: F) -> Result<Ret>
    where
        F: FnOnce(bool) -> Ret,
    {
        let kind = self.check(node)?;
        match (&self.inner, &mut node.inner) {
            (Inner::Timeout(lock), NodeInner::Timeout(node)) => Ok(timed(lock, node, timeout, f)),
            _ => Err(Error::unsupported(kind, "try_lock_for")),
        }
    }

    fn check(&self, node: &AnyNode) -> Result<LockKind> {
        let kind = self.kind();
        if node.kind == kind {
            Ok(kind)
        } else {
            Err(Error::NodeMismatch { lock: kind })
        }
    }
}

/// A queue node for an [`AnyLock`], created by [`AnyLock::node`].
///
/// A node may be reused for any number of acquisitions of locks of the same
/// family, one at a time.
#[derive(Debug)]
pub struct AnyNode {
    kind: LockKind,
    inner: NodeInner,
}

impl AnyNode {
    /// The lock family this node belongs to.
    pub const fn kind(&self) -> LockKind {
        self.kind
    }
}

#[derive(Debug)]
enum NodeInner {
    Unit,
    Array(ArrayNode),
    Clh(ClhNode),
    Hclh(HclhNode),
    Mcs(McsNode),
    Timeout(TimeoutNode),
}

fn locked<L: Lock, F: FnOnce() -> Ret, Ret>(lock: &L, node: &mut L::Node, f: F) -> Ret {
    // SAFETY: The guard's `drop` call is executed within this scope.
    let _guard = unsafe { RawGuard::lock(lock, node) };
    f()
}

fn timed<L, F, Ret>(lock: &L, node: &mut L::Node, timeout: Duration, f: F) -> Ret
where
    L: TimedLock,
    F: FnOnce(bool) -> Ret,
{
    // SAFETY: On success the node is borrowed by the guard below.
    if !unsafe { lock.try_lock_for(node, timeout) } {
        return f(false);
    }
    // SAFETY: The lock was just acquired with this node.
    let _guard = unsafe { RawGuard::new(lock, node) };
    f(true)
}

#[cfg(all(not(loom), test))]
mod test {
    use core::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::sync::Arc;
    use std::thread;

    use super::{AnyLock, LockKind};
    use crate::config::LockConfig;
    use crate::Error;

    fn build(kind: LockKind) -> AnyLock {
        kind.build(&LockConfig::with_capacity(8), Arc::default()).unwrap()
    }

    // Unsynchronized read-modify-write, loses updates without mutual exclusion.
    fn bump(counter: &AtomicUsize) {
        let value = counter.load(Relaxed);
        counter.store(value + 1, Relaxed);
    }

    #[test]
    fn names_parse_back() {
        for kind in LockKind::ALL {
            assert_eq!(kind.to_string().parse::<LockKind>(), Ok(kind));
        }
        assert_eq!("TOLock".parse::<LockKind>(), Ok(LockKind::Timeout));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = "tas".parse::<LockKind>().unwrap_err();
        assert_eq!(err, Error::UnknownLock("tas".to_owned()));
    }

    #[test]
    fn zero_capacity_array_lock_is_rejected() {
        let config = LockConfig::with_capacity(0);
        let err = LockKind::Array.build(&config, Arc::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "capacity", .. }));
    }

    #[test]
    fn every_kind_excludes() {
        const ITERS: usize = 2_000;
        for kind in LockKind::ALL {
            let threads = kind.max_threads().unwrap_or(8);
            let lock = Arc::new(build(kind));
            let counter = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    let counter = Arc::clone(&counter);
                    thread::spawn(move || {
                        let mut node = lock.node();
                        for _ in 0..ITERS {
                            if lock.kind().is_timed() {
                                let timeout = Duration::from_secs(60);
                                let f = |held: bool| held.then(|| bump(&counter)).is_some();
                                while !lock.try_lock_for_with_then(&mut node, timeout, f).unwrap() {}
                            } else {
                                lock.lock_with_then(&mut node, || bump(&counter)).unwrap();
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(counter.load(Relaxed), threads * ITERS, "{kind} lost updates");
        }
    }

    #[test]
    fn timed_and_unbounded_entry_points_are_exclusive() {
        let timeout = Duration::from_millis(1);
        for kind in LockKind::ALL {
            let lock = build(kind);
            let mut node = lock.node();
            let locked = lock.lock_with_then(&mut node, || ());
            let timed = lock.try_lock_for_with_then(&mut node, timeout, |held| assert!(held));
            if kind.is_timed() {
                assert_eq!(locked, Err(Error::unsupported(kind, "lock")));
                assert_eq!(timed, Ok(()));
            } else {
                assert_eq!(locked, Ok(()));
                assert_eq!(timed, Err(Error::unsupported(kind, "try_lock_for")));
            }
        }
    }

    #[test]
    fn nodes_of_other_kinds_are_rejected() {
        let mcs = build(LockKind::Mcs);
        let clh = build(LockKind::Clh);
        let tas = build(LockKind::Tas);
        let ttas = build(LockKind::Ttas);
        let mut node = clh.node();
        assert_eq!(mcs.lock_with_then(&mut node, || ()), Err(Error::NodeMismatch { lock: LockKind::Mcs }));
        assert_eq!(clh.lock_with_then(&mut node, || 1), Ok(1));
        let mut node = tas.node();
        assert_eq!(ttas.lock_with_then(&mut node, || ()), Err(Error::NodeMismatch { lock: LockKind::Ttas }));
    }
}
