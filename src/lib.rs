//! Textbook mutual exclusion [spin-locks] and universal constructions.
//!
//! This crate collects the classic busy-waiting locks, from a single
//! test-and-set flag up to queue locks and locks aware of the machine's
//! cluster topology, together with lock-free and wait-free universal
//! constructions that turn any sequential object into a linearizable
//! concurrent one. All of them spin: no algorithm here parks a thread.
//!
//! ## Lock families
//!
//! - [`spin`]: [`TasLock`], [`TtasLock`], [`BackoffLock`] and the two-thread
//!   [`PetersonLock`]. These locks hold no per-thread state.
//! - [`queue`]: [`ClhLock`], [`McsLock`], the array-based [`ArrayLock`] and
//!   the abortable [`TimeoutLock`]. Waiters form a queue, are served in
//!   arrival order and spin on a location of their own.
//! - [`hier`]: the hierarchical backoff [`HboLock`] and the hierarchical CLH
//!   [`HclhLock`], which favour passing the lock within a cluster of threads.
//!
//! Every lock implements [`RawLock`] plus one or more of [`Lock`],
//! [`TryLock`] and [`TimedLock`]. Per-thread queue records are the lock's
//! `Node` type, owned by the caller and borrowed for the duration of a
//! critical section. The raw entry points are `unsafe`, the safe way in is
//! [`Mutex`], which pairs a lock with the data it protects and only hands
//! the data out to closures that run while the lock is held:
//!
//! ```
//! use spinlocks::queue::{McsLock, McsNode};
//! use spinlocks::Mutex;
//!
//! let mutex = Mutex::<_, McsLock>::new(0);
//! let mut node = McsNode::new();
//! mutex.lock_with_then(&mut node, |data| *data += 1);
//! assert_eq!(mutex.lock_then(|data| *data), 1);
//! ```
//!
//! Locks that need thread identities, Peterson's lock and the hierarchical
//! locks, take an `Arc<`[`ThreadRegistry`]`>` that hands out dense ids and
//! maps them onto clusters.
//!
//! ## Universal constructions
//!
//! The [`universal`] module provides [`LfUniversal`], [`WfUniversal`] and
//! [`WfUniversalBack`]. Each of them implements [`Universal`], whose
//! [`apply`](Universal::apply) appends an operation to a shared log and
//! returns the object state right after that operation.
//!
//! ## Picking a lock at run time
//!
//! The [`factory`] module names every lock family with a [`LockKind`] and
//! builds them behind one [`AnyLock`] interface, configured with a
//! [`LockConfig`](config::LockConfig).
//!
//! ## Use cases
//!
//! [Spinlocks are usually not what you want]. The majority of use cases are
//! well covered by OS-based mutexes like [`std::sync::Mutex`] or
//! [`parking_lot::Mutex`]. The locks of this crate are meant for studying and
//! measuring lock algorithms, and for the rare critical sections short enough
//! that busy waiting beats a context switch.
//!
//! ## Features
//!
//! This crate does not provide any default features. Features that can be
//! enabled are:
//!
//! ### yield
//!
//! The `yield` feature exposes the [`relax::Yield`] and
//! [`relax::YieldBackoff`] waiting policies, which call
//! [`std::thread::yield_now`] while a lock is contended instead of just
//! spinning.
//!
//! ### lock_api
//!
//! This feature implements the [`RawMutex`] trait from the [lock_api] crate
//! for [`TasLock`], [`TtasLock`] and [`BackoffLock`], and exposes `Mutex`
//! and `MutexGuard` aliases for them under the `lock_api` module.
//!
//! [spin-locks]: https://en.wikipedia.org/wiki/Spinlock
//! [`std::sync::Mutex`]: https://doc.rust-lang.org/std/sync/struct.Mutex.html
//! [`parking_lot::Mutex`]: https://docs.rs/parking_lot/latest/parking_lot/type.Mutex.html
//! [`std::thread::yield_now`]: https://doc.rust-lang.org/std/thread/fn.yield_now.html
//! [Spinlocks are usually not what you want]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
//! [lock_api]: https://docs.rs/lock_api/latest/lock_api
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`TasLock`]: spin::TasLock
//! [`TtasLock`]: spin::TtasLock
//! [`BackoffLock`]: spin::BackoffLock
//! [`PetersonLock`]: spin::PetersonLock
//! [`ClhLock`]: queue::ClhLock
//! [`McsLock`]: queue::McsLock
//! [`ArrayLock`]: queue::ArrayLock
//! [`TimeoutLock`]: queue::TimeoutLock
//! [`HboLock`]: hier::HboLock
//! [`HclhLock`]: hier::HclhLock
//! [`ThreadRegistry`]: registry::ThreadRegistry
//! [`LfUniversal`]: universal::LfUniversal
//! [`WfUniversal`]: universal::WfUniversal
//! [`WfUniversalBack`]: universal::WfUniversalBack
//! [`Universal`]: universal::Universal
//! [`LockKind`]: factory::LockKind
//! [`AnyLock`]: factory::AnyLock

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backoff;
pub mod config;
pub mod error;
pub mod factory;
pub mod hier;
pub mod queue;
pub mod registry;
pub mod relax;
pub mod spin;
pub mod universal;

#[cfg(all(feature = "lock_api", not(loom)))]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

mod cfg;
mod lock;
mod mutex;

pub use error::{Error, Result};
pub use lock::{Lock, RawLock, TimedLock, TryLock};
pub use mutex::Mutex;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin_include))]
pub(crate) mod loom;

#[cfg(not(all(loom, test)))]
mod assertions {
    use static_assertions::assert_impl_all;

    use crate::hier::{HboLock, HclhLock};
    use crate::queue::{ArrayLock, ClhLock, McsLock, TimeoutLock};
    use crate::spin::{BackoffLock, PetersonLock, TasLock, TtasLock};
    use crate::universal::{LfUniversal, WfUniversal, WfUniversalBack};

    assert_impl_all!(TasLock: Send, Sync);
    assert_impl_all!(TtasLock: Send, Sync);
    assert_impl_all!(BackoffLock: Send, Sync);
    assert_impl_all!(PetersonLock: Send, Sync);
    assert_impl_all!(ArrayLock: Send, Sync);
    assert_impl_all!(ClhLock: Send, Sync);
    assert_impl_all!(McsLock: Send, Sync);
    assert_impl_all!(TimeoutLock: Send, Sync);
    assert_impl_all!(HboLock: Send, Sync);
    assert_impl_all!(HclhLock: Send, Sync);
    assert_impl_all!(LfUniversal<Vec<u8>>: Send, Sync);
    assert_impl_all!(WfUniversal<Vec<u8>>: Send, Sync);
    assert_impl_all!(WfUniversalBack<Vec<u8>>: Send, Sync);
}
