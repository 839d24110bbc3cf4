//! Queue locks.
//!
//! Waiting threads form a queue and each one spins on its own location,
//! either its predecessor's record ([`ClhLock`], [`TimeoutLock`]), its own
//! record ([`McsLock`]) or its own array slot ([`ArrayLock`]). The lock is
//! handed over in queue order, so [`ClhLock`], [`McsLock`] and [`ArrayLock`]
//! are first-in first-out.
//!
//! Every lock here takes a mutable reference to a per-thread node on each
//! acquisition and on the matching release. See [`RawLock`] for the rules.
//!
//! [`RawLock`]: crate::lock::RawLock

mod array;
mod clh;
mod mcs;
mod timeout;

pub use array::{ArrayLock, ArrayNode};
pub use clh::{ClhLock, ClhNode};
pub use mcs::{McsLock, McsNode};
pub use timeout::{TimeoutLock, TimeoutNode};
