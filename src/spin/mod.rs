//! Locks built around a single shared word.
//!
//! All threads spin on the same location, so these locks are simple and
//! cheap when uncontended but generate coherence traffic when many threads
//! wait. None of them are fair.
//!
//! - [`TasLock`]: swap until the previous value was unlocked.
//! - [`TtasLock`]: read until unlocked, then swap.
//! - [`BackoffLock`]: [`TtasLock`] with randomized exponential backoff.
//! - [`PetersonLock`]: the classic two-thread algorithm.

mod backoff;
mod peterson;
mod tas;
mod ttas;

pub use backoff::BackoffLock;
pub use peterson::PetersonLock;
pub use tas::TasLock;
pub use ttas::TtasLock;
