//! Adaptive randomized exponential backoff.

use rand::Rng;

use crate::cfg::hint;
use crate::config::BackoffConfig;
use crate::error::Result;

/// Randomized exponential delay generator.
///
/// Each call to [`wait`] spins for a pseudo-random number of hints drawn
/// from `[0, limit)` and then doubles `limit`, capping it at the configured
/// maximum. The state is private to one waiting thread and is meant to live
/// for a single contended acquisition: locks build a fresh `Backoff` on every
/// `lock` call, so a thread never inherits the delay it reached during a
/// previous acquisition.
///
/// [`wait`]: Backoff::wait
///
/// # Examples
///
/// ```
/// use spinlocks::backoff::Backoff;
///
/// let mut backoff = Backoff::new(4, 16).unwrap();
/// assert_eq!(backoff.limit(), 4);
/// backoff.wait();
/// assert_eq!(backoff.limit(), 8);
/// backoff.wait();
/// backoff.wait();
/// assert_eq!(backoff.limit(), 16);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    limit: u32,
    max_delay: u32,
}

impl Backoff {
    /// Creates a backoff starting at `min_delay` and capped at `max_delay`.
    ///
    /// Fails with [`InvalidArgument`] when `max_delay < min_delay` or when
    /// `min_delay` is zero.
    ///
    /// [`InvalidArgument`]: crate::Error::InvalidArgument
    pub fn new(min_delay: u32, max_delay: u32) -> Result<Self> {
        BackoffConfig::new(min_delay, max_delay).map(Self::from_config)
    }

    /// Creates a backoff from already validated bounds.
    pub const fn from_config(config: BackoffConfig) -> Self {
        Self { limit: config.min_delay(), max_delay: config.max_delay() }
    }

    /// The current (exclusive) upper bound of the next delay.
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Draws the next delay and doubles the limit, without waiting.
    pub fn next_delay(&mut self) -> u32 {
        let delay = rand::thread_rng().gen_range(0..self.limit);
        self.limit = self.limit.saturating_mul(2).min(self.max_delay);
        delay
    }

    /// Busy-waits for a random number of spin hints.
    pub fn wait(&mut self) {
        for _ in 0..self.next_delay() {
            hint::spin_loop();
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use proptest::prelude::*;

    use super::Backoff;
    use crate::Error;

    #[test]
    fn rejects_inverted_bounds() {
        let err = Backoff::new(64, 32).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "max_delay", .. }));
        let err = Backoff::new(0, 32).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { what: "min_delay", .. }));
    }

    #[test]
    fn equal_bounds_never_grow() {
        let mut backoff = Backoff::new(7, 7).unwrap();
        for _ in 0..10 {
            assert!(backoff.next_delay() < 7);
            assert_eq!(backoff.limit(), 7);
        }
    }

    proptest! {
        #[test]
        fn limit_doubles_up_to_max(min in 1u32..1_000, extra in 0u32..100_000, k in 0u32..24) {
            let max = min + extra;
            let mut backoff = Backoff::new(min, max).unwrap();
            for _ in 0..k {
                let before = backoff.limit();
                prop_assert!(backoff.next_delay() < before);
            }
            let expected = (u64::from(min) << k).min(u64::from(max));
            prop_assert_eq!(u64::from(backoff.limit()), expected);
        }
    }
}
