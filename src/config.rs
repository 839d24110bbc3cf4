//! Tuning parameters for the locks that need more than a relax policy.
//!
//! All delays are counted in spin hints ([`core::hint::spin_loop`]), never
//! in wall clock time: no lock in this crate sleeps.

use crate::error::{Error, Result};

/// Bounds of a randomized exponential [`Backoff`](crate::backoff::Backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    min_delay: u32,
    max_delay: u32,
}

impl BackoffConfig {
    /// Bounds used by [`BackoffLock`](crate::spin::BackoffLock) by default.
    pub const DEFAULT: Self = Self { min_delay: 32, max_delay: 1024 };

    /// Creates a new configuration.
    ///
    /// Fails with [`Error::InvalidArgument`] if `min_delay` is zero or if
    /// `max_delay < min_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use spinlocks::config::BackoffConfig;
    ///
    /// assert!(BackoffConfig::new(8, 256).is_ok());
    /// assert!(BackoffConfig::new(256, 8).is_err());
    /// ```
    pub const fn new(min_delay: u32, max_delay: u32) -> Result<Self> {
        if min_delay == 0 {
            return Err(Error::invalid("min_delay", "must be greater than zero"));
        }
        if max_delay < min_delay {
            return Err(Error::invalid("max_delay", "must not be smaller than min_delay"));
        }
        Ok(Self { min_delay, max_delay })
    }

    /// The initial delay limit.
    pub const fn min_delay(&self) -> u32 {
        self.min_delay
    }

    /// The delay limit cap.
    pub const fn max_delay(&self) -> u32 {
        self.max_delay
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Backoff bounds of a [`HboLock`](crate::hier::HboLock).
///
/// Threads that observe the lock held by their own cluster back off with the
/// short `local` bounds, everybody else with the long `remote` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HboConfig {
    /// Bounds used while the holder is in the caller's cluster.
    pub local: BackoffConfig,
    /// Bounds used while the holder is in another cluster.
    pub remote: BackoffConfig,
}

impl HboConfig {
    /// The default local and remote bounds.
    pub const DEFAULT: Self = Self {
        local: BackoffConfig { min_delay: 8, max_delay: 256 },
        remote: BackoffConfig { min_delay: 256, max_delay: 1024 },
    };
}

impl Default for HboConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything the [`factory`](crate::factory) needs to build any lock kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Number of slots of an [`ArrayLock`](crate::queue::ArrayLock). Must be
    /// at least the number of threads that may contend at the same time.
    pub capacity: usize,
    /// Bounds of [`BackoffLock`](crate::spin::BackoffLock).
    pub backoff: BackoffConfig,
    /// Bounds of [`HboLock`](crate::hier::HboLock).
    pub hbo: HboConfig,
}

impl LockConfig {
    /// Creates a configuration sized for `capacity` contending threads.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        let capacity = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self { capacity, backoff: BackoffConfig::DEFAULT, hbo: HboConfig::DEFAULT }
    }
}
