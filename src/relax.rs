// Derived from relax.rs of spin-rs, reworked to route every hint through the
// `cfg` module (so Loom models observe it) and to share a bounded exponential
// step between the backoff policies.
//
// Original file at its most recent change (at the time of writing):
// https://github.com/mvdnes/spin-rs/blob/5860ee114094cf200b97348ff332155fbd7159b4/src/relax.rs
//
// Copyright (c) 2014 Mathijs van de Nes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Policies executed by a thread while it busy-waits on a lock word.
//!
//! Every lock in this crate waits by spinning on some atomic state. What a
//! thread does between two consecutive reads of that state is decided by a
//! [`Relax`] policy, chosen through a type parameter on the lock. None of the
//! policies block on a kernel primitive: the most cooperative one, [`Yield`],
//! only gives the remainder of the time slice back to the scheduler.

use crate::cfg::hint;

/// A trait implemented by spinning relax policies.
pub trait Relax {
    /// Initializes the state of a single waiting episode.
    fn new() -> Self;

    /// Performs the relaxing operation between two reads of a lock word.
    fn relax(&mut self);
}

/// A policy that spins while signaling the processor that it is running a
/// busy-wait loop, via [`core::hint::spin_loop`].
///
/// This is the default policy of every lock in this crate. Keep in mind that
/// schedulers cannot tell spinning apart from useful work, see
/// [spinlocks considered harmful].
///
/// [spinlocks considered harmful]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
#[derive(Debug)]
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A policy that yields the current time slice to the scheduler.
///
/// Useful when there are more spinning threads than processors, which is
/// the usual situation in test suites.
#[cfg(any(feature = "yield", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
#[derive(Debug)]
pub struct Yield;

#[cfg(any(feature = "yield", test))]
impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn relax(&mut self) {
        crate::cfg::thread::yield_now();
    }
}

/// A policy that spins without any processor hint.
///
/// Prefer [`Spin`]. This one only exists for targets that miscompile or lack
/// spin hint intrinsics.
#[derive(Debug)]
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

// Exponential backoff is based on the crossbeam-utils implementation.
// link to most recent change (as the time of writing):
// https://github.com/crossbeam-rs/crossbeam/blob/371de8c2d304db07662450995848f3dc9598ac99/crossbeam-utils/src/backoff.rs

/// A policy that spins like [`Spin`], doubling the number of hints issued
/// after each failed read, up to `2^6` hints per relax call.
///
/// This is a deterministic, per wait episode backoff. The randomized backoff
/// that [`BackoffLock`] and [`HboLock`] run between acquisition attempts is
/// [`Backoff`].
///
/// [`BackoffLock`]: crate::spin::BackoffLock
/// [`HboLock`]: crate::hier::HboLock
/// [`Backoff`]: crate::backoff::Backoff
#[derive(Debug)]
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin();
        self.step.advance(Self::SPIN_LIMIT);
    }
}

/// A policy that spins with exponential backoff up to a threshold and then
/// falls back to [`Yield`].
#[cfg(feature = "yield")]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
#[derive(Debug)]
pub struct YieldBackoff {
    step: Step,
}

#[cfg(feature = "yield")]
impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

#[cfg(feature = "yield")]
impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin();
        } else {
            crate::cfg::thread::yield_now();
        }
        self.step.advance(Self::YIELD_LIMIT);
    }
}

/// Exponent of the current backoff step.
#[derive(Debug)]
struct Step(u32);

impl Step {
    /// Issues `2^step` spin hints.
    fn spin(&self) {
        for _ in 0..1u32 << self.0.min(SpinBackoff::SPIN_LIMIT) {
            hint::spin_loop();
        }
    }

    /// Moves to the next step, saturating at `limit + 1`.
    fn advance(&mut self, limit: u32) {
        if self.0 <= limit {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff};

    #[test]
    fn spin_backoff_step_saturates() {
        let mut relax = SpinBackoff::new();
        for _ in 0..32 {
            relax.relax();
        }
        assert_eq!(relax.step.0, SpinBackoff::SPIN_LIMIT + 1);
    }
}
