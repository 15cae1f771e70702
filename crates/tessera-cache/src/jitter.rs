//! TTL jitter policy.

use rand::Rng;
use std::time::Duration;

/// Randomizes expirations around a base duration.
///
/// `apply(base)` returns `base * (1 + u)` with `u` uniform in
/// `[-percent/100, +percent/100]`. A percent of zero returns `base` unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtlJitter {
    percent: u8,
}

impl TtlJitter {
    /// Creates a jitter policy. Values above 100 are clamped to 100.
    #[must_use]
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
        }
    }

    /// A policy that never changes the TTL.
    #[must_use]
    pub const fn none() -> Self {
        Self { percent: 0 }
    }

    /// Returns the jitter percentage.
    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.percent
    }

    /// Returns a randomized TTL around `base`.
    #[must_use]
    pub fn apply(&self, base: Duration) -> Duration {
        if self.percent == 0 || base.is_zero() {
            return base;
        }

        let spread = self.spread();
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        base.mul_f64(1.0 + offset)
    }

    /// Returns the inclusive `(min, max)` range `apply(base)` can produce.
    #[must_use]
    pub fn bounds(&self, base: Duration) -> (Duration, Duration) {
        let spread = self.spread();
        (base.mul_f64(1.0 - spread), base.mul_f64(1.0 + spread))
    }

    fn spread(&self) -> f64 {
        f64::from(self.percent) / 100.0
    }
}
