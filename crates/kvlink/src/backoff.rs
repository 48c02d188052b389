// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect backoff strategies.
//!
//! A [`Delay`] maps a retry attempt number to a wait duration. Attempt 0 is
//! the initial, non-retried call and always yields the lower bound; retry
//! attempts start at 1. The exponential variant yields
//! `step * base^(attempt-1)` clamped to `[lower, upper]`:
//!
//! ```text
//! attempt:  0      1      2      3      4      5    ...
//! delay:    lower  1*s    2*s    4*s    8*s    16*s ...   (base 2)
//! ```
//!
//! Strategies are stateless; [`TrackingDelay`] wraps any strategy with an
//! internal attempt counter for callers that do not track attempts
//! themselves. The connection resets a stateful delay exactly when it
//! transitions to active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{KvError, Result};

/// Default upper bound for the built-in exponential strategy (30 seconds).
pub const DEFAULT_DELAY_UPPER: Duration = Duration::from_secs(30);

/// Default step (multiplier) for the built-in exponential strategy.
pub const DEFAULT_DELAY_STEP: Duration = Duration::from_millis(1);

/// Maps a retry attempt number to a wait duration.
///
/// Implementations must never panic for any attempt value and must return
/// the lower bound for attempt 0.
pub trait Delay: Send + Sync {
    /// Compute the wait duration for the given attempt number.
    fn delay(&self, attempt: u64) -> Duration;

    /// Clear any internal state. No-op for stateless strategies.
    fn reset(&self) {}
}

// ============================================================================
// Exponential delay
// ============================================================================

/// Delay that grows exponentially with every attempt.
///
/// `delay(n) = clamp(step * base^(n-1), lower, upper)` for `n >= 1`.
/// Base 2 uses a bit-shift fast path; other bases go through floating
/// point and saturate instead of overflowing.
#[derive(Clone, Debug)]
pub struct ExponentialDelay {
    lower: Duration,
    upper: Duration,
    base: u32,
    step: Duration,
}

impl ExponentialDelay {
    /// Create an exponential delay with a 1ms step.
    ///
    /// Fails with [`KvError::InvalidArgument`] when `lower > upper` or
    /// `base < 2`.
    pub fn new(lower: Duration, upper: Duration, base: u32) -> Result<Self> {
        Self::with_step(lower, upper, base, DEFAULT_DELAY_STEP)
    }

    /// Create an exponential delay with an explicit step duration.
    pub fn with_step(lower: Duration, upper: Duration, base: u32, step: Duration) -> Result<Self> {
        if lower > upper {
            return Err(KvError::InvalidArgument(format!(
                "delay lower bound {:?} exceeds upper bound {:?}",
                lower, upper
            )));
        }
        if base < 2 {
            return Err(KvError::InvalidArgument(format!(
                "delay base must be >= 2, got {}",
                base
            )));
        }
        Ok(Self {
            lower,
            upper,
            base,
            step,
        })
    }

    /// The built-in default: 0..30s, base 2, 1ms step.
    pub fn default_reconnect() -> Self {
        Self {
            lower: Duration::ZERO,
            upper: DEFAULT_DELAY_UPPER,
            base: 2,
            step: DEFAULT_DELAY_STEP,
        }
    }

    /// Raw growth factor for an attempt, saturating at `u64::MAX`.
    fn growth(&self, attempt: u64) -> u64 {
        if attempt == 0 {
            return 0;
        }
        if self.base == 2 {
            // Bit-shift fast path; 64+ would overflow the shift.
            if attempt >= 64 {
                u64::MAX
            } else {
                1u64 << (attempt - 1)
            }
        } else {
            let exp = (attempt - 1).min(i32::MAX as u64) as i32;
            let raw = f64::from(self.base).powi(exp);
            if raw >= u64::MAX as f64 {
                u64::MAX
            } else {
                raw.round() as u64
            }
        }
    }
}

impl Delay for ExponentialDelay {
    fn delay(&self, attempt: u64) -> Duration {
        if attempt == 0 {
            // Underflow safeguard: the initial attempt is not a retry.
            return self.lower;
        }

        let nanos = (self.step.as_nanos()).saturating_mul(u128::from(self.growth(attempt)));
        let raw = if nanos > u128::from(u64::MAX) {
            Duration::from_nanos(u64::MAX)
        } else {
            Duration::from_nanos(nanos as u64)
        };

        raw.clamp(self.lower, self.upper)
    }
}

// ============================================================================
// Constant delay
// ============================================================================

/// Delay that yields the same duration for every retry attempt.
///
/// Attempt 0 still yields zero, matching the exponential variant's
/// treatment of the initial call.
#[derive(Clone, Copy, Debug)]
pub struct ConstantDelay {
    delay: Duration,
}

impl ConstantDelay {
    /// Create a constant delay.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Delay for ConstantDelay {
    fn delay(&self, attempt: u64) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

// ============================================================================
// Stateful tracking wrapper
// ============================================================================

/// Wraps a strategy with an internal attempt counter.
///
/// `next()` advances the counter and returns the corresponding delay;
/// `reset()` clears it. Used by callers that cannot thread an attempt
/// count through their control flow.
#[derive(Debug)]
pub struct TrackingDelay<D> {
    inner: D,
    attempts: AtomicU64,
}

impl<D: Delay> TrackingDelay<D> {
    /// Wrap a delay strategy.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            attempts: AtomicU64::new(0),
        }
    }

    /// Advance the internal counter and return the delay for it.
    pub fn next(&self) -> Duration {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.delay(attempt)
    }

    /// Current internal attempt count.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl<D: Delay> Delay for TrackingDelay<D> {
    fn delay(&self, attempt: u64) -> Duration {
        self.inner.delay(attempt)
    }

    fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_zero_yields_lower_bound() {
        let lower = Duration::from_millis(50);
        let delay = ExponentialDelay::new(lower, Duration::from_secs(10), 2).unwrap();
        assert_eq!(delay.delay(0), lower);

        let constant = ConstantDelay::new(Duration::from_secs(1));
        assert_eq!(constant.delay(0), Duration::ZERO);
    }

    #[test]
    fn power_of_two_table() {
        let lower = Duration::ZERO;
        let upper = Duration::from_secs(30);
        let delay = ExponentialDelay::new(lower, upper, 2).unwrap();

        for attempt in 1..=63u64 {
            let expected =
                Duration::from_millis(1u64 << (attempt - 1)).clamp(lower, upper);
            assert_eq!(delay.delay(attempt), expected, "attempt {}", attempt);
        }
    }

    #[test]
    fn saturates_past_sixty_four() {
        let upper = Duration::from_secs(30);
        let delay = ExponentialDelay::new(Duration::ZERO, upper, 2).unwrap();

        assert_eq!(delay.delay(64), upper);
        assert_eq!(delay.delay(u64::MAX), upper);
    }

    #[test]
    fn alternate_base_grows_and_saturates() {
        let upper = Duration::from_secs(60);
        let delay = ExponentialDelay::new(Duration::ZERO, upper, 3).unwrap();

        assert_eq!(delay.delay(1), Duration::from_millis(1));
        assert_eq!(delay.delay(2), Duration::from_millis(3));
        assert_eq!(delay.delay(3), Duration::from_millis(9));
        // Far past any representable growth: clamped, not panicking.
        assert_eq!(delay.delay(10_000), upper);
    }

    #[test]
    fn clamps_to_bounds() {
        let lower = Duration::from_millis(8);
        let upper = Duration::from_millis(16);
        let delay = ExponentialDelay::new(lower, upper, 2).unwrap();

        assert_eq!(delay.delay(1), lower); // 1ms below the floor
        assert_eq!(delay.delay(4), lower); // 8ms == floor
        assert_eq!(delay.delay(5), upper); // 16ms == ceiling
        assert_eq!(delay.delay(20), upper);
    }

    #[test]
    fn invalid_bounds_rejected() {
        let err = ExponentialDelay::new(Duration::from_secs(2), Duration::from_secs(1), 2);
        assert!(matches!(err, Err(KvError::InvalidArgument(_))));

        let err = ExponentialDelay::new(Duration::ZERO, Duration::from_secs(1), 1);
        assert!(matches!(err, Err(KvError::InvalidArgument(_))));
    }

    #[test]
    fn tracking_delay_counts_and_resets() {
        let tracking = TrackingDelay::new(ExponentialDelay::default_reconnect());

        assert_eq!(tracking.next(), Duration::from_millis(1));
        assert_eq!(tracking.next(), Duration::from_millis(2));
        assert_eq!(tracking.next(), Duration::from_millis(4));
        assert_eq!(tracking.attempts(), 3);

        tracking.reset();
        assert_eq!(tracking.attempts(), 0);
        assert_eq!(tracking.next(), Duration::from_millis(1));
    }
}
