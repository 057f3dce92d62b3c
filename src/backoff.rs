//! Reconnect backoff policy.
//!
//! Pure exponential growth with a cap and randomized jitter. The attempt
//! counter lives with the caller (reset on every successful connect), which
//! keeps this policy stateless and independently testable.

use rand::Rng as _;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// The raw delay for attempt `n` is `min(max, base * 2^n)`. Up to 30% of the
/// raw value is subtracted as uniform jitter to desynchronize simultaneous
/// retries from many clients, and the result never drops below `base` so
/// jitter cannot produce near-zero delays that hammer the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        debug_assert!(base <= max, "base delay must not exceed max delay");
        Self { base, max }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    /// Minimum delay.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay cap.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Raw exponential delay for `attempt`, saturating at the cap.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let raw_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(raw_ms).min(self.max)
    }

    /// Jittered delay for `attempt`, always within `[base, max]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let raw_ms = self.raw_delay(attempt).as_millis() as u64;
        let max_jitter_ms = raw_ms * 3 / 10;
        let jitter_ms = if max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=max_jitter_ms)
        };
        Duration::from_millis(raw_ms - jitter_ms).max(self.base)
    }
}
