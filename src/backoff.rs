//! Exponential backoff for reconnect and resubscribe.
//!
//! The delay starts at a floor, doubles on every failure and is capped:
//! ```text
//! 20ms -> 40ms -> 80ms -> ... -> max (10s by default)
//! ```
//! Unlike a retry loop there is no attempt limit: the connection keeps
//! retrying forever, and a success resets the delay to the floor.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cmwlight_client::Backoff;
//!
//! let mut backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(100));
//! assert_eq!(backoff.current(), Duration::from_millis(20));
//! backoff.advance();
//! assert_eq!(backoff.current(), Duration::from_millis(40));
//! backoff.advance();
//! backoff.advance();
//! assert_eq!(backoff.current(), Duration::from_millis(100));
//! backoff.reset();
//! assert_eq!(backoff.current(), Duration::from_millis(20));
//! ```

use std::time::Duration;

/// Initial backoff (floor).
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(20);

/// Upper bound of the backoff (`MAX_BACK_OFF`).
pub const MAX_BACK_OFF: Duration = Duration::from_millis(10_000);

/// Growth factor applied on each failure.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Doubling backoff delay with a floor and a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    /// Failures since the last reset.
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max`.
    ///
    /// A `max` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Current delay.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Number of `advance` calls since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure: double the delay, capped at the maximum.
    pub fn advance(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.current = self
            .current
            .checked_mul(BACKOFF_MULTIPLIER)
            .map_or(self.max, |next| next.min(self.max));
        self.current
    }

    /// Record a success: back to the floor.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, MAX_BACK_OFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_default_creation() {
        let backoff = Backoff::default();
        assert_eq!(backoff.current(), Duration::from_millis(20));
        assert_eq!(backoff.max(), MAX_BACK_OFF);
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_backoff_doubles() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.advance(), Duration::from_millis(40));
        assert_eq!(backoff.advance(), Duration::from_millis(80));
        assert_eq!(backoff.advance(), Duration::from_millis(160));
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let mut backoff = Backoff::default();
        let mut last = backoff.current();
        for _ in 0..64 {
            let next = backoff.advance();
            assert!(next >= last);
            assert!(next <= MAX_BACK_OFF);
            last = next;
        }
        assert_eq!(backoff.current(), MAX_BACK_OFF);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.advance();
        backoff.advance();
        backoff.reset();
        assert_eq!(backoff.current(), DEFAULT_INITIAL_BACKOFF);
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_backoff_max_below_initial() {
        let backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(backoff.max(), Duration::from_millis(50));
    }
}
