//! Jittered exponential backoff for gateway reconnect delays.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with randomized jitter.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// multiplied by a random factor in `0.75..=1.25`, then advances the state
/// toward `max`. The attempt counter lives with the caller; this type only
/// owns the delay schedule.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a backoff schedule starting at `initial`, growing by `factor`
    /// per step, capped at `max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use anpr::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(200),
    ///     Duration::from_secs(60),
    ///     2.0,
    /// );
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(150)); // 200ms * 0.75 jitter
    /// assert!(delay <= Duration::from_millis(250)); // 200ms * 1.25 jitter
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// Returns the next delay (with jitter applied) and advances the schedule.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;

        // Jitter applies to the current step, not the advanced one
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = Duration::from_millis((current_ms as f64 * jitter) as u64);

        let advanced_ms = (current_ms as f64 * self.factor) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        self.current = Duration::from_millis(advanced_ms.min(max_ms));

        delay
    }

    /// Rewinds the schedule to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
