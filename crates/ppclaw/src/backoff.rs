use rand::Rng;
use std::time::Duration;

/// Reconnect delay that grows geometrically up to a cap.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// and then advances it by `factor`, never past `max`. Jitter is off by
/// default so consecutive delays are non-decreasing.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppclaw::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(1000),
    ///     Duration::from_millis(30_000),
    ///     2.0,
    /// );
    /// assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    /// assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.0,
            current: initial,
        }
    }

    /// Randomize each returned delay by up to `±fraction` (clamped to 0.0..=0.5).
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = if fraction.is_finite() {
            fraction.clamp(0.0, 0.5)
        } else {
            0.0
        };
        self
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will be based on.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    /// Return the delay to wait now and advance the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;

        let delay = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            Duration::from_millis((current_ms as f64 * factor) as u64)
        } else {
            self.current
        };

        // float -> int casts saturate, so a huge factor cannot wrap
        let next_ms = (current_ms as f64 * self.factor) as u64;
        self.current = Duration::from_millis(next_ms.min(max_ms));

        delay
    }

    /// Reset the backoff to its initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
