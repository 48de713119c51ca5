//! Retry policy and failure dispositions for event delivery.
//!
//! A handler failure walks through a bounded retry loop with
//! exponential backoff; when attempts run out, the subscription's
//! [`ExhaustionPolicy`] decides what happens to the event. The decision
//! for each attempt is expressed as a [`FailureDisposition`] value, so
//! the delivery loop matches on data instead of re-deriving policy.

use std::time::Duration;

/// Backoff configuration for handler retries.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts before exhaustion
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: `delay = initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let delay = Duration::from_millis(
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32)) as u64,
        );

        delay.min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// What to do with an event once its retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Keep retrying at the capped delay, forever. The event blocks its
    /// stream until a deploy or an operator intervenes.
    RetryForever,
    /// Log the event at error level, acknowledge it, and move on. The
    /// read model silently misses one update; checkpoints keep flowing.
    #[default]
    SkipAndContinue,
    /// Fault the whole subscription. Nothing past this event is
    /// processed until an operator restarts it.
    Halt,
}

/// The delivery loop's decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Wait out the given delay, then try again
    Retry(Duration),
    /// Acknowledge the event without applying it
    Skip,
    /// Fault the subscription
    Halt,
}

impl RetryPolicy {
    /// Decide the disposition for a failure on the given attempt
    /// (0-based), under the given exhaustion policy.
    #[must_use]
    pub fn disposition_for(&self, attempt: usize, on_exhausted: ExhaustionPolicy) -> FailureDisposition {
        if attempt < self.max_retries {
            return FailureDisposition::Retry(self.delay_for_attempt(attempt));
        }
        match on_exhausted {
            ExhaustionPolicy::RetryForever => FailureDisposition::Retry(self.max_delay),
            ExhaustionPolicy::SkipAndContinue => FailureDisposition::Skip,
            ExhaustionPolicy::Halt => FailureDisposition::Halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn retries_then_follows_exhaustion_policy() {
        let policy = RetryPolicy::builder().max_retries(2).build();

        assert!(matches!(
            policy.disposition_for(0, ExhaustionPolicy::SkipAndContinue),
            FailureDisposition::Retry(_)
        ));
        assert!(matches!(
            policy.disposition_for(1, ExhaustionPolicy::SkipAndContinue),
            FailureDisposition::Retry(_)
        ));
        assert_eq!(
            policy.disposition_for(2, ExhaustionPolicy::SkipAndContinue),
            FailureDisposition::Skip
        );
        assert_eq!(
            policy.disposition_for(2, ExhaustionPolicy::Halt),
            FailureDisposition::Halt
        );
        assert_eq!(
            policy.disposition_for(2, ExhaustionPolicy::RetryForever),
            FailureDisposition::Retry(policy.max_delay)
        );
    }
}
