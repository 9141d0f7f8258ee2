//! Resubscribe schedule for the push channel.
//!
//! The push channel never retries by itself. After a failed subscribe or a
//! lost subscription the monitor waits [`ReconnectOptions::delay_for_attempt`]
//! and tries again, forever by default, while the pull channel keeps the
//! projection fresh.

use std::time::Duration;

use crate::error::{Error, Result};

/// Options for push resubscription.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Maximum number of resubscribe attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first resubscribe attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to use exponential backoff.
    pub use_exponential_backoff: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
        }
    }
}

impl ReconnectOptions {
    /// Create new reconnect options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options with a fixed delay (no backoff).
    pub fn fixed_delay(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            use_exponential_backoff: false,
            ..Default::default()
        }
    }

    /// Set maximum number of resubscribe attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set delay before the first resubscribe attempt.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay between attempts.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier for exponential backoff.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);

        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` tries.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `backoff_multiplier` is >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidConfig(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidConfig(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_options_default() {
        let opts = ReconnectOptions::default();
        assert_eq!(opts.max_attempts, None);
        assert_eq!(opts.initial_delay, Duration::from_secs(5));
        assert_eq!(opts.max_delay, Duration::from_secs(60));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_delay_calculation() {
        let opts = ReconnectOptions::default();
        assert_eq!(opts.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(opts.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(opts.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let opts = ReconnectOptions::default();
        assert_eq!(opts.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(opts.delay_for_attempt(50), Duration::from_secs(60));
    }

    #[test]
    fn test_fixed_delay() {
        let opts = ReconnectOptions::fixed_delay(Duration::from_secs(3));
        assert_eq!(opts.delay_for_attempt(0), Duration::from_secs(3));
        assert_eq!(opts.delay_for_attempt(9), Duration::from_secs(3));
    }

    #[test]
    fn test_allows_attempt() {
        assert!(ReconnectOptions::default().allows_attempt(u32::MAX - 1));
        let limited = ReconnectOptions::default().max_attempts(2);
        assert!(limited.allows_attempt(1));
        assert!(!limited.allows_attempt(2));
    }

    #[test]
    fn test_validate() {
        assert!(
            ReconnectOptions::default()
                .backoff_multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::default()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::default()
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
