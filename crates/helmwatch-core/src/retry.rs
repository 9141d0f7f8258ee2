//! Retry logic for backend calls.
//!
//! Only the SOS dispatch retries: the push channel never retries on its own
//! (the monitor resubscribes on a schedule) and the poll loop simply tries
//! again on its next tick.
//!
//! # Example
//!
//! ```
//! use helmwatch_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! // Two retries, 500 ms then 1 s
//! let config = RetryConfig::for_sos();
//!
//! let ack = with_retry(&config, "send_sos", || async {
//!     // Your backend call here
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_sos()
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry configuration for the SOS call.
    ///
    /// An SOS is safety-critical but also time-critical: a few quick retries
    /// cover a dropped connection without holding the rider for long.
    pub fn for_sos() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    // ==================== Builder Methods ====================

    /// Set maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config("backoff_multiplier must be >= 1.0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config(
                "max_delay must be >= initial_delay",
            ));
        }
        Ok(())
    }

    /// Calculate delay for a given attempt number.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Up to 25% extra
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Non-retryable errors (see [`is_retryable`]) are returned immediately.
/// Otherwise the last error is returned once all attempts are used up.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_retryable_status(status: Option<u16>) -> bool {
    match status {
        // No response at all: the request never made it
        None => true,
        Some(code) => code == 408 || code == 429 || code >= 500,
    }
}

/// Check if an error is retryable.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Timeout { .. } => true,
        Error::Channel { .. } => true,
        Error::Poll { status, .. } | Error::Dispatch { status, .. } => is_retryable_status(*status),
        #[cfg(feature = "http")]
        Error::Http(e) => {
            !e.is_builder() && !e.is_decode() && is_retryable_status(e.status().map(|s| s.as_u16()))
        }
        #[cfg(feature = "websocket")]
        Error::WebSocket(_) => true,
        Error::Malformed(_) => false,
        Error::Json(_) => false,
        Error::Cancelled => false,
        Error::InvalidConfig(_) => false,
        Error::EmergencyLocked => false,
        Error::MonitorStopped => false,
    }
}
