//! Fallback polling of the pull endpoint.
//!
//! [`PollStream`] runs a background task that calls
//! [`PullChannel::poll`] on a fixed interval and yields every result,
//! success or failure. Individual failures never stop the loop; counting
//! them is up to the consumer.
//!
//! The stream supports graceful shutdown via [`PollStream::close`], and
//! dropping it cancels the background task as well.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use helmwatch_types::{
    AlertRecord, ParseError, ParseResult, StatusSnapshot, normalize_alert_list, parse_status,
};

use crate::error::{Error, Result};
use crate::traits::PullChannel;

/// Result of one successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSnapshot {
    /// Alert records, newest-first and capped.
    pub alerts: Vec<AlertRecord>,
    /// Device status, absent when the response carried none.
    pub status: Option<StatusSnapshot>,
}

impl PollSnapshot {
    /// Normalize a pull response body `{ "alerts": [...], "status": {...} }`.
    ///
    /// A missing `alerts` field is an empty batch and a missing or null
    /// `status` is `None`. Either field that is present but malformed is
    /// dropped with a warning and the other is kept, so a bad alert list
    /// never hides an accident status. Only a body that is not an object is
    /// an error.
    pub fn from_response(body: &Value) -> ParseResult<Self> {
        if !body.is_object() {
            return Err(ParseError::UnexpectedShape {
                what: "poll response",
                expected: "object",
            });
        }
        let alerts = match body.get("alerts") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => match normalize_alert_list(value) {
                Ok(batch) => batch.records,
                Err(e) => {
                    warn!("Dropping malformed alerts from poll: {}", e);
                    Vec::new()
                }
            },
        };
        let status = match body.get("status") {
            None | Some(Value::Null) => None,
            Some(value) => match parse_status(value) {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!("Dropping malformed status from poll: {}", e);
                    None
                }
            },
        };
        Ok(Self { alerts, status })
    }
}

/// Options for the poll loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Time between polls. Default: 5 seconds.
    pub interval: Duration,
    /// Upper bound on one round trip. Default: 10 seconds.
    pub timeout: Duration,
    /// Buffer size for the result channel. Default: 8.
    pub buffer_size: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            buffer_size: 8,
        }
    }
}

impl PollOptions {
    /// Create options with a specific poll interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Set the round-trip timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `buffer_size` is > 0
    /// - `interval` is > 0
    /// - `timeout` is > 0
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::invalid_config("buffer_size must be > 0"));
        }
        if self.interval.is_zero() {
            return Err(Error::invalid_config("poll interval must be > 0"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("poll timeout must be > 0"));
        }
        Ok(())
    }
}

/// Result type for stream items.
pub type PollResult = std::result::Result<PollSnapshot, Error>;

/// A running poll loop.
pub struct PollStream {
    receiver: mpsc::Receiver<PollResult>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl PollStream {
    /// Start polling. The first poll happens immediately.
    pub fn start(channel: Arc<dyn PullChannel>, options: PollOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.buffer_size.max(1));
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(options.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Polling cancelled, stopping gracefully");
                        break;
                    }
                    _ = ticker.tick() => {
                        let result = tokio::select! {
                            _ = task_token.cancelled() => break,
                            r = timeout(options.timeout, channel.poll()) => r,
                        };
                        let item = result
                            .unwrap_or_else(|_| Err(Error::timeout("poll", options.timeout)));
                        trace!("Poll finished (ok: {})", item.is_ok());
                        if tx.send(item).await.is_err() {
                            debug!("Poll receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            receiver: rx,
            handle,
            cancel_token,
        }
    }

    /// Stop polling.
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// Check if the background task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Check if the stream has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for PollStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for PollStream {
    type Item = PollResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}
