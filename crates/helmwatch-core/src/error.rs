//! Error types for helmwatch-core.
//!
//! # Error Taxonomy
//!
//! Errors fall into four families, and each family has its own propagation
//! policy:
//!
//! | Family | Variants | Propagation |
//! |--------|----------|-------------|
//! | Channel | [`Error::Channel`], [`Error::WebSocket`] | Never surfaced; triggers failover to polling |
//! | Poll | [`Error::Poll`], [`Error::Http`], [`Error::Timeout`] | Never surfaced; counted toward the failure streak |
//! | Dispatch | [`Error::Dispatch`] | Always surfaced to the caller and as a [`crate::MonitorEvent::DispatchFailed`] |
//! | Malformed | [`Error::Malformed`], [`Error::Json`] | Record dropped and logged |
//!
//! Channel and poll errors only ever show up to consumers as a
//! [`ConnectionHealth`](helmwatch_types::ConnectionHealth) change.
//!
//! ## Error Classification
//!
//! [`crate::retry::is_retryable`] decides which errors are worth another
//! attempt. Transport failures, timeouts and 5xx responses are retryable;
//! malformed data, configuration errors and 4xx responses are not.

use std::time::Duration;

use thiserror::Error;

use helmwatch_types::ParseError;

/// Errors that can occur while monitoring a helmet.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The push channel failed to subscribe or signalled a fatal error.
    #[error("Push channel failed: {reason}")]
    Channel {
        /// The structured reason for the failure.
        reason: ChannelFailureReason,
    },

    /// A single poll round trip failed.
    #[error("Poll failed: {message}{}", status_suffix(.status))]
    Poll {
        /// HTTP status, if the backend answered.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The SOS call failed.
    #[error("SOS dispatch failed: {message}{}", status_suffix(.status))]
    Dispatch {
        /// HTTP status, if the backend answered.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// Data from a channel had an unexpected shape.
    #[error("Malformed data: {0}")]
    Malformed(#[from] ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A cancel was requested after the SOS dispatch had started.
    #[error("Emergency can no longer be cancelled: SOS dispatch in progress")]
    EmergencyLocked,

    /// The monitor task is no longer running.
    #[error("Monitor has stopped")]
    MonitorStopped,

    /// HTTP transport error.
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error.
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Structured reasons for push channel failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelFailureReason {
    /// No push endpoint is configured.
    Disabled,
    /// The subscription could not be established.
    SubscribeFailed(String),
    /// Subscribing took longer than the connect timeout.
    Timeout,
    /// The provider delivered an error.
    ServerError(String),
    /// The provider closed the subscription.
    Closed,
    /// The transport broke.
    Transport(String),
}

impl std::fmt::Display for ChannelFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "push channel disabled"),
            Self::SubscribeFailed(msg) => write!(f, "subscribe failed: {}", msg),
            Self::Timeout => write!(f, "subscribe timed out"),
            Self::ServerError(msg) => write!(f, "server error: {}", msg),
            Self::Closed => write!(f, "subscription closed"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl Error {
    /// Create a channel failure with structured reason.
    pub fn channel(reason: ChannelFailureReason) -> Self {
        Self::Channel { reason }
    }

    /// Create a poll failure without an HTTP status.
    pub fn poll(message: impl Into<String>) -> Self {
        Self::Poll {
            status: None,
            message: message.into(),
        }
    }

    /// Create a dispatch failure without an HTTP status.
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            status: None,
            message: message.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Re-label a transport error as a dispatch failure, keeping any HTTP status.
    pub(crate) fn into_dispatch(self) -> Self {
        match self {
            Self::Poll { status, message } => Self::Dispatch { status, message },
            e @ (Self::Dispatch { .. } | Self::Timeout { .. } | Self::Cancelled) => e,
            #[cfg(feature = "http")]
            Self::Http(e) => Self::Dispatch {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            other => Self::dispatch(other.to_string()),
        }
    }
}

/// Result type alias using helmwatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
