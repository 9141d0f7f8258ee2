//! Core library for the helmwatch helmet-safety monitor.
//!
//! This crate keeps a live view of a smart helmet's alerts and status, fed by
//! a real-time push channel with a polling fallback, and escalates detected
//! accidents to an SOS call after a cancellable countdown.
//!
//! # Features
//!
//! - **Push with failover**: Subscribe to the push channel, fall back to
//!   polling when it fails and resubscribe on a backoff schedule
//! - **Alert log**: Newest-first, deduplicated by id, capped at 50 records
//! - **Emergency escalation**: 30 second countdown, cancel wins over expiry,
//!   at most one SOS call in flight per episode
//! - **SOS dispatch**: Bounded retry, local record when the push channel
//!   cannot echo the SOS back
//! - **Events**: Broadcast of every state change plus a `watch` snapshot
//!
//! # Connection Health
//!
//! | Health | Meaning |
//! |--------|---------|
//! | `live-push` | The push subscription is feeding the projection |
//! | `fallback-poll` | Polling is feeding the projection |
//! | `disconnected` | Both channels are failing; polling keeps trying |
//!
//! # Cargo Features
//!
//! - `http` (default): [`HttpBackend`], the REST pull channel and SOS endpoint
//! - `websocket` (default): [`WsPushChannel`], the WebSocket push channel
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use helmwatch_core::{HttpBackend, Monitor, MonitorConfig, WsPushChannel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http = Arc::new(HttpBackend::new("https://helmet.example.com/api")?);
//!     let push = Arc::new(WsPushChannel::new("wss://helmet.example.com/push")?);
//!
//!     let monitor = Monitor::spawn(MonitorConfig::default(), push, http.clone(), http)?;
//!
//!     let mut watch = monitor.watch();
//!     while watch.changed().await.is_ok() {
//!         let snapshot = watch.borrow().clone();
//!         println!("{} / {} alerts", snapshot.health, snapshot.alerts.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod dispatcher;
pub mod emergency;
pub mod error;
pub mod events;
#[cfg(feature = "http")]
pub mod http;
pub mod mock;
pub mod monitor;
pub mod pull;
pub mod push;
pub mod reconnect;
pub mod retry;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod ws;

// Core exports
pub use coordinator::{Coordinator, Directive, MonitorConfig, MonitorSnapshot};
pub use dispatcher::{DispatchOutcome, SosAck, SosDispatcher, SosRequest, local_sos_record};
pub use emergency::{
    CancelOutcome, DEFAULT_COUNTDOWN_SECS, EmergencyAction, EmergencyMachine, Episode, Resolution,
};
pub use error::{ChannelFailureReason, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, MonitorEvent};
pub use monitor::{Monitor, MonitorHandle, SHUTDOWN_GRACE};
pub use traits::{PullChannel, PushChannel, SosEndpoint};

pub use mock::MockBackend;
pub use pull::{PollOptions, PollResult, PollSnapshot, PollStream};
pub use push::{DisabledPush, PushFeed, PushItem, PushMessage, PushSubscription, Topic};
pub use reconnect::ReconnectOptions;
pub use retry::{RetryConfig, is_retryable, with_retry};

#[cfg(feature = "http")]
pub use http::{DEFAULT_REQUEST_TIMEOUT, DeviceReport, HttpBackend};
#[cfg(feature = "websocket")]
pub use ws::{DEFAULT_CONNECT_TIMEOUT, WsPushChannel};

// Re-export from helmwatch-types
pub use helmwatch_types::{
    ALERT_LOG_CAPACITY, AlertKind, AlertRecord, ConnectionHealth, DispatchReason, EpisodeState,
    FatigueLevel, HelmetState, Location, Severity, StatusSnapshot,
};
