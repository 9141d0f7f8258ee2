//! Mock backend implementation for testing.
//!
//! This module provides an in-memory backend that serves all three channels
//! from the same state, so the monitor can be tested without a network.
//!
//! The [`MockBackend`] implements [`PushChannel`], [`PullChannel`] and
//! [`SosEndpoint`], allowing it to be used interchangeably with the real
//! clients.
//!
//! # Features
//!
//! - **Shared state**: data written with [`MockBackend::push_status`] or
//!   [`MockBackend::push_alert`] is delivered to the live subscription and
//!   returned by the next poll
//! - **Failure injection**: fail the next N polls or SOS calls, refuse
//!   subscriptions, or kill the live subscription
//! - **Latency simulation**: add artificial delays to polls and SOS calls
//! - **SOS echo**: an acknowledged SOS shows up as an alert on both channels

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::dispatcher::{SosAck, SosRequest};
use crate::error::{ChannelFailureReason, Error, Result};
use crate::pull::PollSnapshot;
use crate::push::{PushFeed, PushMessage, PushSubscription, Topic};
use crate::traits::{PullChannel, PushChannel, SosEndpoint};

#[derive(Debug, Default)]
struct MockState {
    /// Alert node keyed by id, as the push channel sees it.
    alerts: Map<String, Value>,
    /// Status node, `Null` until something is written.
    status: Value,
    /// Acknowledged SOS requests.
    sos_requests: Vec<SosRequest>,
    /// Producer half of the live subscription.
    feed: Option<PushFeed>,
}

/// A mock helmet backend for testing.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use helmwatch_core::{MockBackend, Monitor, MonitorConfig};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let backend = Arc::new(MockBackend::new());
///     let monitor = Monitor::spawn(
///         MonitorConfig::default(),
///         backend.clone(),
///         backend.clone(),
///         backend.clone(),
///     )
///     .unwrap();
///
///     backend.push_status(json!({"helmet": "connected"})).await;
///     monitor.shutdown().await;
/// }
/// ```
pub struct MockBackend {
    state: Mutex<MockState>,
    push_available: AtomicBool,
    subscribe_count: AtomicU32,
    poll_count: AtomicU32,
    remaining_poll_failures: AtomicU32,
    /// Simulated poll latency in milliseconds (0 = no delay).
    poll_latency_ms: AtomicU64,
    sos_attempts: AtomicU32,
    remaining_sos_failures: AtomicU32,
    /// Simulated SOS latency in milliseconds (0 = no delay).
    sos_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("push_available", &self.push_available.load(Ordering::Relaxed))
            .field("subscribed", &self.is_subscribed())
            .field("poll_count", &self.poll_count())
            .field("sos_attempts", &self.sos_attempts())
            .finish()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create an empty backend with the push channel available.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            push_available: AtomicBool::new(true),
            subscribe_count: AtomicU32::new(0),
            poll_count: AtomicU32::new(0),
            remaining_poll_failures: AtomicU32::new(0),
            poll_latency_ms: AtomicU64::new(0),
            sos_attempts: AtomicU32::new(0),
            remaining_sos_failures: AtomicU32::new(0),
            sos_latency_ms: AtomicU64::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_feed(&self) -> Option<PushFeed> {
        self.state()
            .feed
            .as_ref()
            .filter(|feed| !feed.is_unsubscribed())
            .cloned()
    }

    async fn deliver(&self, topic: Topic, data: &Value) {
        let Some(feed) = self.live_feed() else {
            return;
        };
        match PushMessage::decode(topic, data) {
            Ok(message) => {
                feed.deliver(message).await;
            }
            Err(e) => debug!("Mock push dropped malformed {} delivery: {}", topic, e),
        }
    }

    // --- Test control methods ---

    /// Replace the status node and deliver it to the live subscription.
    pub async fn push_status(&self, status: Value) {
        self.state().status = status.clone();
        self.deliver(Topic::Status, &status).await;
    }

    /// Write one alert and deliver the whole alert node to the live
    /// subscription.
    pub async fn push_alert(&self, id: &str, alert: Value) {
        let alerts = {
            let mut state = self.state();
            state.alerts.insert(id.to_string(), alert);
            Value::Object(state.alerts.clone())
        };
        self.deliver(Topic::Alerts, &alerts).await;
    }

    /// Kill the live subscription with a fatal signal.
    pub async fn drop_push(&self, reason: ChannelFailureReason) {
        let feed = self.state().feed.take();
        if let Some(feed) = feed {
            feed.fail(reason).await;
        }
    }

    /// Allow or refuse new subscriptions.
    pub fn set_push_available(&self, available: bool) {
        self.push_available.store(available, Ordering::Relaxed);
    }

    /// Whether a subscription is currently live.
    pub fn is_subscribed(&self) -> bool {
        self.live_feed().is_some()
    }

    /// Number of subscribe attempts so far.
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::Relaxed)
    }

    /// Number of polls so far.
    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::Relaxed)
    }

    /// Fail the next `count` polls with HTTP 503.
    pub fn set_poll_failures(&self, count: u32) {
        self.remaining_poll_failures.store(count, Ordering::Relaxed);
    }

    /// Set simulated poll latency.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_poll_latency(&self, latency: Duration) {
        self.poll_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Fail the next `count` SOS calls with HTTP 503.
    pub fn set_sos_failures(&self, count: u32) {
        self.remaining_sos_failures.store(count, Ordering::Relaxed);
    }

    /// Set simulated SOS latency.
    pub fn set_sos_latency(&self, latency: Duration) {
        self.sos_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of SOS calls so far, failed ones included.
    pub fn sos_attempts(&self) -> u32 {
        self.sos_attempts.load(Ordering::Relaxed)
    }

    /// SOS requests that were acknowledged.
    pub fn sos_requests(&self) -> Vec<SosRequest> {
        self.state().sos_requests.clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn simulate_latency(latency_ms: &AtomicU64) {
        let latency = latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl PushChannel for MockBackend {
    async fn subscribe(&self, topics: &[Topic]) -> Result<PushSubscription> {
        self.subscribe_count.fetch_add(1, Ordering::Relaxed);
        if !self.push_available.load(Ordering::Relaxed) {
            return Err(Error::channel(ChannelFailureReason::SubscribeFailed(
                "mock push unavailable".to_string(),
            )));
        }

        let (feed, subscription) = PushSubscription::channel(32);
        let (alerts, status) = {
            let mut state = self.state();
            state.feed = Some(feed.clone());
            (Value::Object(state.alerts.clone()), state.status.clone())
        };

        // Initial snapshots, as a real subscription delivers on attach.
        if topics.contains(&Topic::Alerts) {
            feed.deliver(PushMessage::decode(Topic::Alerts, &alerts)?)
                .await;
        }
        if topics.contains(&Topic::Status) && !status.is_null() {
            match PushMessage::decode(Topic::Status, &status) {
                Ok(message) => {
                    feed.deliver(message).await;
                }
                Err(e) => debug!("Mock push skipped malformed status: {}", e),
            }
        }

        Ok(subscription)
    }
}

#[async_trait]
impl PullChannel for MockBackend {
    async fn poll(&self) -> Result<PollSnapshot> {
        self.poll_count.fetch_add(1, Ordering::Relaxed);
        Self::simulate_latency(&self.poll_latency_ms).await;

        if Self::take_failure(&self.remaining_poll_failures) {
            return Err(Error::Poll {
                status: Some(503),
                message: "mock poll failure".to_string(),
            });
        }

        let body = {
            let state = self.state();
            let alerts: Vec<Value> = state
                .alerts
                .iter()
                .map(|(id, alert)| {
                    let mut alert = alert.clone();
                    if let Value::Object(fields) = &mut alert {
                        fields
                            .entry("id")
                            .or_insert_with(|| Value::String(id.clone()));
                    }
                    alert
                })
                .collect();
            json!({ "alerts": alerts, "status": state.status })
        };

        Ok(PollSnapshot::from_response(&body)?)
    }
}

#[async_trait]
impl SosEndpoint for MockBackend {
    async fn send_sos(&self, request: &SosRequest) -> Result<SosAck> {
        let attempt = self.sos_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        Self::simulate_latency(&self.sos_latency_ms).await;

        if Self::take_failure(&self.remaining_sos_failures) {
            return Err(Error::Dispatch {
                status: Some(503),
                message: "mock SOS failure".to_string(),
            });
        }

        let body = serde_json::to_value(request)?;
        let id = format!("sos-{}", attempt);
        let alert = json!({
            "type": "sos",
            "message": format!("SOS alert triggered ({})", request.reason),
            "severity": "critical",
            "timestamp": body["timestamp"],
        });

        let alerts = {
            let mut state = self.state();
            state.sos_requests.push(*request);
            state.alerts.insert(id.clone(), alert);
            Value::Object(state.alerts.clone())
        };
        self.deliver(Topic::Alerts, &alerts).await;

        Ok(json!({ "success": true, "id": id }))
    }
}
