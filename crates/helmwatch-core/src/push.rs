//! Push channel subscriptions.
//!
//! A [`PushSubscription`] is the consumer side of a live feed: a stream of
//! already-normalized [`PushMessage`]s. A channel implementation holds the
//! matching [`PushFeed`] and writes into it from a background task.
//!
//! Dropping or [unsubscribing](PushSubscription::unsubscribe) cancels the
//! feed's token so the background task can close its transport.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use helmwatch_types::{AlertRecord, StatusSnapshot, normalize_alert_map, parse_status};

use crate::error::{ChannelFailureReason, Error, Result};
use crate::traits::PushChannel;

/// Logical topics of the push feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The alert collection, keyed by record id.
    Alerts,
    /// The single device-status object.
    Status,
}

impl Topic {
    /// Both topics, in subscription order.
    pub const ALL: [Topic; 2] = [Topic::Alerts, Topic::Status];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Alerts => "alerts",
            Topic::Status => "status",
        }
    }

    /// Look up a topic by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "alerts" => Some(Topic::Alerts),
            "status" => Some(Topic::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized delivery from the push channel.
///
/// Every delivery replaces the whole topic: `Alerts` carries the full
/// collection, newest-first and capped, not a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Full contents of the alerts topic.
    Alerts(Vec<AlertRecord>),
    /// Full contents of the status topic.
    Status(StatusSnapshot),
}

impl PushMessage {
    /// Normalize a raw topic payload.
    ///
    /// Malformed records inside an alerts payload are dropped; a payload of
    /// the wrong overall shape is an error.
    pub fn decode(topic: Topic, data: &Value) -> Result<Self> {
        match topic {
            Topic::Alerts => Ok(PushMessage::Alerts(normalize_alert_map(data)?.records)),
            Topic::Status => Ok(PushMessage::Status(parse_status(data)?)),
        }
    }

    /// The topic this message belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            PushMessage::Alerts(_) => Topic::Alerts,
            PushMessage::Status(_) => Topic::Status,
        }
    }
}

/// Result type for subscription items. An `Err` is a fatal channel signal.
pub type PushItem = std::result::Result<PushMessage, Error>;

/// The producer half of a subscription, held by the channel implementation.
#[derive(Debug, Clone)]
pub struct PushFeed {
    sender: mpsc::Sender<PushItem>,
    cancel_token: CancellationToken,
}

impl PushFeed {
    /// Deliver a message. Returns `false` once the subscriber is gone.
    pub async fn deliver(&self, message: PushMessage) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        self.sender.send(Ok(message)).await.is_ok()
    }

    /// Deliver the final fatal signal. The subscriber sees the stream end
    /// right after it.
    pub async fn fail(self, reason: ChannelFailureReason) {
        if !self.cancel_token.is_cancelled() {
            let _ = self.sender.send(Err(Error::channel(reason))).await;
        }
        self.cancel_token.cancel();
    }

    /// Resolves when the subscriber unsubscribes or drops the subscription.
    pub fn unsubscribed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }

    /// Whether the subscriber has gone away.
    pub fn is_unsubscribed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

/// A live push subscription.
///
/// Yields normalized messages; a single `Err` followed by the end of the
/// stream signals that the channel failed.
#[derive(Debug)]
pub struct PushSubscription {
    receiver: mpsc::Receiver<PushItem>,
    cancel_token: CancellationToken,
}

impl PushSubscription {
    /// Create a connected feed/subscription pair.
    pub fn channel(buffer_size: usize) -> (PushFeed, PushSubscription) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let cancel_token = CancellationToken::new();
        (
            PushFeed {
                sender,
                cancel_token: cancel_token.clone(),
            },
            PushSubscription {
                receiver,
                cancel_token,
            },
        )
    }

    /// Stop receiving. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if !self.cancel_token.is_cancelled() {
            debug!("Unsubscribing from push channel");
            self.cancel_token.cancel();
        }
        self.receiver.close();
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has been called.
    pub fn is_unsubscribed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for PushSubscription {
    type Item = PushItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// A push channel that is never available.
///
/// Used when no push endpoint is configured: every subscribe fails, so the
/// monitor runs on the pull channel and keeps retrying on schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPush;

#[async_trait]
impl PushChannel for DisabledPush {
    async fn subscribe(&self, _topics: &[Topic]) -> Result<PushSubscription> {
        Err(Error::channel(ChannelFailureReason::Disabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use helmwatch_types::{AlertKind, FatigueLevel};
    use serde_json::json;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::from_name("alerts"), Some(Topic::Alerts));
        assert_eq!(Topic::from_name("status"), Some(Topic::Status));
        assert_eq!(Topic::from_name("location"), None);
        assert_eq!(Topic::Status.to_string(), "status");
    }

    #[test]
    fn test_decode_alerts_topic() {
        let message = PushMessage::decode(
            Topic::Alerts,
            &json!({
                "a": {"type": "fatigue", "message": "Tired", "timestamp": "2025-03-01T12:00:00Z"},
                "b": {"type": "sos", "message": "SOS", "timestamp": "2025-03-01T12:01:00Z"},
            }),
        )
        .unwrap();

        let PushMessage::Alerts(records) = message else {
            panic!("expected alerts");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, AlertKind::Sos);
    }

    #[test]
    fn test_decode_status_topic() {
        let message = PushMessage::decode(Topic::Status, &json!({"fatigue": "critical"})).unwrap();
        assert_eq!(message.topic(), Topic::Status);
        let PushMessage::Status(status) = message else {
            panic!("expected status");
        };
        assert_eq!(status.fatigue, FatigueLevel::Critical);

        assert!(PushMessage::decode(Topic::Status, &json!({"helmet": 1})).is_err());
    }

    #[tokio::test]
    async fn test_subscription_delivers_then_fails() {
        let (feed, mut sub) = PushSubscription::channel(4);
        assert!(
            feed.deliver(PushMessage::Status(StatusSnapshot::default()))
                .await
        );
        feed.fail(ChannelFailureReason::Closed).await;

        assert!(matches!(sub.next().await, Some(Ok(PushMessage::Status(_)))));
        assert!(matches!(sub.next().await, Some(Err(Error::Channel { .. }))));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (feed, mut sub) = PushSubscription::channel(4);
        sub.unsubscribe();
        sub.unsubscribe();

        assert!(sub.is_unsubscribed());
        assert!(feed.is_unsubscribed());
        assert!(!feed.deliver(PushMessage::Alerts(Vec::new())).await);
        feed.unsubscribed().await;
    }

    #[tokio::test]
    async fn test_drop_cancels_feed() {
        let (feed, sub) = PushSubscription::channel(1);
        drop(sub);
        assert!(feed.is_unsubscribed());
    }

    #[tokio::test]
    async fn test_disabled_push_always_fails() {
        let err = DisabledPush.subscribe(&Topic::ALL).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Channel {
                reason: ChannelFailureReason::Disabled
            }
        ));
    }
}
