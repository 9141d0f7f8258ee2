//! Trait abstractions for the backend channels.
//!
//! The monitor only talks to the backend through these three traits, so the
//! real WebSocket/HTTP clients and [`crate::MockBackend`] are interchangeable.

use async_trait::async_trait;

use crate::dispatcher::{SosAck, SosRequest};
use crate::error::Result;
use crate::pull::PollSnapshot;
use crate::push::{PushSubscription, Topic};

/// A real-time feed of full-topic snapshots.
///
/// Implementations must not retry on their own: a failed subscribe returns an
/// error, and a subscription that breaks delivers one final `Err` and ends.
/// Resubscribing is the monitor's job.
///
/// # Example
///
/// ```ignore
/// use helmwatch_core::{PushChannel, Topic};
/// use futures::StreamExt;
///
/// async fn first_delivery<P: PushChannel>(push: &P) {
///     let mut sub = push.subscribe(&Topic::ALL).await.unwrap();
///     if let Some(Ok(message)) = sub.next().await {
///         println!("{:?}", message);
///     }
/// }
/// ```
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a subscription for the given topics.
    async fn subscribe(&self, topics: &[Topic]) -> Result<PushSubscription>;
}

/// A request/response source for the same data the push channel carries.
#[async_trait]
pub trait PullChannel: Send + Sync {
    /// Perform one round trip.
    ///
    /// Implementations should bound the request with a timeout; the poll
    /// loop also applies its own.
    async fn poll(&self) -> Result<PollSnapshot>;
}

/// The backend endpoint that receives emergency notifications.
#[async_trait]
pub trait SosEndpoint: Send + Sync {
    /// Send one SOS notification and return the backend's acknowledgment.
    async fn send_sos(&self, request: &SosRequest) -> Result<SosAck>;
}
