//! WebSocket push channel.
//!
//! Wire protocol, one JSON object per text frame:
//!
//! ```text
//! client -> {"type":"subscribe","topics":["alerts","status"]}
//! server -> {"topic":"alerts","data":{"<id>":{...},...}}
//! server -> {"topic":"status","data":{...}}
//! server -> {"type":"error","message":"..."}
//! ```
//!
//! An error frame, a close frame, a transport error or the end of the
//! stream is fatal: the subscription yields one `Err` and ends. Frames for
//! unknown topics are ignored and malformed frames are dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ChannelFailureReason, Error, Result};
use crate::push::{PushFeed, PushMessage, PushSubscription, Topic};
use crate::traits::PushChannel;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const FEED_BUFFER: usize = 16;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push channel over a WebSocket.
///
/// Each [`subscribe`](PushChannel::subscribe) opens its own connection and
/// never reconnects.
#[derive(Debug, Clone)]
pub struct WsPushChannel {
    url: String,
    connect_timeout: Duration,
}

impl WsPushChannel {
    /// Create a channel for a `ws://` or `wss://` URL.
    pub fn new(url: &str) -> Result<Self> {
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::invalid_config(format!(
                "URL must start with ws:// or wss://, got: {}",
                url
            )));
        }
        Ok(Self {
            url: url.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn subscribe(&self, topics: &[Topic]) -> Result<PushSubscription> {
        debug!("Connecting to push endpoint {}", self.url);
        let (mut socket, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::channel(ChannelFailureReason::Timeout))?
            .map_err(|e| Error::channel(ChannelFailureReason::SubscribeFailed(e.to_string())))?;

        let names: Vec<&str> = topics.iter().map(Topic::as_str).collect();
        let request = json!({ "type": "subscribe", "topics": names });
        socket.send(Message::Text(request.to_string())).await?;

        info!("Subscribed to {:?} on {}", names, self.url);
        let (feed, subscription) = PushSubscription::channel(FEED_BUFFER);
        tokio::spawn(read_frames(socket, feed));
        Ok(subscription)
    }
}

/// What to do with one text frame.
#[derive(Debug, PartialEq)]
enum Frame {
    Deliver(PushMessage),
    Fatal(ChannelFailureReason),
    Ignore,
}

fn decode_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping unparseable push frame: {}", e);
            return Frame::Ignore;
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("error") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Frame::Fatal(ChannelFailureReason::ServerError(message.to_string()));
    }

    let Some(name) = value.get("topic").and_then(Value::as_str) else {
        warn!("Dropping push frame without a topic");
        return Frame::Ignore;
    };
    let Some(topic) = Topic::from_name(name) else {
        debug!("Ignoring frame for unknown topic '{}'", name);
        return Frame::Ignore;
    };

    let data = value.get("data").unwrap_or(&Value::Null);
    match PushMessage::decode(topic, data) {
        Ok(message) => Frame::Deliver(message),
        Err(e) => {
            warn!("Dropping malformed {} frame: {}", topic, e);
            Frame::Ignore
        }
    }
}

async fn read_frames(mut socket: Socket, feed: PushFeed) {
    loop {
        tokio::select! {
            _ = feed.unsubscribed() => {
                debug!("Push subscription dropped, closing socket");
                let _ = socket.close(None).await;
                return;
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Frame::Deliver(message) => {
                        if !feed.deliver(message).await {
                            let _ = socket.close(None).await;
                            return;
                        }
                    }
                    Frame::Fatal(reason) => {
                        warn!("Push endpoint reported {}", reason);
                        feed.fail(reason).await;
                        let _ = socket.close(None).await;
                        return;
                    }
                    Frame::Ignore => {}
                },
                Some(Ok(Message::Close(close))) => {
                    debug!("Push endpoint closed the socket: {:?}", close);
                    feed.fail(ChannelFailureReason::Closed).await;
                    return;
                }
                // Ping/Pong handled by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    feed.fail(ChannelFailureReason::Transport(e.to_string())).await;
                    return;
                }
                None => {
                    feed.fail(ChannelFailureReason::Closed).await;
                    return;
                }
            }
        }
    }
}
