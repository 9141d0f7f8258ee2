//! Monitor event system.
//!
//! Every state change the monitor applies is also broadcast as a
//! [`MonitorEvent`], so consumers can react to changes instead of diffing
//! snapshots. Lagging receivers lose old events but the
//! [`MonitorSnapshot`](crate::MonitorSnapshot) watch always has the latest
//! state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use helmwatch_types::{AlertRecord, ConnectionHealth, DispatchReason, StatusSnapshot};

use crate::emergency::{Episode, Resolution};

/// Events emitted by the monitor.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum MonitorEvent {
    /// Connection health changed.
    HealthChanged {
        from: ConnectionHealth,
        to: ConnectionHealth,
    },
    /// A new status snapshot replaced the previous one.
    StatusUpdated { status: StatusSnapshot },
    /// The alert log changed.
    AlertsUpdated {
        count: usize,
        newest: Option<AlertRecord>,
    },
    /// The emergency episode changed state or its countdown moved.
    EpisodeChanged { episode: Episode },
    /// An episode finished.
    EpisodeResolved { episode: u64, resolution: Resolution },
    /// The SOS call was acknowledged by the backend.
    DispatchSucceeded { episode: u64, reason: DispatchReason },
    /// The SOS call failed after all retries. The episode stays in
    /// `dispatching` until a manual SOS succeeds.
    DispatchFailed {
        episode: u64,
        reason: DispatchReason,
        error: String,
    },
}

/// Sender for monitor events.
pub type EventSender = broadcast::Sender<MonitorEvent>;

/// Receiver for monitor events.
pub type EventReceiver = broadcast::Receiver<MonitorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: MonitorEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
