//! Connection event system.
//!
//! State snapshots are published through a `watch` channel (see
//! [`ConnectionManager::subscribe_state`](crate::ConnectionManager::subscribe_state)).
//! This module carries the discrete happenings that a snapshot cannot
//! express, most importantly notification payloads.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use gattscope_types::DeviceInfo;

/// Events emitted by the connection manager.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// A device request was handed to the host.
    ScanStarted,
    /// The host returned a device.
    DeviceSelected { device: DeviceInfo },
    /// A GATT session was opened.
    Connected { device: DeviceInfo },
    /// Services were enumerated.
    ServicesDiscovered {
        device_id: String,
        services: usize,
        characteristics: usize,
    },
    /// A subscribed characteristic pushed a value.
    Notification {
        device_id: String,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        /// The value rendered by the payload codec.
        text: String,
    },
    /// The GATT session closed.
    Disconnected {
        device_id: String,
        reason: DisconnectReason,
    },
    /// An operation failed; `message` is what landed in the error slot.
    Error { message: String },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserRequested,
    /// The host reported the link as closed.
    LinkLost,
    /// A new connection replaced the session.
    Replaced,
}

/// Receiver for connection events.
pub type EventReceiver = broadcast::Receiver<ConnectionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ConnectionEvent) {
        // No receivers is fine
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_to_subscribers() {
        let events = EventDispatcher::default();
        let mut rx = events.subscribe();
        assert_eq!(events.receiver_count(), 1);

        events.send(ConnectionEvent::ScanStarted);
        assert!(matches!(rx.recv().await.unwrap(), ConnectionEvent::ScanStarted));

        drop(rx);
        assert_eq!(events.receiver_count(), 0);
        events.send(ConnectionEvent::ScanStarted);
    }

    #[test]
    fn test_event_serialization() {
        let event = ConnectionEvent::Disconnected {
            device_id: "AA".into(),
            reason: DisconnectReason::LinkLost,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"disconnected\""));
        assert!(json.contains("LinkLost"));
    }
}
