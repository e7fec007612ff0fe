//! Realtime fan-out to connected clients.
//!
//! Rooms follow the `customer_{id}` / `restaurant_{id}` / `admin` naming that
//! clients subscribe to. The publisher is fire-and-forget: a dropped push is
//! acceptable because every notification is also persisted and re-fetchable.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Subscription room a realtime event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Customer(Uuid),
    Restaurant(Uuid),
    Admin,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Customer(id) => write!(f, "customer_{id}"),
            Room::Restaurant(id) => write!(f, "restaurant_{id}"),
            Room::Admin => write!(f, "admin"),
        }
    }
}

/// Wire shape of a realtime push.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RealtimeEvent {
    pub event: &'static str,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn order_updated(payload: Value) -> Self {
        Self {
            event: "order_updated",
            payload,
        }
    }

    pub fn new_order(payload: Value) -> Self {
        Self {
            event: "new_order",
            payload,
        }
    }

    pub fn order_cancelled(payload: Value) -> Self {
        Self {
            event: "order_cancelled",
            payload,
        }
    }

    pub fn order_tracking_updated(payload: Value) -> Self {
        Self {
            event: "order_tracking_updated",
            payload,
        }
    }

    pub fn drone_location_update(payload: Value) -> Self {
        Self {
            event: "drone_location_update",
            payload,
        }
    }

    pub fn payment_received(payload: Value) -> Self {
        Self {
            event: "payment_received",
            payload,
        }
    }
}

/// Seam between the services and the realtime transport. The production
/// implementation bridges to a broadcast channel the websocket layer
/// subscribes to; tests swap in [`RecordingPublisher`].
pub trait RealtimePublisher: Send + Sync {
    fn publish(&self, room: Room, event: RealtimeEvent);

    /// Transport hook for subscription endpoints. Publishers without a live
    /// channel return `None` and the endpoint reports the transport as off.
    fn subscribe(&self) -> Option<broadcast::Receiver<RoomMessage>> {
        None
    }
}

/// Message as seen by a transport subscriber.
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub room: Room,
    pub event: RealtimeEvent,
}

/// Broadcast-channel backed publisher. Lagging or absent subscribers are
/// fine; `broadcast::Sender::send` only errors when nobody listens.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<RoomMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

}

impl RealtimePublisher for BroadcastPublisher {
    fn publish(&self, room: Room, event: RealtimeEvent) {
        debug!(room = %room, event = event.event, "realtime publish");
        let _ = self.tx.send(RoomMessage { room, event });
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RoomMessage>> {
        Some(self.tx.subscribe())
    }
}

/// Publisher that drops everything. Used when no realtime transport is
/// configured.
pub struct NoopPublisher;

impl RealtimePublisher for NoopPublisher {
    fn publish(&self, _room: Room, _event: RealtimeEvent) {}
}

/// Test publisher that records every push for later assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<RoomMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<RoomMessage> {
        std::mem::take(&mut self.messages.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn events_for(&self, room: &Room) -> Vec<RealtimeEvent> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| &m.room == room)
            .map(|m| m.event.clone())
            .collect()
    }
}

impl RealtimePublisher for RecordingPublisher {
    fn publish(&self, room: Room, event: RealtimeEvent) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RoomMessage { room, event });
    }
}
