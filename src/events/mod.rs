pub mod realtime;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Domain events emitted by the services after a state change commits.
/// Consumers (the event loop, realtime fan-out) must tolerate replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        restaurant_id: Uuid,
        total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    PaymentReceived {
        order_id: Uuid,
        transaction_id: String,
        provider: String,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Uuid,
        provider: String,
        reason: String,
    },
    DroneDispatched {
        order_id: Uuid,
        drone_id: Uuid,
        estimated_arrival: DateTime<Utc>,
    },
    OrdersSwept {
        deleted: u64,
    },
}

/// Cloneable handle the services use to publish events. Sends are
/// fire-and-forget; a full or closed channel is logged and dropped rather
/// than failing the request that produced the event.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: Event) {
        if let Err(e) = self.tx.send(event).await {
            error!("failed to publish event: {}", e);
        }
    }
}

pub fn event_channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drain the event channel, logging each event. Runs until every sender is
/// dropped, which happens during graceful shutdown.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id, total, ..
            } => {
                info!(%order_id, %total, "order created");
            }
            Event::OrderStatusChanged { order_id, from, to } => {
                info!(%order_id, from = from.as_str(), to = to.as_str(), "order status changed");
            }
            Event::OrderCancelled { order_id, .. } => {
                info!(%order_id, "order cancelled");
            }
            Event::PaymentReceived {
                order_id,
                transaction_id,
                provider,
                amount,
            } => {
                info!(%order_id, %transaction_id, provider, %amount, "payment received");
            }
            Event::PaymentFailed {
                order_id,
                provider,
                reason,
            } => {
                info!(%order_id, provider, reason, "payment failed");
            }
            Event::DroneDispatched {
                order_id, drone_id, ..
            } => {
                info!(%order_id, %drone_id, "drone dispatched");
            }
            Event::OrdersSwept { deleted } => {
                debug!(deleted, "expired orders swept");
            }
        }
    }
    info!("event processor stopped");
}
