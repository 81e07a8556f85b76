use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::{Execution, Order};

/// Order lifecycle notifications published by the broker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    OrderCreated { order: Order },
    OrderResting { order_id: String, note: Option<String> },
    OrderFilled { execution: Execution },
    OrderRejected { order_id: String, reason: String },
    OrderCancelled { order_id: String },
    OrderExpired { order_id: String },
}

impl BrokerEvent {
    pub fn order_id(&self) -> &str {
        match self {
            BrokerEvent::OrderCreated { order } => &order.id,
            BrokerEvent::OrderFilled { execution } => &execution.order_id,
            BrokerEvent::OrderResting { order_id, .. }
            | BrokerEvent::OrderRejected { order_id, .. }
            | BrokerEvent::OrderCancelled { order_id }
            | BrokerEvent::OrderExpired { order_id } => order_id,
        }
    }
}

/// Fan-out sender; publishing without subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: BrokerEvent) {
        if self.tx.send(event).is_err() {
            trace!("no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.tx.subscribe()
    }
}
