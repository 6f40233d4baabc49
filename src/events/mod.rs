use std::sync::Arc;

use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    entities::order::{Entity as OrderEntity, OrderStatus, PaymentStatus},
    services::notifications::NotificationDispatcher,
};

/// Events emitted by the order lifecycle. The mpsc channel carrying them is
/// the bounded queue that keeps notification delivery off the request path:
/// senders never wait for delivery, and a failed dispatch is logged by the
/// worker, never propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
        tracking_changed: bool,
    },
    PaymentConfirmed {
        order_id: Uuid,
        payment_reference: String,
    },
    PaymentReminder(Uuid),
    InventoryShortfall {
        order_id: Uuid,
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background worker draining the event channel and driving the notification
/// dispatcher. Runs until every sender is dropped.
pub async fn process_events(
    mut receiver: mpsc::Receiver<Event>,
    db: Arc<DatabaseConnection>,
    dispatcher: Arc<NotificationDispatcher>,
) {
    info!("Event processor started");

    while let Some(event) = receiver.recv().await {
        handle_event(&db, &dispatcher, event).await;
    }

    info!("Event processor stopped: channel closed");
}

async fn handle_event(
    db: &DatabaseConnection,
    dispatcher: &NotificationDispatcher,
    event: Event,
) {
    let order_id = match &event {
        Event::OrderCreated(id)
        | Event::PaymentReminder(id)
        | Event::OrderStatusChanged { order_id: id, .. }
        | Event::PaymentConfirmed { order_id: id, .. }
        | Event::InventoryShortfall { order_id: id, .. } => *id,
    };

    let order = match OrderEntity::find_by_id(order_id).one(db).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            warn!(order_id = %order_id, "Dropping event for unknown order");
            return;
        }
        Err(e) => {
            warn!(error = %e, order_id = %order_id, "Failed to load order for event");
            return;
        }
    };

    match event {
        Event::OrderCreated(_) => {
            dispatcher.notify_created(&order).await;
        }
        Event::OrderStatusChanged {
            old_status,
            new_status,
            tracking_changed,
            ..
        } => {
            dispatcher
                .notify_status_change(
                    &order,
                    Some(old_status.to_string()),
                    new_status.to_string(),
                    tracking_changed,
                )
                .await;
        }
        Event::PaymentConfirmed { .. } => {
            dispatcher
                .notify_status_change(
                    &order,
                    Some(PaymentStatus::Pending.to_string()),
                    PaymentStatus::Paid.to_string(),
                    false,
                )
                .await;
        }
        Event::PaymentReminder(_) => {
            dispatcher.notify_payment_reminder(&order).await;
        }
        Event::InventoryShortfall { detail, .. } => {
            // Operational signal only; the order is already flagged for
            // review by the state machine.
            warn!(order_id = %order_id, detail = %detail, "Inventory shortfall after payment");
        }
    }
}
