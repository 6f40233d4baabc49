use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as Order, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{inventory::InventoryLedger, orders::OrderService},
};

/// How a payment confirmation was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// This confirmation won the flip; stock was decremented.
    Confirmed,
    /// A previous confirmation already won. Safe replay, nothing done.
    AlreadyPaid,
    /// The order was cancelled before the confirmation arrived. The order is
    /// flagged for manual refund review.
    RejectedCancelled,
}

/// Guards every status transition. The two race-sensitive operations,
/// payment confirmation and unpaid-order cancellation, are single-row
/// compare-and-set updates; whoever flips the row first wins and the loser
/// observes zero affected rows.
pub struct OrderStateMachine {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    inventory: Arc<InventoryLedger>,
    event_sender: EventSender,
}

impl OrderStateMachine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        inventory: Arc<InventoryLedger>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            orders,
            inventory,
            event_sender,
        }
    }

    /// Valid fulfillment transitions. Cancellation is allowed from any
    /// non-terminal status; everything else moves strictly forward.
    pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Shipped, Cancelled)
        )
    }

    /// Applies a payment confirmation from the gateway. Idempotent: the flip
    /// to `paid` is a compare-and-set on `payment_status = 'pending'`, so a
    /// replayed webhook finds zero rows and becomes a no-op. Only the winner
    /// decrements inventory and queues the notification.
    #[instrument(skip(self, amount), fields(order_reference))]
    pub async fn confirm_payment(
        &self,
        order_reference: &str,
        provider_reference: &str,
        amount: Decimal,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order = self
            .orders
            .get_by_reference(order_reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let result = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(provider_reference.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            let current = self.orders.get_order(order.id).await?;
            if current.payment_status == PaymentStatus::Paid {
                info!(order_id = %order.id, "Payment confirmation replayed, already paid");
                return Ok(ConfirmationOutcome::AlreadyPaid);
            }

            warn!(order_id = %order.id, "Payment confirmation for a cancelled order");
            self.orders
                .flag_for_review(
                    order.id,
                    "payment confirmation arrived after cancellation, refund required",
                )
                .await?;
            return Ok(ConfirmationOutcome::RejectedCancelled);
        }

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            provider_reference,
            "Payment confirmed"
        );

        if amount != order.total {
            warn!(
                order_id = %order.id,
                expected = %order.total,
                received = %amount,
                "Payment amount mismatch"
            );
            self.orders
                .flag_for_review(
                    order.id,
                    &format!("payment amount mismatch: expected {}, got {}", order.total, amount),
                )
                .await?;
        }

        // Stock moves only after the money did. A shortfall here never
        // unwinds the payment; the order goes to manual review instead.
        let items = self.orders.get_order_items(order.id).await?;
        match self.inventory.decrement_for_order(&items).await {
            Ok(()) => {}
            Err(ServiceError::InsufficientStock(detail)) => {
                error!(order_id = %order.id, detail = %detail, "Stock shortfall on paid order");
                self.orders
                    .flag_for_review(order.id, &format!("insufficient stock after payment: {}", detail))
                    .await?;
                let _ = self
                    .event_sender
                    .send(Event::InventoryShortfall {
                        order_id: order.id,
                        detail,
                    })
                    .await;
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Inventory decrement failed");
                self.orders
                    .flag_for_review(order.id, "inventory decrement failed after payment")
                    .await?;
            }
        }

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentConfirmed {
                order_id: order.id,
                payment_reference: provider_reference.to_string(),
            })
            .await
        {
            error!(order_id = %order.id, error = %e, "Failed to queue payment event");
        }

        Ok(ConfirmationOutcome::Confirmed)
    }

    /// Moves an order to a new fulfillment status. Setting the same status
    /// again is a no-op and emits nothing; an invalid transition is
    /// rejected. An optional new tracking code may ride along with the
    /// update.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        tracking_code: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order = self.orders.get_order(order_id).await?;

        let tracking_changed = tracking_code
            .as_deref()
            .map(|code| code != order.tracking_code)
            .unwrap_or(false);

        if order.status == new_status && !tracking_changed {
            return Ok(order);
        }

        self.apply_transition(&order, new_status, tracking_code).await
    }

    /// Applies a transition against an observed row. The write is guarded on
    /// the observed `version` and status, so two updates validated against
    /// the same read cannot both land; the loser gets `Conflict` and must
    /// re-read.
    pub async fn apply_transition(
        &self,
        observed: &order::Model,
        new_status: OrderStatus,
        tracking_code: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let old_status = observed.status;
        let tracking_changed = tracking_code
            .as_deref()
            .map(|code| code != observed.tracking_code)
            .unwrap_or(false);

        if old_status != new_status && !Self::is_valid_transition(old_status, new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move order from {} to {}",
                old_status, new_status
            )));
        }

        let mut update = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );
        if let Some(code) = &tracking_code {
            update = update.col_expr(order::Column::TrackingCode, Expr::value(code.clone()));
        }

        let result = update
            .filter(order::Column::Id.eq(observed.id))
            .filter(order::Column::Version.eq(observed.version))
            .filter(order::Column::Status.eq(old_status))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %observed.id, "Concurrent modification during status update");
            return Err(ServiceError::Conflict(
                "Order was modified concurrently, retry with fresh state".to_string(),
            ));
        }

        info!(
            order_id = %observed.id,
            from = %old_status,
            to = %new_status,
            "Order status updated"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id: observed.id,
                old_status,
                new_status,
                tracking_changed,
            })
            .await
        {
            error!(order_id = %observed.id, error = %e, "Failed to queue status event");
        }

        self.orders.get_order(observed.id).await
    }

    /// Cancels an order only while it is still pending and unpaid. The guard
    /// is the same compare-and-set shape as payment confirmation, so a
    /// payment that lands first always wins the race against a timeout
    /// cancellation. Returns whether this call performed the cancellation.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_if_unpaid(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            info!(order_id = %order_id, "Cancellation skipped, order no longer pending and unpaid");
            return Ok(false);
        }

        info!(order_id = %order_id, "Unpaid order cancelled");
        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: OrderStatus::Pending,
                new_status: OrderStatus::Cancelled,
                tracking_changed: false,
            })
            .await
        {
            error!(order_id = %order_id, error = %e, "Failed to queue cancellation event");
        }

        Ok(true)
    }

    /// Cancels every order that has been pending and unpaid since before the
    /// cutoff. Each candidate goes through the guarded cancel, so an order
    /// paid between the scan and the cancel survives. Returns the number
    /// actually cancelled.
    #[instrument(skip(self))]
    pub async fn reap_abandoned(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        let candidates: Vec<Uuid> = Order::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut cancelled = 0u64;
        for order_id in candidates {
            if self.cancel_if_unpaid(order_id).await? {
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            info!(cancelled, "Abandoned orders reaped");
        }
        Ok(cancelled)
    }

    /// Queues a payment reminder for an order that is still awaiting
    /// payment.
    pub async fn send_payment_reminder(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        if order.payment_status != PaymentStatus::Pending
            || order.status != OrderStatus::Pending
        {
            return Err(ServiceError::InvalidOperation(
                "Order is not awaiting payment".to_string(),
            ));
        }

        self.event_sender
            .send(Event::PaymentReminder(order_id))
            .await
            .map_err(ServiceError::EventError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Processing, true)]
    #[case(OrderStatus::Processing, OrderStatus::Shipped, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Delivered, true)]
    #[case(OrderStatus::Pending, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Processing, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Shipped, OrderStatus::Cancelled, true)]
    #[case(OrderStatus::Pending, OrderStatus::Shipped, false)]
    #[case(OrderStatus::Pending, OrderStatus::Delivered, false)]
    #[case(OrderStatus::Shipped, OrderStatus::Processing, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Cancelled, OrderStatus::Processing, false)]
    #[case(OrderStatus::Delivered, OrderStatus::Shipped, false)]
    fn transition_table(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(OrderStateMachine::is_valid_transition(from, to), allowed);
    }
}
