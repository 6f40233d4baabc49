use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::{
    entities::order::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::orders::OrderService,
};

/// Sanitized view for the public tracking endpoint. No internal ids, no
/// review flags, no payment references.
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackedOrder {
    pub order_number: String,
    pub tracking_code: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<TrackedItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackedItem {
    pub name: String,
    pub variant_label: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub image_url: Option<String>,
    pub lead_time_note: Option<String>,
}

/// Unauthenticated order lookup gated on knowing both the reference and the
/// order's email. A wrong email and an unknown reference return the same
/// error, so the endpoint cannot be used to probe which orders exist.
pub struct OrderTracker {
    orders: Arc<OrderService>,
}

const TRACKING_MISS: &str = "Order not found";

impl OrderTracker {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }

    /// Looks up by order number or tracking code, verifying the claimed
    /// email case-insensitively.
    #[instrument(skip(self, claimed_email))]
    pub async fn lookup(
        &self,
        reference: &str,
        claimed_email: &str,
    ) -> Result<TrackedOrder, ServiceError> {
        let reference = reference.trim();
        let claimed_email = claimed_email.trim();
        if reference.is_empty() || claimed_email.is_empty() {
            return Err(ServiceError::ValidationError(
                "Both reference and email are required".to_string(),
            ));
        }

        let order = match self.orders.get_by_reference(reference).await? {
            Some(order) => order,
            None => {
                debug!("Tracking lookup missed");
                return Err(ServiceError::NotFound(TRACKING_MISS.to_string()));
            }
        };

        if !order.email.eq_ignore_ascii_case(claimed_email) {
            debug!(order_id = %order.id, "Tracking lookup email mismatch");
            return Err(ServiceError::NotFound(TRACKING_MISS.to_string()));
        }

        let items = self.orders.get_order_items(order.id).await?;

        Ok(TrackedOrder {
            order_number: order.order_number,
            tracking_code: order.tracking_code,
            status: order.status,
            payment_status: order.payment_status,
            currency: order.currency,
            total: order.total,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| TrackedItem {
                    name: item.name,
                    variant_label: item.variant_label,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                    image_url: item.image_url,
                    lead_time_note: item.lead_time_note,
                })
                .collect(),
        })
    }
}
