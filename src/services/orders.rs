use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value as Json;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItem},
    },
    errors::ServiceError,
    services::{catalog::ResolvedLine, pricing::PriceQuote},
};

/// Alphabet for tracking codes: no 0/O/1/I/L so codes survive being read
/// aloud or retyped.
const TRACKING_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const TRACKING_CODE_LEN: usize = 8;
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Input for order creation, already resolved and priced.
pub struct NewOrder {
    pub email: String,
    pub phone: Option<String>,
    pub currency: String,
    pub quote: PriceQuote,
    pub lines: Vec<ResolvedLine>,
    pub payment_method: String,
    pub is_guest: bool,
    pub shipping_address: Option<Json>,
    pub billing_address: Option<Json>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub variant_label: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub tracking_code: String,
    pub email: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub is_guest: bool,
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemResponse>>,
}

/// Source of order numbers and tracking codes. A seam so tests can force
/// collisions; production uses the random generator.
pub trait IdentifierGenerator: Send + Sync {
    fn order_number(&self) -> String;
    fn tracking_code(&self) -> String;
}

struct RandomIdentifiers;

impl IdentifierGenerator for RandomIdentifiers {
    fn order_number(&self) -> String {
        generate_order_number()
    }

    fn tracking_code(&self) -> String {
        generate_tracking_code()
    }
}

/// Persistence for orders and their line snapshots. Creation is atomic: an
/// order row never exists without its items.
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    idgen: Arc<dyn IdentifierGenerator>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            idgen: Arc::new(RandomIdentifiers),
        }
    }

    pub fn with_identifier_generator(
        db: Arc<DatabaseConnection>,
        idgen: Arc<dyn IdentifierGenerator>,
    ) -> Self {
        Self { db, idgen }
    }

    /// Creates the order and its item snapshots in one transaction. Order
    /// number and tracking code are generated here; on an identifier
    /// collision the whole attempt is retried with fresh identifiers, up to
    /// a small bound.
    #[instrument(skip(self, new_order), fields(email = %new_order.email))]
    pub async fn create_order(
        &self,
        new_order: NewOrder,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let quote = &new_order.quote;
        if quote.total != quote.subtotal + quote.tax + quote.shipping - quote.discount {
            return Err(ServiceError::ValidationError(
                "Order totals are inconsistent".to_string(),
            ));
        }
        if new_order.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }

        for attempt in 0..MAX_GENERATION_ATTEMPTS {
            let order_number = self.idgen.order_number();
            let tracking_code = self.idgen.tracking_code();

            let txn = self.db.begin().await?;

            let order_id = Uuid::new_v4();
            let order_model = order::ActiveModel {
                id: Set(order_id),
                order_number: Set(order_number),
                tracking_code: Set(tracking_code),
                customer_id: Set(None),
                email: Set(new_order.email.clone()),
                phone: Set(new_order.phone.clone()),
                currency: Set(new_order.currency.clone()),
                subtotal: Set(quote.subtotal),
                tax: Set(quote.tax),
                shipping: Set(quote.shipping),
                discount: Set(quote.discount),
                total: Set(quote.total),
                status: Set(OrderStatus::Pending),
                payment_status: Set(PaymentStatus::Pending),
                payment_method: Set(new_order.payment_method.clone()),
                payment_reference: Set(None),
                is_guest: Set(new_order.is_guest),
                needs_review: Set(false),
                review_reason: Set(None),
                shipping_address: Set(new_order.shipping_address.clone()),
                billing_address: Set(new_order.billing_address.clone()),
                version: Set(1),
                ..Default::default()
            };
            // Uniqueness is enforced by the database, not by a pre-check: a
            // concurrent checkout committing the same identifiers surfaces
            // here as a unique violation and re-enters the attempt loop.
            let saved = match order_model.insert(&txn).await {
                Ok(saved) => saved,
                Err(e) if is_unique_violation(&e) => {
                    txn.rollback().await?;
                    warn!(attempt, "Order identifier collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut items = Vec::with_capacity(new_order.lines.len());
            for line in &new_order.lines {
                let item = order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_id),
                    product_id: Set(line.product.id),
                    variant_id: Set(line.variant.id),
                    sku: Set(line.variant.sku.clone()),
                    name: Set(line.product.name.clone()),
                    variant_label: Set(Some(line.variant.label.clone())),
                    quantity: Set(line.quantity),
                    unit_price: Set(line.unit_price()),
                    line_total: Set(line.line_total()),
                    image_url: Set(line.product.image_url.clone()),
                    product_slug: Set(Some(line.product.slug.clone())),
                    lead_time_note: Set(line.product.lead_time_note.clone()),
                    ..Default::default()
                };
                items.push(item.insert(&txn).await?);
            }

            txn.commit().await?;

            info!(
                order_id = %saved.id,
                order_number = %saved.order_number,
                total = %saved.total,
                "Order created"
            );
            return Ok((saved, items));
        }

        error!("Exhausted order identifier generation attempts");
        Err(ServiceError::InternalError(
            "Could not allocate a unique order number".to_string(),
        ))
    }

    pub async fn get_order(&self, id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    pub async fn get_by_order_number(&self, order_number: &str) -> Result<order::Model, ServiceError> {
        Order::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Looks up by order number or tracking code.
    pub async fn get_by_reference(&self, reference: &str) -> Result<Option<order::Model>, ServiceError> {
        let order = Order::find()
            .filter(
                Condition::any()
                    .add(order::Column::OrderNumber.eq(reference))
                    .add(order::Column::TrackingCode.eq(reference)),
            )
            .one(self.db.as_ref())
            .await?;
        Ok(order)
    }

    pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(items)
    }

    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(self.db.as_ref(), per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Marks an order for manual review without touching its statuses.
    /// Appends to any existing reason so later flags do not erase earlier
    /// ones.
    pub async fn flag_for_review(&self, order_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        let order = self.get_order(order_id).await?;
        let combined = match &order.review_reason {
            Some(existing) => format!("{}; {}", existing, reason),
            None => reason.to_string(),
        };

        let mut active: order::ActiveModel = order.into();
        active.needs_review = Set(true);
        active.review_reason = Set(Some(combined));
        active.updated_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;

        warn!(order_id = %order_id, reason, "Order flagged for review");
        Ok(())
    }

    /// Links an order to a customer row. Best-effort enrichment after the
    /// ledger upsert; never fails the checkout.
    pub async fn attach_customer(&self, order_id: Uuid, customer_id: Uuid) -> Result<(), ServiceError> {
        let order = self.get_order(order_id).await?;
        let mut active: order::ActiveModel = order.into();
        active.customer_id = Set(Some(customer_id));
        active.updated_at = Set(Some(Utc::now()));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    pub fn model_to_response(
        &self,
        order: order::Model,
        items: Option<Vec<order_item::Model>>,
    ) -> OrderResponse {
        OrderResponse {
            id: order.id,
            order_number: order.order_number,
            tracking_code: order.tracking_code,
            email: order.email,
            currency: order.currency,
            subtotal: order.subtotal,
            tax: order.tax,
            shipping: order.shipping,
            discount: order.discount,
            total: order.total,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            is_guest: order.is_guest,
            needs_review: order.needs_review,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items.map(|items| {
                items
                    .into_iter()
                    .map(|item| OrderItemResponse {
                        id: item.id,
                        sku: item.sku,
                        name: item.name,
                        variant_label: item.variant_label,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        line_total: item.line_total,
                        image_url: item.image_url,
                    })
                    .collect()
            }),
        }
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// `ORD-YYYYMMDD-NNNNNN`; uniqueness is enforced by the unique indexes, not
/// by this function.
fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("ORD-{}-{:06}", date, suffix)
}

fn generate_tracking_code() -> String {
    let mut rng = rand::thread_rng();
    (0..TRACKING_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TRACKING_ALPHABET.len());
            TRACKING_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_shape() {
        let number = generate_order_number();
        assert!(number.starts_with("ORD-"));
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn tracking_code_uses_safe_alphabet() {
        for _ in 0..100 {
            let code = generate_tracking_code();
            assert_eq!(code.len(), TRACKING_CODE_LEN);
            assert!(code.bytes().all(|b| TRACKING_ALPHABET.contains(&b)));
        }
    }
}
