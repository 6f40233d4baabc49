use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{CartLine, ProductResolver},
        customers::{CheckoutContact, CustomerLedger},
        orders::{NewOrder, OrderResponse, OrderService},
        payments::PaymentGateway,
        pricing::PricingEngine,
    },
};

/// Payment methods a checkout can choose. Only `gateway` involves the
/// external provider; the others complete immediately and collect payment
/// out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Gateway,
    CashOnDelivery,
    BankTransfer,
}

impl PaymentMethod {
    pub fn requires_gateway(self) -> bool {
        matches!(self, Self::Gateway)
    }
}

/// Checkout submission from the storefront.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Cart cannot be empty"))]
    #[validate]
    pub items: Vec<CartLine>,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub payment_method: PaymentMethod,
    pub shipping_address: Option<Json>,
    pub billing_address: Option<Json>,
    pub discount: Option<Decimal>,
    /// Present when the storefront session is authenticated; absent for
    /// guest checkout.
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutOutcome {
    pub order: OrderResponse,
    /// Set only for gateway payments; the storefront must redirect here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_redirect_url: Option<String>,
}

/// Orchestrates a checkout submission end to end: resolve, price, persist,
/// enrich the customer ledger, then branch on the payment method.
pub struct CheckoutService {
    resolver: Arc<ProductResolver>,
    pricing: PricingEngine,
    orders: Arc<OrderService>,
    customers: Arc<CustomerLedger>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    event_sender: EventSender,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        resolver: Arc<ProductResolver>,
        pricing: PricingEngine,
        orders: Arc<OrderService>,
        customers: Arc<CustomerLedger>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        event_sender: EventSender,
        currency: String,
    ) -> Self {
        Self {
            resolver,
            pricing,
            orders,
            customers,
            gateway,
            event_sender,
            currency,
        }
    }

    /// Submits a checkout. The order row and its items are committed before
    /// any external call; a gateway failure leaves a pending order behind
    /// that can be paid later or reaped by the timeout.
    #[instrument(skip(self, request), fields(email = %request.email, method = %request.payment_method))]
    pub async fn submit(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;

        if request.payment_method.requires_gateway() && self.gateway.is_none() {
            return Err(ServiceError::InvalidOperation(
                "Gateway payments are not available".to_string(),
            ));
        }

        let resolved = self.resolver.resolve_lines(&request.items).await?;
        let quote = self
            .pricing
            .quote(&resolved, request.discount.unwrap_or(Decimal::ZERO));

        let is_guest = request.account_id.is_none();
        let (order, items) = self
            .orders
            .create_order(NewOrder {
                email: request.email.trim().to_lowercase(),
                phone: request.phone.clone(),
                currency: self.currency.clone(),
                quote,
                lines: resolved,
                payment_method: request.payment_method.to_string(),
                is_guest,
                shipping_address: request.shipping_address,
                billing_address: request.billing_address,
            })
            .await?;

        // Ledger enrichment is best-effort: the order already exists and a
        // ledger hiccup must not undo it.
        match self
            .customers
            .upsert_from_checkout(CheckoutContact {
                email: order.email.clone(),
                phone: request.phone,
                first_name: request.first_name,
                last_name: request.last_name,
                account_id: request.account_id,
                address: order.shipping_address.clone(),
            })
            .await
        {
            Ok(customer) => {
                if let Err(e) = self.orders.attach_customer(order.id, customer.id).await {
                    warn!(order_id = %order.id, error = %e, "Failed to link customer to order");
                }
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Customer ledger upsert failed");
            }
        }

        let payment_redirect_url = if request.payment_method.requires_gateway() {
            let gateway = self.gateway.as_ref().ok_or_else(|| {
                ServiceError::InvalidOperation("Gateway payments are not available".to_string())
            })?;
            let redirect = gateway
                .initiate(&order.order_number, order.total, &order.currency, &order.email)
                .await?;
            Some(redirect.redirect_url)
        } else {
            // No gateway round trip; the order is final now and the created
            // notice goes out immediately.
            if let Err(e) = self.event_sender.send(Event::OrderCreated(order.id)).await {
                warn!(order_id = %order.id, error = %e, "Failed to queue created event");
            }
            None
        };

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            redirect = payment_redirect_url.is_some(),
            "Checkout completed"
        );

        let response = self.orders.model_to_response(order, Some(items));
        Ok(CheckoutOutcome {
            order: response,
            payment_redirect_url,
        })
    }
}
