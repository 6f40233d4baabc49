use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{entities::order, errors::ServiceError};

/// What a notification is about. The kind participates in the dedupe key, so
/// a created notice never suppresses a later status notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    StatusChanged,
    PaymentReminder,
}

/// Rendered message handed to every channel.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub email: String,
    pub phone: Option<String>,
    pub order_number: String,
    pub tracking_code: String,
    pub subject: String,
    pub body: String,
}

/// Delivery seam. Channels are independent: a failure in one never blocks
/// another, and never propagates past the dispatcher.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), ServiceError>;
}

/// Primary channel: posts to an email relay endpoint, or logs only when no
/// endpoint is configured (development mode).
pub struct EmailChannel {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl EmailChannel {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), ServiceError> {
        match &self.endpoint {
            Some(endpoint) => {
                self.client
                    .post(endpoint)
                    .json(message)
                    .send()
                    .await
                    .map_err(|e| {
                        ServiceError::ExternalServiceError(format!("email relay: {}", e))
                    })?
                    .error_for_status()
                    .map_err(|e| {
                        ServiceError::ExternalServiceError(format!("email relay: {}", e))
                    })?;
                Ok(())
            }
            None => {
                info!(
                    to = %message.email,
                    order_number = %message.order_number,
                    kind = %message.kind,
                    "Email notification (no relay configured, log only)"
                );
                Ok(())
            }
        }
    }
}

/// Secondary channel. The dispatcher only invokes it when the order carries a
/// phone number.
pub struct SmsChannel {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl SmsChannel {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), ServiceError> {
        match &self.endpoint {
            Some(endpoint) => {
                self.client
                    .post(endpoint)
                    .json(message)
                    .send()
                    .await
                    .map_err(|e| ServiceError::ExternalServiceError(format!("sms relay: {}", e)))?
                    .error_for_status()
                    .map_err(|e| {
                        ServiceError::ExternalServiceError(format!("sms relay: {}", e))
                    })?;
                Ok(())
            }
            None => {
                info!(
                    order_number = %message.order_number,
                    kind = %message.kind,
                    "SMS notification (no relay configured, log only)"
                );
                Ok(())
            }
        }
    }
}

/// Fans one order event out to the channels, with per-process dedupe so a
/// replayed event never re-notifies the customer. The dedupe key combines
/// order, kind and the state being announced.
pub struct NotificationDispatcher {
    primary: Arc<dyn NotificationChannel>,
    secondary: Option<Arc<dyn NotificationChannel>>,
    sent: DashMap<(Uuid, String), ()>,
}

impl NotificationDispatcher {
    pub fn new(
        primary: Arc<dyn NotificationChannel>,
        secondary: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            primary,
            secondary,
            sent: DashMap::new(),
        }
    }

    pub async fn notify_created(&self, order: &order::Model) {
        let subject = format!("Order {} received", order.order_number);
        let body = format!(
            "Thanks for your order {}. Track it with code {}.",
            order.order_number, order.tracking_code
        );
        self.dispatch(order, NotificationKind::Created, "created".to_string(), subject, body)
            .await;
    }

    /// Announces a status value. Suppressed when the status did not actually
    /// change, unless the tracking code changed alongside it.
    pub async fn notify_status_change(
        &self,
        order: &order::Model,
        previous: Option<String>,
        current: String,
        tracking_changed: bool,
    ) {
        if !tracking_changed && previous.as_deref() == Some(current.as_str()) {
            debug!(
                order_number = %order.order_number,
                status = %current,
                "Suppressing no-op status notification"
            );
            return;
        }

        let subject = format!("Order {} update: {}", order.order_number, current);
        let body = format!(
            "Your order {} is now {}. Tracking code: {}.",
            order.order_number, current, order.tracking_code
        );
        let dedupe = format!("{}:{}", current, order.tracking_code);
        self.dispatch(order, NotificationKind::StatusChanged, dedupe, subject, body)
            .await;
    }

    pub async fn notify_payment_reminder(&self, order: &order::Model) {
        let subject = format!("Payment reminder for order {}", order.order_number);
        let body = format!(
            "Order {} is awaiting payment and will be cancelled if it stays unpaid.",
            order.order_number
        );
        self.dispatch(
            order,
            NotificationKind::PaymentReminder,
            "reminder".to_string(),
            subject,
            body,
        )
        .await;
    }

    #[instrument(skip(self, order, subject, body), fields(order_number = %order.order_number, kind = %kind))]
    async fn dispatch(
        &self,
        order: &order::Model,
        kind: NotificationKind,
        dedupe: String,
        subject: String,
        body: String,
    ) {
        let key = (order.id, format!("{}:{}", kind, dedupe));
        if self.sent.insert(key, ()).is_some() {
            debug!("Duplicate notification suppressed");
            return;
        }

        let message = NotificationMessage {
            kind,
            email: order.email.clone(),
            phone: order.phone.clone(),
            order_number: order.order_number.clone(),
            tracking_code: order.tracking_code.clone(),
            subject,
            body,
        };

        if let Err(e) = self.primary.deliver(&message).await {
            warn!(channel = self.primary.name(), error = %e, "Notification delivery failed");
        }

        // Secondary channel needs a phone number to address; skip otherwise.
        if message.phone.is_some() {
            if let Some(secondary) = &self.secondary {
                if let Err(e) = secondary.deliver(&message).await {
                    warn!(channel = secondary.name(), error = %e, "Notification delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    use crate::entities::order::{OrderStatus, PaymentStatus};

    struct Recorder {
        name: &'static str,
        deliveries: Mutex<Vec<NotificationMessage>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                deliveries: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                deliveries: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn count(&self) -> usize {
            self.deliveries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationChannel for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn deliver(&self, message: &NotificationMessage) -> Result<(), ServiceError> {
            if self.fail {
                return Err(ServiceError::ExternalServiceError("relay down".into()));
            }
            self.deliveries.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn sample_order(phone: Option<&str>) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-20260829-123456".to_string(),
            tracking_code: "AB23CD45".to_string(),
            customer_id: None,
            email: "jo@example.com".to_string(),
            phone: phone.map(String::from),
            currency: "USD".to_string(),
            subtotal: dec!(20.00),
            tax: dec!(0.00),
            shipping: dec!(0.00),
            discount: dec!(0.00),
            total: dec!(20.00),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: "gateway".to_string(),
            payment_reference: None,
            is_guest: true,
            needs_review: false,
            review_reason: None,
            shipping_address: None,
            billing_address: None,
            created_at: Utc::now(),
            updated_at: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_status_notifications_are_deduped() {
        let email = Recorder::new("email");
        let dispatcher = NotificationDispatcher::new(email.clone(), None);
        let order = sample_order(None);

        dispatcher
            .notify_status_change(&order, Some("pending".into()), "paid".into(), false)
            .await;
        dispatcher
            .notify_status_change(&order, Some("pending".into()), "paid".into(), false)
            .await;

        assert_eq!(email.count(), 1);
    }

    #[tokio::test]
    async fn unchanged_status_is_suppressed() {
        let email = Recorder::new("email");
        let dispatcher = NotificationDispatcher::new(email.clone(), None);
        let order = sample_order(None);

        dispatcher
            .notify_status_change(&order, Some("pending".into()), "pending".into(), false)
            .await;

        assert_eq!(email.count(), 0);
    }

    #[tokio::test]
    async fn tracking_change_overrides_suppression() {
        let email = Recorder::new("email");
        let dispatcher = NotificationDispatcher::new(email.clone(), None);
        let order = sample_order(None);

        dispatcher
            .notify_status_change(&order, Some("shipped".into()), "shipped".into(), true)
            .await;

        assert_eq!(email.count(), 1);
    }

    #[tokio::test]
    async fn sms_only_fires_with_a_phone_number() {
        let email = Recorder::new("email");
        let sms = Recorder::new("sms");
        let dispatcher = NotificationDispatcher::new(email.clone(), Some(sms.clone()));

        dispatcher.notify_created(&sample_order(None)).await;
        assert_eq!(sms.count(), 0);

        dispatcher.notify_created(&sample_order(Some("+15550100"))).await;
        assert_eq!(sms.count(), 1);
        assert_eq!(email.count(), 2);
    }

    #[tokio::test]
    async fn primary_failure_does_not_block_secondary() {
        let email = Recorder::failing("email");
        let sms = Recorder::new("sms");
        let dispatcher = NotificationDispatcher::new(email, Some(sms.clone()));

        dispatcher
            .notify_created(&sample_order(Some("+15550100")))
            .await;

        assert_eq!(sms.count(), 1);
    }
}
