use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use orderflow_api::{
    config::AppConfig,
    db,
    entities::{inventory_level, product, product_variant},
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        notifications::{NotificationChannel, NotificationDispatcher, NotificationMessage},
        payments::{PaymentGateway, PaymentRedirect},
    },
    AppState,
};

/// Notification channel that records every delivery for assertions.
pub struct RecordingChannel {
    deliveries: Mutex<Vec<NotificationMessage>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
        })
    }

    pub fn deliveries(&self) -> Vec<NotificationMessage> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Polls until at least `count` deliveries arrived or a second passed.
    pub async fn wait_for(&self, count: usize) -> Vec<NotificationMessage> {
        for _ in 0..100 {
            if self.count() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.deliveries()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), ServiceError> {
        self.deliveries.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Gateway stub: always succeeds with a fixed redirect URL.
pub struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initiate(
        &self,
        order_number: &str,
        _amount: Decimal,
        _currency: &str,
        _customer_email: &str,
    ) -> Result<PaymentRedirect, ServiceError> {
        Ok(PaymentRedirect {
            redirect_url: format!("https://pay.test/session/{}", order_number),
        })
    }
}

/// Gateway stub that always refuses.
pub struct RejectingGateway;

#[async_trait]
impl PaymentGateway for RejectingGateway {
    async fn initiate(
        &self,
        _order_number: &str,
        _amount: Decimal,
        _currency: &str,
        _customer_email: &str,
    ) -> Result<PaymentRedirect, ServiceError> {
        Err(ServiceError::PaymentInitiationFailed(
            "card declined".to_string(),
        ))
    }
}

/// Test harness: full application state over a throwaway SQLite file, with
/// the event worker running and notifications captured in memory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifications: Arc<RecordingChannel>,
    _tmp: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Some(Arc::new(StubGateway))).await
    }

    pub async fn with_gateway(gateway: Option<Arc<dyn PaymentGateway>>) -> Self {
        Self::with_options(gateway, None).await
    }

    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::with_options(Some(Arc::new(StubGateway)), Some(secret.to_string())).await
    }

    pub async fn with_options(
        gateway: Option<Arc<dyn PaymentGateway>>,
        webhook_secret: Option<String>,
    ) -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = tmp.path().join("orderflow_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = webhook_secret;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create schema in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);

        let notifications = RecordingChannel::new();
        let dispatcher = Arc::new(NotificationDispatcher::new(notifications.clone(), None));
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            db_arc.clone(),
            dispatcher,
        ));

        let services = Arc::new(
            AppServices::new(db_arc.clone(), &cfg, event_sender.clone(), gateway)
                .expect("failed to wire services for tests"),
        );

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        };
        let router = orderflow_api::app(state.clone());

        Self {
            router,
            state,
            notifications,
            _tmp: tmp,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seeds a product with one variant and a stock level; returns the
    /// variant.
    pub async fn seed_variant(
        &self,
        slug: &str,
        sku: &str,
        price: Decimal,
        on_hand: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        let product_id = Uuid::new_v4();

        product::ActiveModel {
            id: Set(product_id),
            slug: Set(slug.to_string()),
            name: Set(format!("Test Product {}", slug)),
            is_active: Set(true),
            image_url: Set(None),
            lead_time_note: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product");

        let variant = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            label: Set("Default".to_string()),
            price: Set(price),
            position: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed variant");

        inventory_level::ActiveModel {
            id: Set(Uuid::new_v4()),
            variant_id: Set(variant.id),
            on_hand: Set(on_hand),
            version: Set(1),
            updated_at: Set(now),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed inventory level");

        variant
    }

    pub async fn stock_for(&self, variant_id: Uuid) -> Option<i32> {
        self.state
            .services
            .inventory
            .get_level(variant_id)
            .await
            .expect("read stock level")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is not valid json")
}
