pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::warn;

pub use config::AppConfig;
pub use errors::ServiceError;

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: events::EventSender,
    pub services: Arc<handlers::AppServices>,
}

/// Standard envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Liveness probe; no dependencies touched.
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: verifies the database answers.
async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    state.db.ping().await?;
    Ok(Json(json!({
        "status": "ok",
        "database": "up",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::checkout::submit_checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/track", get(handlers::tracking::track_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/:id/remind",
            post(handlers::orders::send_payment_reminder),
        )
        .route(
            "/inventory/:variant_id",
            get(handlers::inventory::get_level).put(handlers::inventory::set_level),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .route("/status", get(status))
}

/// Builds the full application router with middleware applied.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.is_development() {
        return CorsLayer::permissive();
    }

    match &config.cors_allowed_origins {
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| {
                    let origin = origin.trim();
                    origin.parse::<HeaderValue>().ok().or_else(|| {
                        warn!(origin, "Ignoring unparseable CORS origin");
                        None
                    })
                })
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods([Method::GET, Method::POST, Method::PUT])
                .allow_headers(tower_http::cors::Any)
        }
        None => CorsLayer::new(),
    }
}
