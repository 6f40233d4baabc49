use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}
fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    /// Optional replacement tracking code (e.g. once a carrier assigns one).
    pub tracking_code: Option<String>,
}

/// GET /api/v1/orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListQuery),
    responses((status = 200, description = "Orders page")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(query.page, query.per_page)
        .await?;

    let items = orders
        .into_iter()
        .map(|order| state.services.orders.model_to_response(order, None))
        .collect();

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page: query.page,
        per_page: query.per_page,
    })))
}

/// GET /api/v1/orders/{id}
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = crate::services::orders::OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    let items = state.services.orders.get_order_items(id).await?;
    Ok(Json(ApiResponse::success(
        state.services.orders.model_to_response(order, Some(items)),
    )))
}

/// GET /api/v1/orders/number/{order_number}
#[utoipa::path(
    get,
    path = "/api/v1/orders/number/{order_number}",
    params(("order_number" = String, Path, description = "Human-facing order number")),
    responses(
        (status = 200, description = "Order with items", body = crate::services::orders::OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_by_order_number(&order_number)
        .await?;
    let items = state.services.orders.get_order_items(order.id).await?;
    Ok(Json(ApiResponse::success(
        state.services.orders.model_to_response(order, Some(items)),
    )))
}

/// PUT /api/v1/orders/{id}/status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = crate::services::orders::OrderResponse),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .state_machine
        .update_status(id, request.status, request.tracking_code)
        .await?;
    Ok(Json(ApiResponse::success(
        state.services.orders.model_to_response(order, None),
    )))
}

/// POST /api/v1/orders/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = crate::services::orders::OrderResponse),
        (status = 400, description = "Order cannot be cancelled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .state_machine
        .update_status(id, OrderStatus::Cancelled, None)
        .await?;
    Ok(Json(ApiResponse::success(
        state.services.orders.model_to_response(order, None),
    )))
}

/// POST /api/v1/orders/{id}/remind
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/remind",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Reminder queued"),
        (status = 400, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn send_payment_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.state_machine.send_payment_reminder(id).await?;
    Ok(Json(ApiResponse::<()>::message("Payment reminder queued")))
}
