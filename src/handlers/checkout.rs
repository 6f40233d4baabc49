use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    errors::ServiceError,
    services::checkout::CheckoutRequest,
    ApiResponse, AppState,
};

/// POST /api/v1/checkout
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::checkout::CheckoutOutcome),
        (status = 422, description = "A cart line could not be resolved", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment initiation failed", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid submission", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn submit_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.services.checkout.submit(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome))))
}
