use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct TrackQuery {
    /// Order number or tracking code.
    pub reference: String,
    /// Email the order was placed with.
    pub email: String,
}

/// GET /api/v1/orders/track
///
/// Public endpoint: no authentication, gated on knowing both the reference
/// and the email.
#[utoipa::path(
    get,
    path = "/api/v1/orders/track",
    params(TrackQuery),
    responses(
        (status = 200, description = "Sanitized order view", body = crate::services::tracker::TrackedOrder),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Tracking"
)]
pub async fn track_order(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .tracker
        .lookup(&query.reference, &query.email)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}
