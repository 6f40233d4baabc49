use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetLevelRequest {
    pub on_hand: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LevelResponse {
    pub variant_id: Uuid,
    pub on_hand: i32,
}

/// GET /api/v1/inventory/{variant_id}
#[utoipa::path(
    get,
    path = "/api/v1/inventory/{variant_id}",
    params(("variant_id" = Uuid, Path, description = "Product variant id")),
    responses(
        (status = 200, description = "Current stock level", body = LevelResponse),
        (status = 404, description = "No stock record for this variant", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn get_level(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let on_hand = state
        .services
        .inventory
        .get_level(variant_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("No stock record for this variant".to_string()))?;

    Ok(Json(ApiResponse::success(LevelResponse {
        variant_id,
        on_hand,
    })))
}

/// PUT /api/v1/inventory/{variant_id}
#[utoipa::path(
    put,
    path = "/api/v1/inventory/{variant_id}",
    params(("variant_id" = Uuid, Path, description = "Product variant id")),
    request_body = SetLevelRequest,
    responses(
        (status = 200, description = "Stock level set", body = LevelResponse),
        (status = 400, description = "Invalid level", body = crate::errors::ErrorResponse)
    ),
    tag = "Inventory"
)]
pub async fn set_level(
    State(state): State<AppState>,
    Path(variant_id): Path<Uuid>,
    Json(request): Json<SetLevelRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .inventory
        .set_level(variant_id, request.on_hand)
        .await?;

    Ok(Json(ApiResponse::success(LevelResponse {
        variant_id,
        on_hand: request.on_hand,
    })))
}
