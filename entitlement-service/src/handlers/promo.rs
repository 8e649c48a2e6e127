use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{PromoDetailResponse, ValidatePromoRequest, ValidatePromoResponse};
use crate::middleware::{AdminSession, AuthSession};
use crate::models::{NewPromoCode, PromoCode};
use crate::startup::AppState;

/// Read-only pricing of an order with a promo code. Rejections are a
/// normal 200 response with `valid: false` and a reason.
pub async fn validate_promo(
    State(state): State<AppState>,
    _session: AuthSession,
    Json(payload): Json<ValidatePromoRequest>,
) -> Result<Json<ValidatePromoResponse>, AppError> {
    payload.validate()?;

    let response = match state
        .promos
        .validate(&payload.code, payload.order_value, &payload.package_id)
        .await?
    {
        Ok(quote) => ValidatePromoResponse {
            valid: true,
            discount_amount: Some(quote.discount_amount),
            final_amount: Some(quote.final_amount),
            reason: None,
        },
        Err(reason) => ValidatePromoResponse {
            valid: false,
            discount_amount: None,
            final_amount: None,
            reason: Some(reason),
        },
    };

    Ok(Json(response))
}

pub async fn create_promo_code(
    State(state): State<AppState>,
    admin: AdminSession,
    Json(payload): Json<NewPromoCode>,
) -> Result<(StatusCode, Json<PromoCode>), AppError> {
    tracing::info!(admin_id = %admin.admin_id(), code = %payload.code, "Creating promo code");
    let promo = state.promos.create(payload).await?;
    Ok((StatusCode::CREATED, Json(promo)))
}

pub async fn get_promo_code(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(code): Path<String>,
) -> Result<Json<PromoDetailResponse>, AppError> {
    let (promo, usages) = state.promos.detail(&code).await?;
    Ok(Json(PromoDetailResponse { promo, usages }))
}
