use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{AdjustQuotaRequest, AdjustQuotaResponse, AdminEntitlementResponse};
use crate::error::EntitlementError;
use crate::middleware::AdminSession;
use crate::startup::AppState;

pub async fn adjust_quota(
    State(state): State<AppState>,
    admin: AdminSession,
    Json(payload): Json<AdjustQuotaRequest>,
) -> Result<Json<AdjustQuotaResponse>, AppError> {
    payload.validate()?;

    let outcome = match (payload.delta, payload.absolute) {
        (Some(delta), None) => {
            state
                .admin
                .grant_views(admin.admin_id(), payload.user_id, delta)
                .await?
        }
        (None, Some(absolute)) => {
            state
                .admin
                .set_views_limit(admin.admin_id(), payload.user_id, absolute)
                .await?
        }
        _ => {
            return Err(EntitlementError::Validation(
                "exactly one of delta or absolute is required".to_string(),
            )
            .into())
        }
    };

    Ok(Json(AdjustQuotaResponse {
        user_id: payload.user_id,
        new_limit: outcome.entitlement.views_limit,
        views_used: outcome.entitlement.views_used,
        remaining: outcome.entitlement.remaining,
        delta: outcome.delta,
    }))
}

pub async fn user_entitlement(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(user_id): Path<Uuid>,
) -> Result<Json<AdminEntitlementResponse>, AppError> {
    let (entitlement, adjustments) = state.admin.inspect(user_id).await?;
    Ok(Json(AdminEntitlementResponse {
        entitlement,
        adjustments,
    }))
}
