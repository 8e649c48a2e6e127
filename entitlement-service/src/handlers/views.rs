use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::{EntitlementResponse, RecordViewRequest, RecordViewResponse};
use crate::middleware::AuthSession;
use crate::models::ViewGate;
use crate::startup::AppState;

/// Caller's allowance. Lookup failures are returned as errors.
pub async fn get_entitlement(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<EntitlementResponse>, AppError> {
    let entitlement = state.ledger.get_entitlement(session.user_id()).await?;

    Ok(Json(EntitlementResponse {
        views_limit: entitlement.views_limit,
        views_used: entitlement.views_used,
        remaining: entitlement.remaining,
        can_view: entitlement.can_view(),
    }))
}

/// Whether the caller may open another profile. Never errors: a failed
/// lookup answers `can_view: false`.
pub async fn can_view(State(state): State<AppState>, session: AuthSession) -> Json<ViewGate> {
    Json(state.metering.gate(session.user_id()).await)
}

pub async fn record_view(
    State(state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<RecordViewRequest>,
) -> Result<Json<RecordViewResponse>, AppError> {
    session.ensure_self(payload.viewer_id)?;

    let receipt = state
        .metering
        .record_view(payload.viewer_id, payload.viewed_profile_id)
        .await?;

    Ok(Json(RecordViewResponse {
        success: true,
        charged: receipt.charged,
        remaining: receipt.remaining,
    }))
}
