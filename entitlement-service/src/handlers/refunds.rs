use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    DecideRefundRequest, DecideRefundResponse, RefundListQuery, RefundRequest,
    RefundRequestResponse,
};
use crate::middleware::{AdminSession, AuthSession};
use crate::models::Refund;
use crate::startup::AppState;

pub async fn request_refund(
    State(state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundRequestResponse>), AppError> {
    payload.validate()?;

    let refund = state
        .refunds
        .request(session.user_id(), payload.payment_id, &payload.reason)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RefundRequestResponse {
            refund_id: refund.refund_id,
            status: refund.status,
            amount: refund.amount,
        }),
    ))
}

pub async fn decide_refund(
    State(state): State<AppState>,
    admin: AdminSession,
    Json(payload): Json<DecideRefundRequest>,
) -> Result<Json<DecideRefundResponse>, AppError> {
    payload.validate()?;

    let outcome = state
        .refunds
        .decide(
            payload.refund_id,
            payload.decision,
            payload.notes.as_deref(),
            admin.admin_id(),
        )
        .await?;

    Ok(Json(DecideRefundResponse {
        refund_id: outcome.refund.refund_id,
        status: outcome.refund.status,
        payment_status: outcome.payment.status,
        reversed_views: outcome.reversed_views,
        entitlement: outcome.entitlement,
    }))
}

/// Admin refund queue, oldest first.
pub async fn list_refunds(
    State(state): State<AppState>,
    _admin: AdminSession,
    Query(query): Query<RefundListQuery>,
) -> Result<Json<Vec<Refund>>, AppError> {
    let refunds = state.refunds.list(query.status).await?;
    Ok(Json(refunds))
}
