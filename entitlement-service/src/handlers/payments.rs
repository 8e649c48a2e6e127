//! Checkout, payment status and gateway webhook handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{InitiatePaymentRequest, InitiatePaymentResponse, WebhookAck};
use crate::error::EntitlementError;
use crate::middleware::{AdminSession, AuthSession};
use crate::models::{ExpiryReport, OutcomeDisposition, Package, Payment};
use crate::services::gateway::{GatewayNotification, WebhookEvent, SIGNATURE_HEADER};
use crate::services::PurchaseRequest;
use crate::startup::AppState;

pub async fn list_packages(State(state): State<AppState>) -> Json<Vec<Package>> {
    Json(state.catalog.all().to_vec())
}

/// Starts a purchase. The client sends the user to `redirect_url`; the
/// allowance is granted only when the gateway confirms the payment.
pub async fn initiate_payment(
    State(state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), AppError> {
    payload.validate()?;
    session.ensure_self(payload.user_id)?;

    tracing::info!(
        user_id = %payload.user_id,
        package_id = %payload.package_id,
        amount = %payload.amount,
        "Initiating payment"
    );

    let (payment, checkout) = state
        .payments
        .initiate(PurchaseRequest {
            user_id: payload.user_id,
            package_id: payload.package_id,
            amount: payload.amount,
            view_allowance: payload.view_allowance,
            promo_code: payload.promo_code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitiatePaymentResponse {
            payment_id: payment.payment_id,
            redirect_url: checkout.redirect_url,
            gateway_ref: checkout.gateway_ref,
            key_id: checkout.key_id,
            amount: payment.amount,
            currency: payment.currency,
        }),
    ))
}

/// Status polling after the gateway redirect. Other users' payments read
/// as not found.
pub async fn get_payment(
    State(state): State<AppState>,
    session: AuthSession,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.get_payment(payment_id).await?;
    if payment.user_id != session.user_id() && !session.0.is_admin() {
        return Err(EntitlementError::NotFound("payment".to_string()).into());
    }
    Ok(Json(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<Vec<Payment>>, AppError> {
    let payments = state.payments.list_payments(session.user_id()).await?;
    Ok(Json(payments))
}

/// Gateway notifications. Delivery is at-least-once, so replays are
/// acknowledged with 200 and no side effects.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook without signature header");
            EntitlementError::Unauthenticated("missing webhook signature".to_string())
        })?;

    if !state.gateway.verify_webhook_signature(&body, signature) {
        return Err(EntitlementError::Unauthenticated("invalid webhook signature".to_string()).into());
    }

    let event = WebhookEvent::parse(&body)?;
    tracing::info!(event = %event.event, "Gateway webhook received");

    match event.into_notification()? {
        GatewayNotification::AttemptFailed {
            gateway_ref,
            attempt_id,
        } => {
            state
                .payments
                .record_failed_attempt(&gateway_ref, attempt_id.as_deref())
                .await?;
            Ok(Json(WebhookAck {
                status: "attempt_failed",
            }))
        }
        GatewayNotification::Ignored(event) => {
            tracing::debug!(event = %event, "Unhandled webhook event");
            Ok(Json(WebhookAck { status: "ignored" }))
        }
        GatewayNotification::Outcome {
            gateway_ref,
            status,
        } => {
            let outcome = state.payments.ingest_outcome(&gateway_ref, status).await?;
            let status = match outcome.disposition {
                OutcomeDisposition::Applied => "processed",
                OutcomeDisposition::Duplicate => "duplicate",
            };
            Ok(Json(WebhookAck { status }))
        }
    }
}

/// Settles payments pending past the expiry window against the gateway's
/// view of their orders.
pub async fn expire_stale_payments(
    State(state): State<AppState>,
    admin: AdminSession,
) -> Result<Json<ExpiryReport>, AppError> {
    tracing::info!(admin_id = %admin.admin_id(), "Expiring stale payments");
    let report = state.payments.expire_stale().await?;
    Ok(Json(report))
}
