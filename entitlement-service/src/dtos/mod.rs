use crate::models::{
    Entitlement, EntitlementAdjustment, PromoCode, PromoRejection, PromoUsage, RefundDecision,
    RefundStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub views_limit: i64,
    pub views_used: i64,
    pub remaining: i64,
    pub can_view: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecordViewRequest {
    pub viewer_id: Uuid,
    pub viewed_profile_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RecordViewResponse {
    pub success: bool,
    pub charged: bool,
    pub remaining: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 1, max = 64, message = "package_id is required"))]
    pub package_id: String,
    pub amount: Decimal,
    #[validate(range(min = 1, message = "view_allowance must be positive"))]
    pub view_allowance: i64,
    pub user_id: Uuid,
    #[validate(length(max = 64, message = "promo_code is too long"))]
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub redirect_url: String,
    pub gateway_ref: String,
    pub key_id: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidatePromoRequest {
    #[validate(length(min = 1, max = 64, message = "code is required"))]
    pub code: String,
    pub order_value: Decimal,
    #[validate(length(min = 1, max = 64, message = "package_id is required"))]
    pub package_id: String,
}

#[derive(Debug, Serialize)]
pub struct ValidatePromoResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<PromoRejection>,
}

#[derive(Debug, Serialize)]
pub struct PromoDetailResponse {
    pub promo: PromoCode,
    pub usages: Vec<PromoUsage>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    #[validate(length(min = 1, max = 1000, message = "reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RefundRequestResponse {
    pub refund_id: Uuid,
    pub status: RefundStatus,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DecideRefundRequest {
    pub refund_id: Uuid,
    pub decision: RefundDecision,
    #[validate(length(max = 2000, message = "notes are too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecideRefundResponse {
    pub refund_id: Uuid,
    pub status: RefundStatus,
    pub payment_status: crate::models::PaymentStatus,
    pub reversed_views: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<Entitlement>,
}

#[derive(Debug, Deserialize)]
pub struct RefundListQuery {
    pub status: Option<RefundStatus>,
}

/// Exactly one of `delta` or `absolute` must be set.
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustQuotaRequest {
    pub user_id: Uuid,
    pub delta: Option<i64>,
    #[validate(range(min = 0, message = "absolute must not be negative"))]
    pub absolute: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AdjustQuotaResponse {
    pub user_id: Uuid,
    pub new_limit: i64,
    pub views_used: i64,
    pub remaining: i64,
    pub delta: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminEntitlementResponse {
    pub entitlement: Entitlement,
    pub adjustments: Vec<EntitlementAdjustment>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}
