use crate::models::{Entitlement, Payment, UnknownVariant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for RefundStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownVariant {
                kind: "refund status",
                value,
            }),
        }
    }
}

/// Admin verdict on a pending refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundDecision {
    #[serde(rename = "approved", alias = "approve")]
    Approve,
    #[serde(rename = "rejected", alias = "reject")]
    Reject,
}

impl RefundDecision {
    pub fn status(&self) -> RefundStatus {
        match self {
            Self::Approve => RefundStatus::Approved,
            Self::Reject => RefundStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub refund_id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    #[sqlx(try_from = "String")]
    pub status: RefundStatus,
    pub admin_notes: Option<String>,
    pub decided_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub decided_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub refund_id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub reason: String,
}

/// Result of deciding a refund.
#[derive(Debug, Clone)]
pub struct RefundDecisionOutcome {
    pub refund: Refund,
    pub payment: Payment,
    /// Whether this decision moved the payment to refunded.
    pub payment_refunded: bool,
    /// Views taken back from the user; zero for rejections.
    pub reversed_views: i64,
    pub entitlement: Option<Entitlement>,
}
