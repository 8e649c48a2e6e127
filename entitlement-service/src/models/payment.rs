//! Payment model and its status machine.

use crate::error::EntitlementError;
use crate::models::{Entitlement, UnknownVariant};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Status only moves forward: pending to completed or failed, and
    /// completed to refunded.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Refunded)
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(UnknownVariant {
                kind: "payment status",
                value,
            }),
        }
    }
}

/// What a settlement request for `requested` means for a payment currently
/// in `current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStep {
    Apply,
    /// Already in the requested terminal state; nothing to do.
    Duplicate,
}

pub fn settlement_step(
    current: PaymentStatus,
    requested: PaymentStatus,
) -> Result<SettlementStep, EntitlementError> {
    if current == requested && requested != PaymentStatus::Pending {
        return Ok(SettlementStep::Duplicate);
    }
    if current.can_transition_to(requested) {
        return Ok(SettlementStep::Apply);
    }
    Err(EntitlementError::InvalidTransition {
        from: current,
        to: requested,
    })
}

/// Promo usage held by a payment. A use is reserved when the payment is
/// recorded and handed back if the order expires unpaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromoStatus {
    None,
    Applied,
    Released,
}

impl PromoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Applied => "applied",
            Self::Released => "released",
        }
    }
}

impl TryFrom<String> for PromoStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "none" => Ok(Self::None),
            "applied" => Ok(Self::Applied),
            "released" => Ok(Self::Released),
            _ => Err(UnknownVariant {
                kind: "promo status",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub package_id: String,
    /// Package allowance at the time of purchase.
    pub view_allowance: i64,
    /// Catalog price before any discount.
    pub order_value: Decimal,
    /// Amount actually charged.
    pub amount: Decimal,
    pub currency: String,
    pub gateway_ref: String,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub promo_code: Option<String>,
    pub discount_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub promo_status: PromoStatus,
    /// Set once the payment has been applied to the ledger.
    pub reconciled_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    pub fn is_reconciled(&self) -> bool {
        self.reconciled_utc.is_some()
    }

    /// True while the payment holds a promo use.
    pub fn holds_promo_use(&self) -> bool {
        self.promo_status == PromoStatus::Applied
    }
}

/// A validated payment ready to be persisted as pending.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub package_id: String,
    pub view_allowance: i64,
    pub order_value: Decimal,
    pub amount: Decimal,
    pub currency: String,
    pub gateway_ref: String,
    pub promo_code: Option<String>,
    pub discount_amount: Decimal,
}

impl NewPayment {
    pub fn promo_status(&self) -> PromoStatus {
        if self.promo_code.is_some() {
            PromoStatus::Applied
        } else {
            PromoStatus::None
        }
    }

    pub fn into_payment(self, now: DateTime<Utc>) -> Payment {
        let promo_status = self.promo_status();
        Payment {
            payment_id: self.payment_id,
            user_id: self.user_id,
            package_id: self.package_id,
            view_allowance: self.view_allowance,
            order_value: self.order_value,
            amount: self.amount,
            currency: self.currency,
            gateway_ref: self.gateway_ref,
            status: PaymentStatus::Pending,
            promo_code: self.promo_code,
            discount_amount: self.discount_amount,
            promo_status,
            reconciled_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// What the client needs to hand the user over to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub redirect_url: String,
    pub gateway_ref: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeDisposition {
    Applied,
    Duplicate,
}

/// Result of ingesting a gateway outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub disposition: OutcomeDisposition,
    /// Entitlement after the ledger change, when there was one.
    pub entitlement: Option<Entitlement>,
}

/// Result of applying a completed payment to the ledger.
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub payment: Payment,
    pub already_reconciled: bool,
    pub entitlement: Option<Entitlement>,
}

/// Result of an expiry pass over stale pending payments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub examined: usize,
    /// The gateway reported the order paid; the allowance was granted.
    pub completed: usize,
    /// Unpaid orders moved to failed.
    pub expired: usize,
    /// Left pending because the gateway could not be asked or the payment
    /// settled while the pass ran.
    pub skipped: usize,
}
