//! Domain models for the entitlement subsystem.

pub mod package;
pub mod payment;
pub mod promo;
pub mod refund;
pub mod subscription;
pub mod view;

pub use package::{Package, PackageCatalog};
pub use payment::{
    settlement_step, CheckoutSession, ExpiryReport, NewPayment, OutcomeDisposition, Payment,
    PaymentOutcome, PaymentStatus, PromoStatus, ReconciliationOutcome, SettlementStep,
};
pub use promo::{
    normalize_code, DiscountType, NewPromoCode, PromoCode, PromoQuote, PromoRejection, PromoUsage,
};
pub use refund::{NewRefund, Refund, RefundDecision, RefundDecisionOutcome, RefundStatus};
pub use subscription::{
    reversal_quantity, Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement,
    EntitlementAdjustment, ResolvedAdjustment,
};
pub use view::{ViewGate, ViewReceipt};

/// A stored enum column held a value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
