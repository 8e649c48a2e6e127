//! Storage seam for the entitlement subsystem.
//!
//! Every method is one atomic unit of work. Implementations must serialize
//! all quota- and entitlement-affecting work for a user, guard status
//! transitions with conditional updates, and enforce uniqueness of
//! (viewer, viewed) pairs and gateway references.

use crate::error::EntitlementError;
use crate::models::{
    Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement, EntitlementAdjustment,
    NewPayment, NewRefund, Payment, PaymentOutcome, PromoCode, PromoUsage,
    ReconciliationOutcome, Refund, RefundDecision, RefundDecisionOutcome, RefundStatus,
    ViewReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub type SharedStore = Arc<dyn EntitlementStore>;

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn health_check(&self) -> Result<(), EntitlementError>;

    /// Identifies the data behind this handle. Two handles report the same
    /// value only when they reach the same data.
    async fn route_identity(&self) -> Result<Uuid, EntitlementError>;

    // Subscription ledger

    /// Current allowance; users never touched read as all zeros.
    async fn get_entitlement(&self, user_id: Uuid) -> Result<Entitlement, EntitlementError>;

    /// The single write path for `views_limit`. Resolves `adjustment`
    /// against the locked row and writes an audit entry tagged `source`.
    async fn adjust_views_limit(
        &self,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
    ) -> Result<AdjustmentOutcome, EntitlementError>;

    /// Audit trail, newest first.
    async fn list_adjustments(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<EntitlementAdjustment>, EntitlementError>;

    // View metering

    /// Charges one view for a new (viewer, viewed) pair, or reports a
    /// repeat view without charging.
    async fn record_view(
        &self,
        viewer_id: Uuid,
        viewed_profile_id: Uuid,
    ) -> Result<ViewReceipt, EntitlementError>;

    // Payments

    /// Records a pending payment. A promo code on the payment reserves one
    /// use in the same unit of work; an exhausted or ineligible code fails
    /// with `PromoRejected` and nothing is written.
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, EntitlementError>;

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, EntitlementError>;

    async fn get_payment_by_ref(
        &self,
        gateway_ref: &str,
    ) -> Result<Option<Payment>, EntitlementError>;

    /// Pending payments created before `created_before`, oldest first.
    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, EntitlementError>;

    async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, EntitlementError>;

    async fn count_pending_payments(&self, user_id: Uuid) -> Result<i64, EntitlementError>;

    /// Moves the payment to completed and applies it to the ledger, exactly
    /// once. The allowance grant and the reconciliation marker commit
    /// together or not at all.
    async fn complete_payment(
        &self,
        gateway_ref: &str,
    ) -> Result<ReconciliationOutcome, EntitlementError>;

    /// Conditional pending to failed transition for an order that will never
    /// be paid. A reserved promo use is handed back in the same unit.
    async fn fail_payment(&self, gateway_ref: &str) -> Result<PaymentOutcome, EntitlementError>;

    /// Gateway-initiated refund or dispute: completed to refunded, with the
    /// refund reversal applied and any pending refund closed as approved.
    async fn reverse_payment(&self, gateway_ref: &str)
        -> Result<PaymentOutcome, EntitlementError>;

    // Refunds

    async fn create_refund(&self, refund: NewRefund) -> Result<Refund, EntitlementError>;

    async fn decide_refund(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
        notes: Option<&str>,
        admin_id: Uuid,
    ) -> Result<RefundDecisionOutcome, EntitlementError>;

    async fn list_refunds(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<Refund>, EntitlementError>;

    // Promo codes

    async fn create_promo_code(&self, promo: PromoCode) -> Result<PromoCode, EntitlementError>;

    /// Lookup by normalized (upper-case) code.
    async fn get_promo_code(&self, code: &str) -> Result<Option<PromoCode>, EntitlementError>;

    async fn list_promo_usages(
        &self,
        promo_id: Uuid,
    ) -> Result<Vec<PromoUsage>, EntitlementError>;
}
