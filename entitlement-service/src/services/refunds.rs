//! Refund and dispute workflow.

use crate::error::EntitlementError;
use crate::models::{NewRefund, Refund, RefundDecision, RefundDecisionOutcome, RefundStatus};
use crate::services::metrics::{
    record_error, ENTITLEMENT_ADJUSTMENTS_TOTAL, PAYMENTS_TOTAL, REFUND_DECISIONS_TOTAL,
};
use crate::services::store::SharedStore;
use service_core::retry::{retry_with_backoff, RetryConfig};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct RefundWorkflow {
    store: SharedStore,
    retry: RetryConfig,
}

impl RefundWorkflow {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            retry: RetryConfig::quick(),
        }
    }

    /// Opens a refund for one of the user's completed payments.
    #[instrument(skip(self, reason), fields(user_id = %user_id, payment_id = %payment_id))]
    pub async fn request(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
        reason: &str,
    ) -> Result<Refund, EntitlementError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EntitlementError::Validation("reason is required".to_string()));
        }

        let refund = self
            .store
            .create_refund(NewRefund {
                refund_id: Uuid::new_v4(),
                payment_id,
                user_id,
                reason: reason.to_string(),
            })
            .await
            .inspect_err(record_error)?;

        info!(refund_id = %refund.refund_id, amount = %refund.amount, "Refund requested");
        Ok(refund)
    }

    /// Decides a pending refund. Approval refunds the payment and takes back
    /// the unused part of its grant in the same unit of work.
    #[instrument(skip(self, notes), fields(refund_id = %refund_id, admin_id = %admin_id))]
    pub async fn decide(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
        notes: Option<&str>,
        admin_id: Uuid,
    ) -> Result<RefundDecisionOutcome, EntitlementError> {
        let outcome = retry_with_backoff(&self.retry, "decide_refund", || {
            self.store.decide_refund(refund_id, decision, notes, admin_id)
        })
        .await
        .inspect_err(record_error)?;

        REFUND_DECISIONS_TOTAL
            .with_label_values(&[decision.status().as_str()])
            .inc();
        if outcome.payment_refunded {
            PAYMENTS_TOTAL.with_label_values(&["refunded"]).inc();
        }
        if outcome.entitlement.is_some() {
            ENTITLEMENT_ADJUSTMENTS_TOTAL
                .with_label_values(&["refund_reversal"])
                .inc();
        }

        info!(
            status = %outcome.refund.status,
            reversed_views = outcome.reversed_views,
            "Refund decided"
        );
        Ok(outcome)
    }

    pub async fn list(&self, status: Option<RefundStatus>) -> Result<Vec<Refund>, EntitlementError> {
        self.store.list_refunds(status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPayment;
    use crate::services::{EntitlementStore, MemoryStore};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    async fn completed_payment(store: &MemoryStore, user_id: Uuid) -> Uuid {
        let payment_id = Uuid::new_v4();
        let gateway_ref = format!("order_{}", payment_id.simple());
        store
            .insert_payment(NewPayment {
                payment_id,
                user_id,
                package_id: "silver".to_string(),
                view_allowance: 20,
                order_value: Decimal::from(5000),
                amount: Decimal::from(5000),
                currency: "INR".to_string(),
                gateway_ref: gateway_ref.clone(),
                promo_code: None,
                discount_amount: Decimal::ZERO,
            })
            .await
            .unwrap();
        store.complete_payment(&gateway_ref).await.unwrap();
        payment_id
    }

    fn refunded_count() -> f64 {
        PAYMENTS_TOTAL.with_label_values(&["refunded"]).get()
    }

    #[tokio::test]
    async fn refunded_payments_are_counted_only_when_status_changes() {
        let store = MemoryStore::new();
        let workflow = RefundWorkflow::new(Arc::new(store.clone()));
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let payment_id = completed_payment(&store, user).await;

        let before = refunded_count();
        let refund = workflow.request(user, payment_id, "changed my mind").await.unwrap();
        let rejected = workflow
            .decide(refund.refund_id, RefundDecision::Reject, None, admin)
            .await
            .unwrap();
        assert!(!rejected.payment_refunded);
        assert_eq!(refunded_count(), before);

        let refund = workflow.request(user, payment_id, "still unhappy").await.unwrap();
        let approved = workflow
            .decide(refund.refund_id, RefundDecision::Approve, Some("ok"), admin)
            .await
            .unwrap();
        assert!(approved.payment_refunded);
        assert_eq!(approved.reversed_views, 20);
        assert_eq!(refunded_count(), before + 1.0);
    }
}
