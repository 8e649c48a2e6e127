//! Entitlement reconciler: turns settled payments into ledger changes.

use crate::error::EntitlementError;
use crate::models::{OutcomeDisposition, PaymentOutcome, ReconciliationOutcome};
use crate::services::metrics::{record_error, ENTITLEMENT_ADJUSTMENTS_TOTAL, PAYMENTS_TOTAL};
use crate::services::store::SharedStore;
use service_core::retry::{retry_with_backoff, RetryConfig};
use tracing::{info, instrument};

#[derive(Clone)]
pub struct EntitlementReconciler {
    store: SharedStore,
    retry: RetryConfig,
}

impl EntitlementReconciler {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            retry: RetryConfig::quick(),
        }
    }

    /// Completes the payment and grants its allowance, exactly once. The
    /// grant and the reconciliation marker commit together.
    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    pub async fn on_payment_completed(
        &self,
        gateway_ref: &str,
    ) -> Result<ReconciliationOutcome, EntitlementError> {
        let outcome = retry_with_backoff(&self.retry, "complete_payment", || {
            self.store.complete_payment(gateway_ref)
        })
        .await
        .inspect_err(record_error)?;

        if outcome.already_reconciled {
            info!(payment_id = %outcome.payment.payment_id, "Duplicate completion ignored");
            return Ok(outcome);
        }

        PAYMENTS_TOTAL.with_label_values(&["completed"]).inc();
        ENTITLEMENT_ADJUSTMENTS_TOTAL
            .with_label_values(&["purchase"])
            .inc();

        Ok(outcome)
    }

    /// Gateway-side refund or lost dispute: completed to refunded with the
    /// unused part of the grant taken back.
    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    pub async fn on_payment_refunded(
        &self,
        gateway_ref: &str,
    ) -> Result<PaymentOutcome, EntitlementError> {
        let outcome = retry_with_backoff(&self.retry, "reverse_payment", || {
            self.store.reverse_payment(gateway_ref)
        })
        .await
        .inspect_err(record_error)?;

        if outcome.disposition == OutcomeDisposition::Applied {
            PAYMENTS_TOTAL.with_label_values(&["refunded"]).inc();
            if let Some(entitlement) = &outcome.entitlement {
                ENTITLEMENT_ADJUSTMENTS_TOTAL
                    .with_label_values(&["refund_reversal"])
                    .inc();
                info!(
                    payment_id = %outcome.payment.payment_id,
                    views_limit = entitlement.views_limit,
                    "Gateway refund reversed entitlement"
                );
            }
        }

        Ok(outcome)
    }
}
