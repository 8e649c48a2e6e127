//! Subscription ledger: the one place `views_limit` is changed.

use crate::error::EntitlementError;
use crate::models::{
    Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement, EntitlementAdjustment,
};
use crate::services::metrics::{record_error, ENTITLEMENT_ADJUSTMENTS_TOTAL};
use crate::services::store::SharedStore;
use service_core::retry::{retry_with_backoff, RetryConfig};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct SubscriptionLedger {
    store: SharedStore,
    retry: RetryConfig,
}

impl SubscriptionLedger {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            retry: RetryConfig::quick(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_entitlement(&self, user_id: Uuid) -> Result<Entitlement, EntitlementError> {
        self.store.get_entitlement(user_id).await
    }

    /// Applies `adjustment` atomically against the user's locked row,
    /// retrying when the store reports contention.
    #[instrument(skip(self), fields(user_id = %user_id, source = %source))]
    pub async fn adjust_views_limit(
        &self,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        let result = retry_with_backoff(&self.retry, "adjust_views_limit", || {
            self.store
                .adjust_views_limit(user_id, adjustment, source, reference)
        })
        .await;

        match &result {
            Ok(outcome) => {
                ENTITLEMENT_ADJUSTMENTS_TOTAL
                    .with_label_values(&[source.as_str()])
                    .inc();
                info!(
                    delta = outcome.delta,
                    views_limit = outcome.entitlement.views_limit,
                    reference = %reference,
                    "Entitlement adjusted"
                );
            }
            Err(e) => record_error(e),
        }

        result
    }

    pub async fn list_adjustments(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<EntitlementAdjustment>, EntitlementError> {
        self.store.list_adjustments(user_id).await
    }
}
