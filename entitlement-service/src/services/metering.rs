//! View metering: charges one view per new (viewer, viewed) pair.

use crate::error::EntitlementError;
use crate::models::{ViewGate, ViewReceipt};
use crate::services::metrics::{record_error, VIEWS_RECORDED_TOTAL};
use crate::services::store::SharedStore;
use service_core::retry::{retry_with_backoff, RetryConfig};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ViewMetering {
    store: SharedStore,
    retry: RetryConfig,
}

impl ViewMetering {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            retry: RetryConfig::quick(),
        }
    }

    /// Records a view. Repeat views succeed with `charged = false`; the
    /// quota check and insert run as one atomic step in the store.
    #[instrument(skip(self), fields(viewer_id = %viewer_id, viewed_profile_id = %viewed_profile_id))]
    pub async fn record_view(
        &self,
        viewer_id: Uuid,
        viewed_profile_id: Uuid,
    ) -> Result<ViewReceipt, EntitlementError> {
        let result = retry_with_backoff(&self.retry, "record_view", || {
            self.store.record_view(viewer_id, viewed_profile_id)
        })
        .await;

        let outcome = match &result {
            Ok(receipt) if receipt.charged => "charged",
            Ok(_) => "repeat",
            Err(EntitlementError::QuotaExceeded) => "quota_exceeded",
            Err(EntitlementError::SelfViewRejected) => "self_view",
            Err(_) => "error",
        };
        VIEWS_RECORDED_TOTAL.with_label_values(&[outcome]).inc();

        match &result {
            Ok(receipt) => info!(charged = receipt.charged, remaining = receipt.remaining, "View recorded"),
            Err(e) => {
                record_error(e);
                info!(outcome = outcome, "View refused");
            }
        }

        result
    }

    /// Whether the user has at least one unconsumed view.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn can_view_more(&self, user_id: Uuid) -> Result<ViewGate, EntitlementError> {
        let entitlement = self.store.get_entitlement(user_id).await?;
        Ok(ViewGate {
            can_view: entitlement.can_view(),
            remaining: entitlement.remaining,
        })
    }

    /// `can_view_more` that denies on any lookup failure.
    pub async fn gate(&self, user_id: Uuid) -> ViewGate {
        match self.can_view_more(user_id).await {
            Ok(gate) => gate,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Entitlement lookup failed, denying");
                record_error(&e);
                ViewGate::closed()
            }
        }
    }
}
