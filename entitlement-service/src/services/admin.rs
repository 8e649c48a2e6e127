//! Admin override: manual allowance changes through the ledger primitive.

use crate::error::EntitlementError;
use crate::models::{Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement, EntitlementAdjustment};
use crate::services::ledger::SubscriptionLedger;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AdminOverride {
    ledger: SubscriptionLedger,
}

impl AdminOverride {
    pub fn new(ledger: SubscriptionLedger) -> Self {
        Self { ledger }
    }

    #[instrument(skip(self), fields(admin_id = %admin_id, user_id = %user_id))]
    pub async fn set_views_limit(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
        views_limit: i64,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        let outcome = self
            .ledger
            .adjust_views_limit(
                user_id,
                Adjustment::SetTo(views_limit),
                AdjustmentSource::Admin,
                &admin_id.to_string(),
            )
            .await?;
        info!(views_limit = views_limit, "Admin set views_limit");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(admin_id = %admin_id, user_id = %user_id))]
    pub async fn grant_views(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
        delta: i64,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        if delta == 0 {
            return Err(EntitlementError::Validation("delta must be non-zero".to_string()));
        }
        let outcome = self
            .ledger
            .adjust_views_limit(
                user_id,
                Adjustment::Delta(delta),
                AdjustmentSource::Admin,
                &admin_id.to_string(),
            )
            .await?;
        info!(delta = delta, "Admin adjusted views_limit");
        Ok(outcome)
    }

    /// Current allowance with its full audit trail.
    pub async fn inspect(
        &self,
        user_id: Uuid,
    ) -> Result<(Entitlement, Vec<EntitlementAdjustment>), EntitlementError> {
        let entitlement = self.ledger.get_entitlement(user_id).await?;
        let trail = self.ledger.list_adjustments(user_id).await?;
        Ok((entitlement, trail))
    }
}
