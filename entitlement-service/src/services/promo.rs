//! Promo code lookup and read-only evaluation. A use is reserved when the
//! payment is recorded, see `EntitlementStore::insert_payment`.

use crate::error::EntitlementError;
use crate::models::{
    normalize_code, NewPromoCode, PromoCode, PromoQuote, PromoRejection, PromoUsage,
};
use crate::services::store::SharedStore;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct PromoService {
    store: SharedStore,
}

impl PromoService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Prices an order with `code` without consuming a use. The outer error
    /// is for storage failures; the inner one is the typed rejection.
    #[instrument(skip(self), fields(order_value = %order_value))]
    pub async fn validate(
        &self,
        code: &str,
        order_value: Decimal,
        package_id: &str,
    ) -> Result<Result<PromoQuote, PromoRejection>, EntitlementError> {
        if order_value <= Decimal::ZERO {
            return Err(EntitlementError::Validation(
                "order_value must be positive".to_string(),
            ));
        }

        let Some(promo) = self.store.get_promo_code(&normalize_code(code)).await? else {
            return Ok(Err(PromoRejection::NotFound));
        };

        Ok(promo.evaluate(order_value, package_id, Utc::now()))
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: NewPromoCode) -> Result<PromoCode, EntitlementError> {
        input.validate()?;
        let promo = self.store.create_promo_code(input.into_promo(Utc::now())).await?;
        info!(promo_id = %promo.promo_id, code = %promo.code, "Promo code created");
        Ok(promo)
    }

    /// The code and every use counted against it.
    pub async fn detail(
        &self,
        code: &str,
    ) -> Result<(PromoCode, Vec<PromoUsage>), EntitlementError> {
        let promo = self
            .store
            .get_promo_code(&normalize_code(code))
            .await?
            .ok_or_else(|| EntitlementError::NotFound("promo code".to_string()))?;
        let usages = self.store.list_promo_usages(promo.promo_id).await?;
        Ok((promo, usages))
    }
}
