//! Payment adapter: checkout initiation and gateway outcome ingestion.

use crate::config::PurchasePolicyConfig;
use crate::error::EntitlementError;
use crate::models::{
    normalize_code, CheckoutSession, ExpiryReport, NewPayment, OutcomeDisposition, Payment,
    PaymentOutcome, PaymentStatus, PackageCatalog, PromoStatus,
};
use crate::services::gateway::PaymentGateway;
use crate::services::metrics::{record_error, PAYMENTS_TOTAL, PROMO_REDEMPTIONS_TOTAL};
use crate::services::promo::PromoService;
use crate::services::reconciler::EntitlementReconciler;
use crate::services::store::SharedStore;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Single write interface for new payments. The secondary store is tried
/// only when the primary reports itself unavailable; every other error,
/// constraint violations included, is returned as is.
///
/// The secondary must be another route to the same data: settlement,
/// refunds and reads only ever go through the primary.
#[derive(Clone)]
pub struct PaymentWriter {
    primary: SharedStore,
    fallback: Option<SharedStore>,
}

impl PaymentWriter {
    pub fn new(primary: SharedStore, fallback: Option<SharedStore>) -> Self {
        Self { primary, fallback }
    }

    /// Accepts `fallback` only when it reaches the same data as `primary`.
    pub async fn verify_fallback(
        primary: &SharedStore,
        fallback: SharedStore,
    ) -> Result<SharedStore, EntitlementError> {
        let expected = primary.route_identity().await?;
        let actual = fallback.route_identity().await?;
        if expected != actual {
            return Err(EntitlementError::Validation(format!(
                "fallback route reaches store {} but the primary is {}",
                actual, expected
            )));
        }
        info!(store = %expected, "Fallback route verified");
        Ok(fallback)
    }

    #[instrument(skip(self, payment), fields(gateway_ref = %payment.gateway_ref))]
    pub async fn insert(&self, payment: NewPayment) -> Result<Payment, EntitlementError> {
        match self.primary.insert_payment(payment.clone()).await {
            Err(e) if e.is_unavailable() => match &self.fallback {
                Some(fallback) => {
                    warn!(error = %e, "Primary payment store unavailable, using fallback");
                    fallback.insert_payment(payment).await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    pub async fn count_pending(&self, user_id: Uuid) -> Result<i64, EntitlementError> {
        match self.primary.count_pending_payments(user_id).await {
            Err(e) if e.is_unavailable() => match &self.fallback {
                Some(fallback) => fallback.count_pending_payments(user_id).await,
                None => Err(e),
            },
            other => other,
        }
    }
}

/// A checkout request as received from the client.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub package_id: String,
    pub amount: Decimal,
    pub view_allowance: i64,
    pub promo_code: Option<String>,
}

#[derive(Clone)]
pub struct PaymentAdapter {
    store: SharedStore,
    writer: PaymentWriter,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PackageCatalog>,
    promos: PromoService,
    reconciler: EntitlementReconciler,
    max_pending_payments: i64,
    pending_expiry: Duration,
    expiry_batch_size: i64,
    retry: RetryConfig,
}

impl PaymentAdapter {
    pub fn new(
        store: SharedStore,
        writer: PaymentWriter,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PackageCatalog>,
        policy: &PurchasePolicyConfig,
    ) -> Self {
        Self {
            promos: PromoService::new(store.clone()),
            reconciler: EntitlementReconciler::new(store.clone()),
            store,
            writer,
            gateway,
            catalog,
            max_pending_payments: policy.max_pending_payments,
            pending_expiry: Duration::minutes(policy.pending_expiry_minutes),
            expiry_batch_size: policy.expiry_batch_size,
            retry: RetryConfig::quick(),
        }
    }

    /// Validates the purchase against the catalog, creates the gateway order
    /// and records the payment as pending.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, package_id = %request.package_id))]
    pub async fn initiate(
        &self,
        request: PurchaseRequest,
    ) -> Result<(Payment, CheckoutSession), EntitlementError> {
        let package = self.catalog.get(&request.package_id).ok_or_else(|| {
            EntitlementError::Validation(format!("unknown package '{}'", request.package_id))
        })?;

        if request.view_allowance != package.view_allowance {
            return Err(EntitlementError::Validation(format!(
                "view_allowance {} does not match package allowance {}",
                request.view_allowance, package.view_allowance
            )));
        }

        let promo_code = request
            .promo_code
            .as_deref()
            .map(normalize_code)
            .filter(|code| !code.is_empty());

        let (discount_amount, expected) = match &promo_code {
            Some(code) => {
                let quote = self
                    .promos
                    .validate(code, package.price, &package.id)
                    .await?
                    .map_err(EntitlementError::PromoRejected)?;
                (quote.discount_amount, quote.final_amount)
            }
            None => (Decimal::ZERO, package.price),
        };

        if request.amount != expected {
            return Err(EntitlementError::Validation(format!(
                "amount {} does not match expected charge {}",
                request.amount, expected
            )));
        }

        // Fail closed: no purchase when pending payments cannot be counted.
        let pending = self.writer.count_pending(request.user_id).await?;
        if pending >= self.max_pending_payments {
            return Err(EntitlementError::Conflict(format!(
                "{} payments already awaiting confirmation",
                pending
            )));
        }

        let payment_id = Uuid::new_v4();
        let order = self
            .gateway
            .create_order(expected, &package.currency, &payment_id.to_string())
            .await
            .inspect_err(record_error)?;

        // The promo use is reserved here; a code exhausted since validation
        // leaves the gateway order unused.
        let payment = self
            .writer
            .insert(NewPayment {
                payment_id,
                user_id: request.user_id,
                package_id: package.id.clone(),
                view_allowance: package.view_allowance,
                order_value: package.price,
                amount: expected,
                currency: package.currency.clone(),
                gateway_ref: order.id.clone(),
                promo_code,
                discount_amount,
            })
            .await
            .inspect_err(|e| {
                if let EntitlementError::PromoRejected(rejection) = e {
                    PROMO_REDEMPTIONS_TOTAL
                        .with_label_values(&[rejection.as_str()])
                        .inc();
                }
                record_error(e);
            })?;

        PAYMENTS_TOTAL.with_label_values(&["pending"]).inc();
        if payment.holds_promo_use() {
            PROMO_REDEMPTIONS_TOTAL.with_label_values(&["reserved"]).inc();
        }
        info!(
            payment_id = %payment.payment_id,
            gateway_ref = %payment.gateway_ref,
            amount = %payment.amount,
            "Payment initiated"
        );

        let session = CheckoutSession {
            redirect_url: self.gateway.checkout_url(&order.id),
            gateway_ref: order.id,
            key_id: self.gateway.key_id().to_string(),
        };

        Ok((payment, session))
    }

    /// Applies a settlement outcome from the gateway or the expiry pass. Safe
    /// under at-least-once delivery: a payment already in the requested
    /// state is reported as a duplicate.
    #[instrument(skip(self), fields(gateway_ref = %gateway_ref, status = %new_status))]
    pub async fn ingest_outcome(
        &self,
        gateway_ref: &str,
        new_status: PaymentStatus,
    ) -> Result<PaymentOutcome, EntitlementError> {
        let outcome = match new_status {
            PaymentStatus::Completed => {
                let reconciled = self.reconciler.on_payment_completed(gateway_ref).await?;
                PaymentOutcome {
                    disposition: if reconciled.already_reconciled {
                        OutcomeDisposition::Duplicate
                    } else {
                        OutcomeDisposition::Applied
                    },
                    payment: reconciled.payment,
                    entitlement: reconciled.entitlement,
                }
            }
            PaymentStatus::Failed => {
                let outcome = retry_with_backoff(&self.retry, "fail_payment", || {
                    self.store.fail_payment(gateway_ref)
                })
                .await
                .inspect_err(record_error)?;
                if outcome.disposition == OutcomeDisposition::Applied {
                    PAYMENTS_TOTAL.with_label_values(&["failed"]).inc();
                    if outcome.payment.promo_status == PromoStatus::Released {
                        PROMO_REDEMPTIONS_TOTAL.with_label_values(&["released"]).inc();
                    }
                }
                outcome
            }
            PaymentStatus::Refunded => self.reconciler.on_payment_refunded(gateway_ref).await?,
            PaymentStatus::Pending => {
                return Err(EntitlementError::Validation(
                    "pending is not a gateway outcome".to_string(),
                ))
            }
        };

        match outcome.disposition {
            OutcomeDisposition::Duplicate => info!(
                payment_id = %outcome.payment.payment_id,
                "Duplicate gateway notification"
            ),
            OutcomeDisposition::Applied => info!(
                payment_id = %outcome.payment.payment_id,
                status = %outcome.payment.status,
                "Gateway outcome applied"
            ),
        }

        Ok(outcome)
    }

    /// A single payment attempt failed at the gateway. The order stays open
    /// for a retry, so the payment stays pending.
    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    pub async fn record_failed_attempt(
        &self,
        gateway_ref: &str,
        attempt_id: Option<&str>,
    ) -> Result<Payment, EntitlementError> {
        let payment = self
            .store
            .get_payment_by_ref(gateway_ref)
            .await?
            .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))?;

        PAYMENTS_TOTAL.with_label_values(&["attempt_failed"]).inc();
        warn!(
            payment_id = %payment.payment_id,
            attempt_id = attempt_id.unwrap_or("-"),
            status = %payment.status,
            "Payment attempt failed; order remains open"
        );

        Ok(payment)
    }

    /// Settles payments left pending past the expiry window by asking the
    /// gateway for the order: paid orders are completed, unpaid ones fail
    /// and release any promo use they hold.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self) -> Result<ExpiryReport, EntitlementError> {
        let cutoff = Utc::now() - self.pending_expiry;
        let stale = self
            .store
            .list_stale_pending(cutoff, self.expiry_batch_size)
            .await
            .inspect_err(record_error)?;

        let mut report = ExpiryReport {
            examined: stale.len(),
            ..ExpiryReport::default()
        };

        for payment in stale {
            let order = match self.gateway.fetch_order(&payment.gateway_ref).await {
                Ok(order) => order,
                Err(e) => {
                    record_error(&e);
                    warn!(
                        payment_id = %payment.payment_id,
                        error = %e,
                        "Order state unavailable; payment left pending"
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            let target = if order.is_paid() {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Failed
            };

            match self.ingest_outcome(&payment.gateway_ref, target).await {
                Ok(outcome) if outcome.disposition == OutcomeDisposition::Applied => match target {
                    PaymentStatus::Completed => report.completed += 1,
                    _ => report.expired += 1,
                },
                Ok(_) => report.skipped += 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    warn!(
                        payment_id = %payment.payment_id,
                        error = %e,
                        "Payment settled while expiring; left as is"
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            completed = report.completed,
            expired = report.expired,
            skipped = report.skipped,
            "Stale payment pass finished"
        );
        Ok(report)
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, EntitlementError> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    pub async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, EntitlementError> {
        self.store.list_payments(user_id).await
    }
}
