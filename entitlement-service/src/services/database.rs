//! PostgreSQL store for entitlement-service.
//!
//! Locks are always taken in the order payment, refund, promo code,
//! subscription so concurrent units of work cannot deadlock on each other.

use crate::error::EntitlementError;
use crate::models::{
    settlement_step, Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement,
    EntitlementAdjustment, NewPayment, NewRefund, OutcomeDisposition, Payment, PaymentOutcome,
    PaymentStatus, PromoCode, PromoRejection, PromoUsage, ReconciliationOutcome,
    Refund, RefundDecision, RefundDecisionOutcome, RefundStatus, SettlementStep, ViewReceipt,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::EntitlementStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "payment_id, user_id, package_id, view_allowance, order_value, \
     amount, currency, gateway_ref, status, promo_code, discount_amount, promo_status, \
     reconciled_utc, created_utc, updated_utc";

const REFUND_COLUMNS: &str = "refund_id, payment_id, user_id, amount, reason, status, \
     admin_notes, decided_by, created_utc, decided_utc";

const PROMO_COLUMNS: &str = "promo_id, code, discount_type, value, min_order_value, \
     max_discount, usage_limit, used_count, valid_from, valid_until, applicable_packages, \
     is_active, created_utc";

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> EntitlementError {
    move |e| EntitlementError::from_sqlx(context, e)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "entitlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, EntitlementError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(db_err("connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), EntitlementError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EntitlementError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, EntitlementError> {
        self.pool.begin().await.map_err(db_err("begin transaction"))
    }

    // -------------------------------------------------------------------------
    // Row locks
    // -------------------------------------------------------------------------

    /// Ensure the subscription row exists, lock it, and read the allowance.
    async fn lock_entitlement(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Entitlement, EntitlementError> {
        sqlx::query("INSERT INTO subscriptions (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(db_err("create subscription"))?;

        let views_limit: i64 =
            sqlx::query_scalar("SELECT views_limit FROM subscriptions WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_err("lock subscription"))?;

        // Under the row lock no other unit can insert views for this user.
        let views_used: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM profile_views WHERE viewer_id = $1")
                .bind(user_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_err("count views"))?;

        Ok(Entitlement::new(user_id, views_limit, views_used))
    }

    async fn lock_payment_by_ref(
        tx: &mut Transaction<'_, Postgres>,
        gateway_ref: &str,
    ) -> Result<Payment, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE gateway_ref = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(gateway_ref)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err("lock payment"))?
        .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    async fn lock_payment_by_id(
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
    ) -> Result<Payment, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err("lock payment"))?
        .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    // -------------------------------------------------------------------------
    // Ledger primitive
    // -------------------------------------------------------------------------

    async fn apply_adjustment_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
        package_id: Option<&str>,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        let current = Self::lock_entitlement(tx, user_id).await?;
        let resolved = adjustment.resolve(&current)?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET views_limit = $2,
                last_package_id = COALESCE($3, last_package_id),
                updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(resolved.views_limit_after)
        .bind(package_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("update views_limit"))?;

        sqlx::query(
            r#"
            INSERT INTO entitlement_adjustments (adjustment_id, user_id, source, delta, views_limit_after, reference)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(source.as_str())
        .bind(resolved.delta)
        .bind(resolved.views_limit_after)
        .bind(reference)
        .execute(&mut **tx)
        .await
        .map_err(db_err("insert adjustment"))?;

        Ok(AdjustmentOutcome {
            entitlement: Entitlement::new(user_id, resolved.views_limit_after, current.views_used),
            delta: resolved.delta,
        })
    }

    /// Lock the promo row, re-check eligibility and count one use for the
    /// payment inserted earlier in the same transaction.
    async fn reserve_promo_tx(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
        code: &str,
    ) -> Result<(), EntitlementError> {
        let promo = sqlx::query_as::<_, PromoCode>(&format!(
            "SELECT {} FROM promo_codes WHERE code = $1 FOR UPDATE",
            PROMO_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err("lock promo code"))?
        .ok_or(EntitlementError::PromoRejected(PromoRejection::NotFound))?;

        let quote = promo
            .evaluate(payment.order_value, &payment.package_id, Utc::now())
            .map_err(EntitlementError::PromoRejected)?;

        let incremented = sqlx::query(
            "UPDATE promo_codes SET used_count = used_count + 1 WHERE promo_id = $1 AND used_count < usage_limit",
        )
        .bind(promo.promo_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err("increment promo usage"))?;

        if incremented.rows_affected() != 1 {
            return Err(EntitlementError::PromoRejected(
                PromoRejection::UsageLimitReached,
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO promo_usages (usage_id, promo_id, user_id, payment_id, order_value, discount_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(promo.promo_id)
        .bind(payment.user_id)
        .bind(payment.payment_id)
        .bind(quote.order_value)
        .bind(quote.discount_amount)
        .execute(&mut **tx)
        .await
        .map_err(db_err("insert promo usage"))?;

        Ok(())
    }

    /// Hand back the use reserved by `payment`.
    async fn release_promo_tx(
        tx: &mut Transaction<'_, Postgres>,
        payment: &Payment,
        code: &str,
    ) -> Result<(), EntitlementError> {
        sqlx::query(
            "UPDATE promo_codes SET used_count = GREATEST(used_count - 1, 0) WHERE code = $1",
        )
        .bind(code)
        .execute(&mut **tx)
        .await
        .map_err(db_err("release promo usage"))?;

        sqlx::query("DELETE FROM promo_usages WHERE payment_id = $1")
            .bind(payment.payment_id)
            .execute(&mut **tx)
            .await
            .map_err(db_err("delete promo usage"))?;

        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), EntitlementError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("health check"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn route_identity(&self) -> Result<Uuid, EntitlementError> {
        sqlx::query_scalar("SELECT instance_id FROM store_identity")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("read store identity"))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_entitlement(&self, user_id: Uuid) -> Result<Entitlement, EntitlementError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_entitlement"])
            .start_timer();

        let row: (Option<i64>, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT views_limit FROM subscriptions WHERE user_id = $1),
                (SELECT COUNT(*) FROM profile_views WHERE viewer_id = $1)
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("get entitlement"))?;

        timer.observe_duration();

        Ok(Entitlement::new(user_id, row.0.unwrap_or(0), row.1))
    }

    #[instrument(skip(self), fields(user_id = %user_id, source = %source))]
    async fn adjust_views_limit(
        &self,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["adjust_views_limit"])
            .start_timer();

        let mut tx = self.begin().await?;
        let outcome =
            Self::apply_adjustment_tx(&mut tx, user_id, adjustment, source, reference, None)
                .await?;
        tx.commit().await.map_err(db_err("commit adjustment"))?;

        timer.observe_duration();

        Ok(outcome)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_adjustments(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<EntitlementAdjustment>, EntitlementError> {
        sqlx::query_as::<_, EntitlementAdjustment>(
            r#"
            SELECT adjustment_id, user_id, source, delta, views_limit_after, reference, created_utc
            FROM entitlement_adjustments
            WHERE user_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list adjustments"))
    }

    #[instrument(skip(self), fields(viewer_id = %viewer_id, viewed_profile_id = %viewed_profile_id))]
    async fn record_view(
        &self,
        viewer_id: Uuid,
        viewed_profile_id: Uuid,
    ) -> Result<ViewReceipt, EntitlementError> {
        if viewer_id == viewed_profile_id {
            return Err(EntitlementError::SelfViewRejected);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_view"])
            .start_timer();

        let mut tx = self.begin().await?;
        let current = Self::lock_entitlement(&mut tx, viewer_id).await?;

        let already_viewed: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM profile_views WHERE viewer_id = $1 AND viewed_profile_id = $2)",
        )
        .bind(viewer_id)
        .bind(viewed_profile_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("check view"))?;

        if already_viewed {
            tx.rollback().await.ok();
            return Ok(ViewReceipt {
                charged: false,
                remaining: current.remaining,
            });
        }

        if !current.can_view() {
            tx.rollback().await.ok();
            return Err(EntitlementError::QuotaExceeded);
        }

        sqlx::query("INSERT INTO profile_views (viewer_id, viewed_profile_id) VALUES ($1, $2)")
            .bind(viewer_id)
            .bind(viewed_profile_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("insert view"))?;

        tx.commit().await.map_err(db_err("commit view"))?;

        timer.observe_duration();

        Ok(ViewReceipt {
            charged: true,
            remaining: current.remaining - 1,
        })
    }

    #[instrument(skip(self, payment), fields(user_id = %payment.user_id, gateway_ref = %payment.gateway_ref))]
    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, EntitlementError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let inserted = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (payment_id, user_id, package_id, view_allowance, order_value, amount,
                                  currency, gateway_ref, promo_code, discount_amount, promo_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.payment_id)
        .bind(payment.user_id)
        .bind(&payment.package_id)
        .bind(payment.view_allowance)
        .bind(payment.order_value)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.gateway_ref)
        .bind(&payment.promo_code)
        .bind(payment.discount_amount)
        .bind(payment.promo_status().as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EntitlementError::Conflict(format!(
                    "gateway reference '{}' already recorded",
                    payment.gateway_ref
                ))
            }
            e => EntitlementError::from_sqlx("insert payment", e),
        })?;

        if let Some(code) = inserted.promo_code.as_deref() {
            Self::reserve_promo_tx(&mut tx, &inserted, code).await?;
        }

        tx.commit().await.map_err(db_err("commit payment"))?;

        timer.observe_duration();

        Ok(inserted)
    }

    #[instrument(skip(self), fields(payment_id = %payment_id))]
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get payment"))
    }

    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    async fn get_payment_by_ref(
        &self,
        gateway_ref: &str,
    ) -> Result<Option<Payment>, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE gateway_ref = $1",
            PAYMENT_COLUMNS
        ))
        .bind(gateway_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get payment by ref"))
    }

    #[instrument(skip(self))]
    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {} FROM payments
            WHERE status = 'pending' AND created_utc < $1
            ORDER BY created_utc
            LIMIT $2
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list stale pending payments"))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, EntitlementError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_utc DESC",
            PAYMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list payments"))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn count_pending_payments(&self, user_id: Uuid) -> Result<i64, EntitlementError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE user_id = $1 AND status = 'pending'")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("count pending payments"))
    }

    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    async fn complete_payment(
        &self,
        gateway_ref: &str,
    ) -> Result<ReconciliationOutcome, EntitlementError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_payment"])
            .start_timer();

        let mut tx = self.begin().await?;
        let payment = Self::lock_payment_by_ref(&mut tx, gateway_ref).await?;

        let step = settlement_step(payment.status, PaymentStatus::Completed)?;
        if step == SettlementStep::Duplicate && payment.is_reconciled() {
            tx.rollback().await.ok();
            return Ok(ReconciliationOutcome {
                payment,
                already_reconciled: true,
                entitlement: None,
            });
        }

        let adjustment = Self::apply_adjustment_tx(
            &mut tx,
            payment.user_id,
            Adjustment::Delta(payment.view_allowance),
            AdjustmentSource::Purchase,
            &payment.payment_id.to_string(),
            Some(&payment.package_id),
        )
        .await?;

        let updated = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = 'completed', reconciled_utc = NOW(), updated_utc = NOW()
            WHERE payment_id = $1 AND reconciled_utc IS NULL
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("mark payment reconciled"))?
        .ok_or_else(|| {
            EntitlementError::ConcurrentModification("payment reconciled concurrently".to_string())
        })?;

        tx.commit().await.map_err(db_err("commit reconciliation"))?;

        timer.observe_duration();

        info!(
            payment_id = %updated.payment_id,
            user_id = %updated.user_id,
            granted = updated.view_allowance,
            views_limit = adjustment.entitlement.views_limit,
            "Payment reconciled"
        );

        Ok(ReconciliationOutcome {
            payment: updated,
            already_reconciled: false,
            entitlement: Some(adjustment.entitlement),
        })
    }

    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    async fn fail_payment(&self, gateway_ref: &str) -> Result<PaymentOutcome, EntitlementError> {
        let mut tx = self.begin().await?;
        let payment = Self::lock_payment_by_ref(&mut tx, gateway_ref).await?;

        if settlement_step(payment.status, PaymentStatus::Failed)? == SettlementStep::Duplicate {
            tx.rollback().await.ok();
            return Ok(PaymentOutcome {
                payment,
                disposition: OutcomeDisposition::Duplicate,
                entitlement: None,
            });
        }

        if let (true, Some(code)) = (payment.holds_promo_use(), payment.promo_code.as_deref()) {
            Self::release_promo_tx(&mut tx, &payment, code).await?;
        }

        let updated = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = 'failed',
                promo_status = CASE WHEN promo_status = 'applied' THEN 'released' ELSE promo_status END,
                updated_utc = NOW()
            WHERE payment_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.payment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("fail payment"))?;

        tx.commit().await.map_err(db_err("commit payment failure"))?;

        Ok(PaymentOutcome {
            payment: updated,
            disposition: OutcomeDisposition::Applied,
            entitlement: None,
        })
    }

    #[instrument(skip(self), fields(gateway_ref = %gateway_ref))]
    async fn reverse_payment(&self, gateway_ref: &str) -> Result<PaymentOutcome, EntitlementError> {
        let mut tx = self.begin().await?;
        let payment = Self::lock_payment_by_ref(&mut tx, gateway_ref).await?;

        if settlement_step(payment.status, PaymentStatus::Refunded)? == SettlementStep::Duplicate {
            tx.rollback().await.ok();
            return Ok(PaymentOutcome {
                payment,
                disposition: OutcomeDisposition::Duplicate,
                entitlement: None,
            });
        }

        let updated = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments SET status = 'refunded', updated_utc = NOW()
            WHERE payment_id = $1 AND status = 'completed'
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.payment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("refund payment"))?;

        sqlx::query(
            r#"
            UPDATE refunds
            SET status = 'approved',
                admin_notes = COALESCE(admin_notes, 'closed by gateway refund'),
                decided_utc = NOW()
            WHERE payment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment.payment_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("close pending refunds"))?;

        let entitlement = if payment.is_reconciled() {
            let outcome = Self::apply_adjustment_tx(
                &mut tx,
                payment.user_id,
                Adjustment::RevokeUnused {
                    granted: payment.view_allowance,
                },
                AdjustmentSource::RefundReversal,
                &payment.payment_id.to_string(),
                None,
            )
            .await?;
            Some(outcome.entitlement)
        } else {
            None
        };

        tx.commit().await.map_err(db_err("commit gateway refund"))?;

        Ok(PaymentOutcome {
            payment: updated,
            disposition: OutcomeDisposition::Applied,
            entitlement,
        })
    }

    #[instrument(skip(self, refund), fields(payment_id = %refund.payment_id, user_id = %refund.user_id))]
    async fn create_refund(&self, refund: NewRefund) -> Result<Refund, EntitlementError> {
        let mut tx = self.begin().await?;
        let payment = Self::lock_payment_by_id(&mut tx, refund.payment_id).await?;

        if payment.user_id != refund.user_id {
            return Err(EntitlementError::RefundPolicyViolation(
                "payment belongs to another user".to_string(),
            ));
        }
        if payment.status != PaymentStatus::Completed {
            return Err(EntitlementError::RefundPolicyViolation(format!(
                "payment is {}",
                payment.status
            )));
        }

        let created = sqlx::query_as::<_, Refund>(&format!(
            r#"
            INSERT INTO refunds (refund_id, payment_id, user_id, amount, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(refund.refund_id)
        .bind(refund.payment_id)
        .bind(refund.user_id)
        .bind(payment.amount)
        .bind(&refund.reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EntitlementError::Conflict("a refund is already open for this payment".to_string())
            }
            e => EntitlementError::from_sqlx("insert refund", e),
        })?;

        tx.commit().await.map_err(db_err("commit refund request"))?;

        Ok(created)
    }

    #[instrument(skip(self, notes), fields(refund_id = %refund_id, admin_id = %admin_id))]
    async fn decide_refund(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
        notes: Option<&str>,
        admin_id: Uuid,
    ) -> Result<RefundDecisionOutcome, EntitlementError> {
        let payment_id: Uuid =
            sqlx::query_scalar("SELECT payment_id FROM refunds WHERE refund_id = $1")
                .bind(refund_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("find refund"))?
                .ok_or_else(|| EntitlementError::NotFound("refund".to_string()))?;

        let mut tx = self.begin().await?;
        let payment = Self::lock_payment_by_id(&mut tx, payment_id).await?;

        let refund = sqlx::query_as::<_, Refund>(&format!(
            "SELECT {} FROM refunds WHERE refund_id = $1 FOR UPDATE",
            REFUND_COLUMNS
        ))
        .bind(refund_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("lock refund"))?;

        if refund.status != RefundStatus::Pending {
            return Err(EntitlementError::RefundAlreadyDecided(refund.status));
        }

        let (payment, reversal, payment_refunded) = match decision {
            RefundDecision::Reject => (payment, None, false),
            RefundDecision::Approve => {
                match settlement_step(payment.status, PaymentStatus::Refunded)? {
                    SettlementStep::Duplicate => (payment, None, false),
                    SettlementStep::Apply => {
                        let updated = sqlx::query_as::<_, Payment>(&format!(
                            r#"
                            UPDATE payments SET status = 'refunded', updated_utc = NOW()
                            WHERE payment_id = $1 AND status = 'completed'
                            RETURNING {}
                            "#,
                            PAYMENT_COLUMNS
                        ))
                        .bind(payment.payment_id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(db_err("refund payment"))?;

                        let outcome = if payment.is_reconciled() {
                            Some(
                                Self::apply_adjustment_tx(
                                    &mut tx,
                                    payment.user_id,
                                    Adjustment::RevokeUnused {
                                        granted: payment.view_allowance,
                                    },
                                    AdjustmentSource::RefundReversal,
                                    &refund_id.to_string(),
                                    None,
                                )
                                .await?,
                            )
                        } else {
                            None
                        };
                        (updated, outcome, true)
                    }
                }
            }
        };

        let decided = sqlx::query_as::<_, Refund>(&format!(
            r#"
            UPDATE refunds
            SET status = $2, admin_notes = $3, decided_by = $4, decided_utc = NOW()
            WHERE refund_id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(refund_id)
        .bind(decision.status().as_str())
        .bind(notes)
        .bind(admin_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("decide refund"))?;

        tx.commit().await.map_err(db_err("commit refund decision"))?;

        if reversal.is_none() && decision == RefundDecision::Approve {
            warn!(refund_id = %refund_id, "Refund approved without an entitlement to reverse");
        }

        Ok(RefundDecisionOutcome {
            refund: decided,
            payment,
            payment_refunded,
            reversed_views: reversal.map(|o| -o.delta).unwrap_or(0),
            entitlement: reversal.map(|o| o.entitlement),
        })
    }

    #[instrument(skip(self))]
    async fn list_refunds(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<Refund>, EntitlementError> {
        sqlx::query_as::<_, Refund>(&format!(
            r#"
            SELECT {} FROM refunds
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc
            "#,
            REFUND_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list refunds"))
    }

    #[instrument(skip(self, promo), fields(code = %promo.code))]
    async fn create_promo_code(&self, promo: PromoCode) -> Result<PromoCode, EntitlementError> {
        sqlx::query_as::<_, PromoCode>(&format!(
            r#"
            INSERT INTO promo_codes (promo_id, code, discount_type, value, min_order_value, max_discount,
                                     usage_limit, used_count, valid_from, valid_until, applicable_packages,
                                     is_active, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            PROMO_COLUMNS
        ))
        .bind(promo.promo_id)
        .bind(&promo.code)
        .bind(promo.discount_type.as_str())
        .bind(promo.value)
        .bind(promo.min_order_value)
        .bind(promo.max_discount)
        .bind(promo.usage_limit)
        .bind(promo.used_count)
        .bind(promo.valid_from)
        .bind(promo.valid_until)
        .bind(&promo.applicable_packages)
        .bind(promo.is_active)
        .bind(promo.created_utc)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EntitlementError::Conflict(format!("promo code '{}' already exists", promo.code))
            }
            e => EntitlementError::from_sqlx("create promo code", e),
        })
    }

    #[instrument(skip(self))]
    async fn get_promo_code(&self, code: &str) -> Result<Option<PromoCode>, EntitlementError> {
        sqlx::query_as::<_, PromoCode>(&format!(
            "SELECT {} FROM promo_codes WHERE code = $1",
            PROMO_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get promo code"))
    }

    #[instrument(skip(self), fields(promo_id = %promo_id))]
    async fn list_promo_usages(
        &self,
        promo_id: Uuid,
    ) -> Result<Vec<PromoUsage>, EntitlementError> {
        sqlx::query_as::<_, PromoUsage>(
            r#"
            SELECT usage_id, promo_id, user_id, payment_id, order_value, discount_amount, used_utc
            FROM promo_usages
            WHERE promo_id = $1
            ORDER BY used_utc
            "#,
        )
        .bind(promo_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list promo usages"))
    }
}
