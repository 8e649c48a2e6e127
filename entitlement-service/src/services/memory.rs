//! In-memory store used by tests and local development.
//!
//! All state sits behind one async mutex, so every method is trivially one
//! atomic unit of work. Each handle carries its own availability switch;
//! [`MemoryStore::second_route`] returns a handle over the same state with an
//! independent switch, which is how tests model a fallback write path. A
//! store built with [`MemoryStore::new`] is a separate dataset with its own
//! route identity.

use crate::error::EntitlementError;
use crate::models::{
    settlement_step, Adjustment, AdjustmentOutcome, AdjustmentSource, Entitlement,
    EntitlementAdjustment, NewPayment, NewRefund, OutcomeDisposition, Payment, PaymentOutcome,
    PaymentStatus, PromoCode, PromoRejection, PromoStatus, PromoUsage, ReconciliationOutcome,
    Refund, RefundDecision, RefundDecisionOutcome, RefundStatus, SettlementStep, ViewReceipt,
};
use crate::services::store::EntitlementStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    views_limit: HashMap<Uuid, i64>,
    adjustments: Vec<EntitlementAdjustment>,
    views: HashSet<(Uuid, Uuid)>,
    views_used: HashMap<Uuid, i64>,
    payments: HashMap<Uuid, Payment>,
    payment_refs: HashMap<String, Uuid>,
    refunds: Vec<Refund>,
    promos: HashMap<String, PromoCode>,
    promo_usages: Vec<PromoUsage>,
}

impl MemoryState {
    fn entitlement(&self, user_id: Uuid) -> Entitlement {
        let views_limit = self.views_limit.get(&user_id).copied().unwrap_or(0);
        let views_used = self.views_used.get(&user_id).copied().unwrap_or(0);
        Entitlement::new(user_id, views_limit, views_used)
    }

    fn apply_adjustment(
        &mut self,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        let current = self.entitlement(user_id);
        let resolved = adjustment.resolve(&current)?;
        self.views_limit.insert(user_id, resolved.views_limit_after);

        self.adjustments.push(EntitlementAdjustment {
            adjustment_id: Uuid::new_v4(),
            user_id,
            source,
            delta: resolved.delta,
            views_limit_after: resolved.views_limit_after,
            reference: reference.to_string(),
            created_utc: Utc::now(),
        });

        Ok(AdjustmentOutcome {
            entitlement: Entitlement::new(user_id, resolved.views_limit_after, current.views_used),
            delta: resolved.delta,
        })
    }

    fn payment_id_for_ref(&self, gateway_ref: &str) -> Result<Uuid, EntitlementError> {
        self.payment_refs
            .get(gateway_ref)
            .copied()
            .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    fn payment(&self, payment_id: Uuid) -> Result<&Payment, EntitlementError> {
        self.payments
            .get(&payment_id)
            .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    fn payment_mut(&mut self, payment_id: Uuid) -> Result<&mut Payment, EntitlementError> {
        self.payments
            .get_mut(&payment_id)
            .ok_or_else(|| EntitlementError::NotFound("payment".to_string()))
    }

    /// Re-checks eligibility and counts one use for the payment.
    fn reserve_promo(&mut self, payment: &NewPayment, code: &str) -> Result<(), EntitlementError> {
        let promo = self
            .promos
            .get_mut(code)
            .ok_or(EntitlementError::PromoRejected(PromoRejection::NotFound))?;

        let quote = promo
            .evaluate(payment.order_value, &payment.package_id, Utc::now())
            .map_err(EntitlementError::PromoRejected)?;

        promo.used_count += 1;
        let promo_id = promo.promo_id;
        self.promo_usages.push(PromoUsage {
            usage_id: Uuid::new_v4(),
            promo_id,
            user_id: payment.user_id,
            payment_id: payment.payment_id,
            order_value: quote.order_value,
            discount_amount: quote.discount_amount,
            used_utc: Utc::now(),
        });
        Ok(())
    }

    fn release_promo(&mut self, payment: &Payment) {
        if let Some(promo) = payment
            .promo_code
            .as_deref()
            .and_then(|code| self.promos.get_mut(code))
        {
            promo.used_count = (promo.used_count - 1).max(0);
        }
        self.promo_usages
            .retain(|usage| usage.payment_id != payment.payment_id);
    }

    /// Reverses the unused part of a reconciled payment's grant.
    fn reverse_grant(
        &mut self,
        payment: &Payment,
        reference: &str,
    ) -> Result<Option<AdjustmentOutcome>, EntitlementError> {
        if !payment.is_reconciled() {
            return Ok(None);
        }
        self.apply_adjustment(
            payment.user_id,
            Adjustment::RevokeUnused {
                granted: payment.view_allowance,
            },
            AdjustmentSource::RefundReversal,
            reference,
        )
        .map(Some)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
    identity: Uuid,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
            identity: Uuid::new_v4(),
        }
    }

    /// Another handle over the same data with its own availability switch.
    pub fn second_route(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            unavailable: Arc::new(AtomicBool::new(false)),
            identity: self.identity,
        }
    }

    /// Simulates the backing store going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), EntitlementError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EntitlementError::Unavailable(
                "memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn health_check(&self) -> Result<(), EntitlementError> {
        self.ensure_available()
    }

    async fn route_identity(&self) -> Result<Uuid, EntitlementError> {
        self.ensure_available()?;
        Ok(self.identity)
    }

    async fn get_entitlement(&self, user_id: Uuid) -> Result<Entitlement, EntitlementError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.entitlement(user_id))
    }

    async fn adjust_views_limit(
        &self,
        user_id: Uuid,
        adjustment: Adjustment,
        source: AdjustmentSource,
        reference: &str,
    ) -> Result<AdjustmentOutcome, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.apply_adjustment(user_id, adjustment, source, reference)
    }

    async fn list_adjustments(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<EntitlementAdjustment>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .adjustments
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn record_view(
        &self,
        viewer_id: Uuid,
        viewed_profile_id: Uuid,
    ) -> Result<ViewReceipt, EntitlementError> {
        self.ensure_available()?;
        if viewer_id == viewed_profile_id {
            return Err(EntitlementError::SelfViewRejected);
        }

        let mut state = self.state.lock().await;
        let current = state.entitlement(viewer_id);

        if state.views.contains(&(viewer_id, viewed_profile_id)) {
            return Ok(ViewReceipt {
                charged: false,
                remaining: current.remaining,
            });
        }
        if !current.can_view() {
            return Err(EntitlementError::QuotaExceeded);
        }

        state.views.insert((viewer_id, viewed_profile_id));
        *state.views_used.entry(viewer_id).or_insert(0) += 1;

        Ok(ViewReceipt {
            charged: true,
            remaining: current.remaining - 1,
        })
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<Payment, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if state.payment_refs.contains_key(&payment.gateway_ref) {
            return Err(EntitlementError::Conflict(format!(
                "gateway reference '{}' already recorded",
                payment.gateway_ref
            )));
        }

        if let Some(code) = payment.promo_code.clone() {
            state.reserve_promo(&payment, &code)?;
        }

        let payment = payment.into_payment(Utc::now());
        state
            .payment_refs
            .insert(payment.gateway_ref.clone(), payment.payment_id);
        state.payments.insert(payment.payment_id, payment.clone());
        Ok(payment)
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, EntitlementError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn get_payment_by_ref(
        &self,
        gateway_ref: &str,
    ) -> Result<Option<Payment>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .payment_refs
            .get(gateway_ref)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn list_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut stale: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_utc < created_before)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(payments)
    }

    async fn count_pending_payments(&self, user_id: Uuid) -> Result<i64, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.user_id == user_id && p.status == PaymentStatus::Pending)
            .count() as i64)
    }

    async fn complete_payment(
        &self,
        gateway_ref: &str,
    ) -> Result<ReconciliationOutcome, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let payment_id = state.payment_id_for_ref(gateway_ref)?;
        let payment = state.payment(payment_id)?.clone();

        let step = settlement_step(payment.status, PaymentStatus::Completed)?;
        if step == SettlementStep::Duplicate && payment.is_reconciled() {
            return Ok(ReconciliationOutcome {
                payment,
                already_reconciled: true,
                entitlement: None,
            });
        }

        let adjustment = state.apply_adjustment(
            payment.user_id,
            Adjustment::Delta(payment.view_allowance),
            AdjustmentSource::Purchase,
            &payment.payment_id.to_string(),
        )?;

        let now = Utc::now();
        let stored = state.payment_mut(payment_id)?;
        stored.status = PaymentStatus::Completed;
        stored.reconciled_utc = Some(now);
        stored.updated_utc = now;

        Ok(ReconciliationOutcome {
            payment: stored.clone(),
            already_reconciled: false,
            entitlement: Some(adjustment.entitlement),
        })
    }

    async fn fail_payment(&self, gateway_ref: &str) -> Result<PaymentOutcome, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let payment_id = state.payment_id_for_ref(gateway_ref)?;
        let payment = state.payment(payment_id)?.clone();

        if settlement_step(payment.status, PaymentStatus::Failed)? == SettlementStep::Duplicate {
            return Ok(PaymentOutcome {
                payment,
                disposition: OutcomeDisposition::Duplicate,
                entitlement: None,
            });
        }

        if payment.holds_promo_use() {
            state.release_promo(&payment);
        }

        let stored = state.payment_mut(payment_id)?;
        stored.status = PaymentStatus::Failed;
        if stored.promo_status == PromoStatus::Applied {
            stored.promo_status = PromoStatus::Released;
        }
        stored.updated_utc = Utc::now();

        Ok(PaymentOutcome {
            payment: stored.clone(),
            disposition: OutcomeDisposition::Applied,
            entitlement: None,
        })
    }

    async fn reverse_payment(&self, gateway_ref: &str) -> Result<PaymentOutcome, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let payment_id = state.payment_id_for_ref(gateway_ref)?;
        let payment = state.payment(payment_id)?.clone();

        if settlement_step(payment.status, PaymentStatus::Refunded)? == SettlementStep::Duplicate {
            return Ok(PaymentOutcome {
                payment,
                disposition: OutcomeDisposition::Duplicate,
                entitlement: None,
            });
        }

        let reversal = state.reverse_grant(&payment, &payment.payment_id.to_string())?;

        let now = Utc::now();
        for refund in state
            .refunds
            .iter_mut()
            .filter(|r| r.payment_id == payment_id && r.status == RefundStatus::Pending)
        {
            refund.status = RefundStatus::Approved;
            refund
                .admin_notes
                .get_or_insert_with(|| "closed by gateway refund".to_string());
            refund.decided_utc = Some(now);
        }

        let stored = state.payment_mut(payment_id)?;
        stored.status = PaymentStatus::Refunded;
        stored.updated_utc = now;

        Ok(PaymentOutcome {
            payment: stored.clone(),
            disposition: OutcomeDisposition::Applied,
            entitlement: reversal.map(|o| o.entitlement),
        })
    }

    async fn create_refund(&self, refund: NewRefund) -> Result<Refund, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let payment = state.payment(refund.payment_id)?;

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
        let amount = payment.amount;

        if state
            .refunds
            .iter()
            .any(|r| r.payment_id == refund.payment_id && r.status != RefundStatus::Rejected)
        {
            return Err(EntitlementError::Conflict(
                "a refund is already open for this payment".to_string(),
            ));
        }

        let created = Refund {
            refund_id: refund.refund_id,
            payment_id: refund.payment_id,
            user_id: refund.user_id,
            amount,
            reason: refund.reason,
            status: RefundStatus::Pending,
            admin_notes: None,
            decided_by: None,
            created_utc: Utc::now(),
            decided_utc: None,
        };
        state.refunds.push(created.clone());
        Ok(created)
    }

    async fn decide_refund(
        &self,
        refund_id: Uuid,
        decision: RefundDecision,
        notes: Option<&str>,
        admin_id: Uuid,
    ) -> Result<RefundDecisionOutcome, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let refund = state
            .refunds
            .iter()
            .find(|r| r.refund_id == refund_id)
            .cloned()
            .ok_or_else(|| EntitlementError::NotFound("refund".to_string()))?;

        if refund.status != RefundStatus::Pending {
            return Err(EntitlementError::RefundAlreadyDecided(refund.status));
        }

        let payment = state.payment(refund.payment_id)?.clone();
        let mut reversal = None;
        let mut payment_refunded = false;

        let payment = match decision {
            RefundDecision::Reject => payment,
            RefundDecision::Approve => {
                match settlement_step(payment.status, PaymentStatus::Refunded)? {
                    SettlementStep::Duplicate => payment,
                    SettlementStep::Apply => {
                        reversal = state.reverse_grant(&payment, &refund_id.to_string())?;
                        let stored = state.payment_mut(payment.payment_id)?;
                        stored.status = PaymentStatus::Refunded;
                        stored.updated_utc = Utc::now();
                        payment_refunded = true;
                        stored.clone()
                    }
                }
            }
        };

        let stored = state
            .refunds
            .iter_mut()
            .find(|r| r.refund_id == refund_id)
            .ok_or_else(|| EntitlementError::NotFound("refund".to_string()))?;
        stored.status = decision.status();
        stored.admin_notes = notes.map(str::to_string);
        stored.decided_by = Some(admin_id);
        stored.decided_utc = Some(Utc::now());

        Ok(RefundDecisionOutcome {
            refund: stored.clone(),
            payment,
            payment_refunded,
            reversed_views: reversal.map(|o| -o.delta).unwrap_or(0),
            entitlement: reversal.map(|o| o.entitlement),
        })
    }

    async fn list_refunds(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<Refund>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .refunds
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn create_promo_code(&self, promo: PromoCode) -> Result<PromoCode, EntitlementError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if state.promos.contains_key(&promo.code) {
            return Err(EntitlementError::Conflict(format!(
                "promo code '{}' already exists",
                promo.code
            )));
        }
        state.promos.insert(promo.code.clone(), promo.clone());
        Ok(promo)
    }

    async fn get_promo_code(&self, code: &str) -> Result<Option<PromoCode>, EntitlementError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.promos.get(code).cloned())
    }

    async fn list_promo_usages(
        &self,
        promo_id: Uuid,
    ) -> Result<Vec<PromoUsage>, EntitlementError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state
            .promo_usages
            .iter()
            .filter(|u| u.promo_id == promo_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscountType, NewPromoCode};
    use rust_decimal::Decimal;

    fn pending(user_id: Uuid, gateway_ref: &str, allowance: i64) -> NewPayment {
        NewPayment {
            payment_id: Uuid::new_v4(),
            user_id,
            package_id: "silver".to_string(),
            view_allowance: allowance,
            order_value: Decimal::from(5000),
            amount: Decimal::from(5000),
            currency: "INR".to_string(),
            gateway_ref: gateway_ref.to_string(),
            promo_code: None,
            discount_amount: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn completion_grants_once() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_payment(pending(user, "order_1", 20)).await.unwrap();

        let first = store.complete_payment("order_1").await.unwrap();
        assert!(!first.already_reconciled);
        assert_eq!(first.entitlement.unwrap().views_limit, 20);

        let second = store.complete_payment("order_1").await.unwrap();
        assert!(second.already_reconciled);
        assert_eq!(store.get_entitlement(user).await.unwrap().views_limit, 20);
        assert_eq!(store.list_adjustments(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeat_view_is_free() {
        let store = MemoryStore::new();
        let viewer = Uuid::new_v4();
        let viewed = Uuid::new_v4();
        store
            .adjust_views_limit(viewer, Adjustment::Delta(1), AdjustmentSource::Admin, "t")
            .await
            .unwrap();

        assert!(store.record_view(viewer, viewed).await.unwrap().charged);
        let again = store.record_view(viewer, viewed).await.unwrap();
        assert!(!again.charged);
        assert_eq!(again.remaining, 0);
        assert!(matches!(
            store.record_view(viewer, Uuid::new_v4()).await,
            Err(EntitlementError::QuotaExceeded)
        ));
    }

    #[tokio::test]
    async fn gateway_refund_revokes_only_unused() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_payment(pending(user, "order_2", 3)).await.unwrap();
        store.complete_payment("order_2").await.unwrap();
        store.record_view(user, Uuid::new_v4()).await.unwrap();
        store.record_view(user, Uuid::new_v4()).await.unwrap();

        let outcome = store.reverse_payment("order_2").await.unwrap();
        assert_eq!(outcome.payment.status, PaymentStatus::Refunded);
        let ent = outcome.entitlement.unwrap();
        assert_eq!(ent.views_limit, 2);
        assert_eq!(ent.remaining, 0);
    }

    #[tokio::test]
    async fn switched_off_handle_fails_while_second_route_works() {
        let primary = MemoryStore::new();
        let fallback = primary.second_route();
        primary.set_available(false);

        let user = Uuid::new_v4();
        assert!(primary.get_entitlement(user).await.unwrap_err().is_unavailable());
        fallback.insert_payment(pending(user, "order_3", 20)).await.unwrap();

        primary.set_available(true);
        assert_eq!(primary.count_pending_payments(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn route_identity_follows_the_data() {
        let primary = MemoryStore::new();
        let same = primary.second_route();
        let other = MemoryStore::new();

        let id = primary.route_identity().await.unwrap();
        assert_eq!(same.route_identity().await.unwrap(), id);
        assert_ne!(other.route_identity().await.unwrap(), id);
    }

    fn single_use_promo() -> PromoCode {
        NewPromoCode {
            code: "ONCE".to_string(),
            discount_type: DiscountType::Fixed,
            value: Decimal::from(500),
            min_order_value: Decimal::ZERO,
            max_discount: None,
            usage_limit: 1,
            valid_from: Utc::now() - chrono::Duration::days(1),
            valid_until: Utc::now() + chrono::Duration::days(1),
            applicable_packages: Vec::new(),
            is_active: true,
        }
        .into_promo(Utc::now())
    }

    fn with_promo(user_id: Uuid, gateway_ref: &str) -> NewPayment {
        NewPayment {
            amount: Decimal::from(4500),
            promo_code: Some("ONCE".to_string()),
            discount_amount: Decimal::from(500),
            ..pending(user_id, gateway_ref, 20)
        }
    }

    #[tokio::test]
    async fn promo_use_is_reserved_when_the_payment_is_recorded() {
        let store = MemoryStore::new();
        store.create_promo_code(single_use_promo()).await.unwrap();

        let first = store
            .insert_payment(with_promo(Uuid::new_v4(), "order_p1"))
            .await
            .unwrap();
        assert_eq!(first.promo_status, PromoStatus::Applied);

        let err = store
            .insert_payment(with_promo(Uuid::new_v4(), "order_p2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::PromoRejected(PromoRejection::UsageLimitReached)
        ));
        assert!(store.get_payment_by_ref("order_p2").await.unwrap().is_none());

        let promo = store.get_promo_code("ONCE").await.unwrap().unwrap();
        assert_eq!(promo.used_count, 1);
        assert_eq!(store.list_promo_usages(promo.promo_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_an_order_hands_the_promo_use_back() {
        let store = MemoryStore::new();
        store.create_promo_code(single_use_promo()).await.unwrap();
        store
            .insert_payment(with_promo(Uuid::new_v4(), "order_p3"))
            .await
            .unwrap();

        let outcome = store.fail_payment("order_p3").await.unwrap();
        assert_eq!(outcome.payment.status, PaymentStatus::Failed);
        assert_eq!(outcome.payment.promo_status, PromoStatus::Released);

        let again = store.fail_payment("order_p3").await.unwrap();
        assert_eq!(again.disposition, OutcomeDisposition::Duplicate);

        let promo = store.get_promo_code("ONCE").await.unwrap().unwrap();
        assert_eq!(promo.used_count, 0);
        assert!(store.list_promo_usages(promo.promo_id).await.unwrap().is_empty());

        store
            .insert_payment(with_promo(Uuid::new_v4(), "order_p4"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_pending_lists_oldest_first() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_payment(pending(user, "order_s1", 20)).await.unwrap();
        store.insert_payment(pending(user, "order_s2", 20)).await.unwrap();
        store.insert_payment(pending(user, "order_s3", 20)).await.unwrap();
        store.complete_payment("order_s3").await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = store.list_stale_pending(cutoff, 10).await.unwrap();
        assert_eq!(stale.len(), 2);
        assert!(stale.iter().all(|p| p.status == PaymentStatus::Pending));
        assert!(stale[0].created_utc <= stale[1].created_utc);

        assert_eq!(store.list_stale_pending(cutoff, 1).await.unwrap().len(), 1);
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store.list_stale_pending(past, 10).await.unwrap().is_empty());
    }
}
