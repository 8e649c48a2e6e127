//! Subscription ledger model: allowances, adjustments and the refund
//! reversal policy.

use crate::error::EntitlementError;
use crate::models::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Who caused a change to `views_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentSource {
    Purchase,
    RefundReversal,
    Admin,
}

impl AdjustmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::RefundReversal => "refund_reversal",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for AdjustmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for AdjustmentSource {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "purchase" => Ok(Self::Purchase),
            "refund_reversal" => Ok(Self::RefundReversal),
            "admin" => Ok(Self::Admin),
            _ => Err(UnknownVariant {
                kind: "adjustment source",
                value,
            }),
        }
    }
}

/// A user's allowance as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: Uuid,
    pub views_limit: i64,
    pub views_used: i64,
    pub remaining: i64,
}

impl Entitlement {
    pub fn new(user_id: Uuid, views_limit: i64, views_used: i64) -> Self {
        Self {
            user_id,
            views_limit,
            views_used,
            remaining: (views_limit - views_used).max(0),
        }
    }

    /// A user nothing has been granted to yet.
    pub fn empty(user_id: Uuid) -> Self {
        Self::new(user_id, 0, 0)
    }

    pub fn can_view(&self) -> bool {
        self.remaining > 0
    }
}

/// A requested change to `views_limit`, resolved against the locked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Adjustment {
    /// Additive grant (positive) or revocation (negative).
    Delta(i64),
    /// Absolute allowance.
    SetTo(i64),
    /// Take back up to `granted` views, but only those not yet consumed.
    RevokeUnused { granted: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAdjustment {
    pub delta: i64,
    pub views_limit_after: i64,
}

impl Adjustment {
    pub fn resolve(&self, current: &Entitlement) -> Result<ResolvedAdjustment, EntitlementError> {
        let delta = match *self {
            Adjustment::Delta(n) => n,
            Adjustment::SetTo(n) => {
                if n < 0 {
                    return Err(EntitlementError::Validation(
                        "views_limit cannot be negative".to_string(),
                    ));
                }
                n - current.views_limit
            }
            Adjustment::RevokeUnused { granted } => {
                if granted < 0 {
                    return Err(EntitlementError::Validation(
                        "granted views cannot be negative".to_string(),
                    ));
                }
                -reversal_quantity(granted, current)
            }
        };

        let views_limit_after = current
            .views_limit
            .checked_add(delta)
            .ok_or_else(|| EntitlementError::Validation("views_limit overflow".to_string()))?;

        if views_limit_after < current.views_used {
            return Err(EntitlementError::AllowanceBelowUsage {
                requested: views_limit_after,
                views_used: current.views_used,
            });
        }

        Ok(ResolvedAdjustment {
            delta,
            views_limit_after,
        })
    }
}

/// How many of `granted` views to take back when the payment that granted
/// them is refunded: only what the user has not consumed.
pub fn reversal_quantity(granted: i64, entitlement: &Entitlement) -> i64 {
    granted.max(0).min(entitlement.remaining)
}

/// Audit row written for every applied adjustment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EntitlementAdjustment {
    pub adjustment_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub source: AdjustmentSource,
    pub delta: i64,
    pub views_limit_after: i64,
    pub reference: String,
    pub created_utc: DateTime<Utc>,
}

/// Result of `adjust_views_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjustmentOutcome {
    pub entitlement: Entitlement,
    pub delta: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ent(limit: i64, used: i64) -> Entitlement {
        Entitlement::new(Uuid::new_v4(), limit, used)
    }

    #[test]
    fn remaining_never_negative() {
        assert_eq!(ent(3, 5).remaining, 0);
        assert_eq!(ent(20, 5).remaining, 15);
        assert!(!ent(0, 0).can_view());
    }

    #[test]
    fn delta_stacks_on_existing_limit() {
        let r = Adjustment::Delta(50).resolve(&ent(20, 4)).unwrap();
        assert_eq!(r.delta, 50);
        assert_eq!(r.views_limit_after, 70);
    }

    #[test]
    fn set_to_resolves_to_delta() {
        let r = Adjustment::SetTo(10).resolve(&ent(25, 3)).unwrap();
        assert_eq!(r.delta, -15);
        assert_eq!(r.views_limit_after, 10);
    }

    #[test]
    fn set_to_below_usage_is_refused() {
        let err = Adjustment::SetTo(2).resolve(&ent(10, 5)).unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::AllowanceBelowUsage {
                requested: 2,
                views_used: 5
            }
        ));
    }

    #[test]
    fn negative_set_to_is_invalid() {
        assert!(matches!(
            Adjustment::SetTo(-1).resolve(&ent(0, 0)),
            Err(EntitlementError::Validation(_))
        ));
    }

    #[test]
    fn revoke_unused_takes_only_remaining() {
        // 50 granted, 45 of 70 used: only 25 remain.
        let r = Adjustment::RevokeUnused { granted: 50 }
            .resolve(&ent(70, 45))
            .unwrap();
        assert_eq!(r.delta, -25);
        assert_eq!(r.views_limit_after, 45);
    }

    #[test]
    fn revoke_unused_full_when_untouched() {
        let r = Adjustment::RevokeUnused { granted: 20 }
            .resolve(&ent(20, 0))
            .unwrap();
        assert_eq!(r.views_limit_after, 0);
    }

    #[test]
    fn reversal_quantity_bounds() {
        assert_eq!(reversal_quantity(20, &ent(20, 0)), 20);
        assert_eq!(reversal_quantity(20, &ent(70, 60)), 10);
        assert_eq!(reversal_quantity(20, &ent(20, 20)), 0);
        assert_eq!(reversal_quantity(-3, &ent(20, 0)), 0);
    }

    #[test]
    fn source_round_trips_through_storage_string() {
        for source in [
            AdjustmentSource::Purchase,
            AdjustmentSource::RefundReversal,
            AdjustmentSource::Admin,
        ] {
            let parsed = AdjustmentSource::try_from(source.as_str().to_string()).unwrap();
            assert_eq!(parsed, source);
        }
        assert!(AdjustmentSource::try_from("gift".to_string()).is_err());
    }
}
