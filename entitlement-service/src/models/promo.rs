//! Promo codes: discount rules and eligibility.

use crate::error::EntitlementError;
use crate::models::UnknownVariant;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

impl TryFrom<String> for DiscountType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "percentage" => Ok(Self::Percentage),
            "fixed" => Ok(Self::Fixed),
            _ => Err(UnknownVariant {
                kind: "discount type",
                value,
            }),
        }
    }
}

/// Why a promo code cannot be used for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoRejection {
    NotFound,
    Inactive,
    NotStarted,
    Expired,
    UsageLimitReached,
    BelowMinOrder,
    NotApplicable,
}

impl PromoRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::NotStarted => "not_started",
            Self::Expired => "expired",
            Self::UsageLimitReached => "usage_limit_reached",
            Self::BelowMinOrder => "below_min_order",
            Self::NotApplicable => "not_applicable",
        }
    }
}

impl std::fmt::Display for PromoRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PromoCode {
    pub promo_id: Uuid,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_order_value: Decimal,
    /// Cap for percentage discounts.
    pub max_discount: Option<Decimal>,
    pub usage_limit: i64,
    pub used_count: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Package ids the code applies to; empty means all.
    pub applicable_packages: Vec<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Priced outcome of applying a promo code to an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoQuote {
    pub code: String,
    pub order_value: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Codes are matched case-insensitively and stored upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl PromoCode {
    /// Discount for `order_value`, never more than the order itself.
    pub fn discount_for(&self, order_value: Decimal) -> Decimal {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = (order_value * self.value / Decimal::from(100)).round_dp(2);
                match self.max_discount {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            DiscountType::Fixed => self.value,
        };
        raw.min(order_value).max(Decimal::ZERO)
    }

    /// Checks every eligibility rule, in a fixed order, and prices the order.
    pub fn evaluate(
        &self,
        order_value: Decimal,
        package_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PromoQuote, PromoRejection> {
        if !self.is_active {
            return Err(PromoRejection::Inactive);
        }
        if now < self.valid_from {
            return Err(PromoRejection::NotStarted);
        }
        if now > self.valid_until {
            return Err(PromoRejection::Expired);
        }
        if !self.applicable_packages.is_empty()
            && !self.applicable_packages.iter().any(|p| p == package_id)
        {
            return Err(PromoRejection::NotApplicable);
        }
        if order_value < self.min_order_value {
            return Err(PromoRejection::BelowMinOrder);
        }
        if self.used_count >= self.usage_limit {
            return Err(PromoRejection::UsageLimitReached);
        }

        let discount_amount = self.discount_for(order_value);
        Ok(PromoQuote {
            code: self.code.clone(),
            order_value,
            discount_amount,
            final_amount: order_value - discount_amount,
        })
    }
}

/// Admin input for a new promo code.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub usage_limit: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub applicable_packages: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewPromoCode {
    pub fn validate(&self) -> Result<(), EntitlementError> {
        let invalid = |msg: &str| Err(EntitlementError::Validation(msg.to_string()));

        if normalize_code(&self.code).is_empty() {
            return invalid("code is required");
        }
        if self.value <= Decimal::ZERO {
            return invalid("value must be positive");
        }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::from(100) {
            return invalid("percentage cannot exceed 100");
        }
        if self.min_order_value < Decimal::ZERO {
            return invalid("min_order_value cannot be negative");
        }
        if matches!(self.max_discount, Some(cap) if cap <= Decimal::ZERO) {
            return invalid("max_discount must be positive");
        }
        if self.usage_limit <= 0 {
            return invalid("usage_limit must be positive");
        }
        if self.valid_until <= self.valid_from {
            return invalid("valid_until must be after valid_from");
        }
        Ok(())
    }

    pub fn into_promo(self, now: DateTime<Utc>) -> PromoCode {
        PromoCode {
            promo_id: Uuid::new_v4(),
            code: normalize_code(&self.code),
            discount_type: self.discount_type,
            value: self.value,
            min_order_value: self.min_order_value,
            max_discount: self.max_discount,
            usage_limit: self.usage_limit,
            used_count: 0,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            applicable_packages: self.applicable_packages,
            is_active: self.is_active,
            created_utc: now,
        }
    }
}

/// One honored use of a promo code; pairs with a `used_count` increment.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PromoUsage {
    pub usage_id: Uuid,
    pub promo_id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Uuid,
    pub order_value: Decimal,
    pub discount_amount: Decimal,
    pub used_utc: DateTime<Utc>,
}
