//! HTTP handlers for entitlement-service.

pub mod admin;
pub mod health;
pub mod payments;
pub mod promo;
pub mod refunds;
pub mod views;
