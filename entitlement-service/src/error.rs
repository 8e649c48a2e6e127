//! Domain errors for the entitlement subsystem and their HTTP mapping.

use crate::models::{PaymentStatus, PromoRejection, RefundStatus};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no profile views remaining")]
    QuotaExceeded,

    #[error("a profile cannot be viewed by its owner")]
    SelfViewRejected,

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Unauthorized(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("refund not allowed: {0}")]
    RefundPolicyViolation(String),

    #[error("refund already {0}")]
    RefundAlreadyDecided(RefundStatus),

    #[error("payment cannot move from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("views_limit {requested} would fall below views_used {views_used}")]
    AllowanceBelowUsage { requested: i64, views_used: i64 },

    #[error("promo code rejected: {0}")]
    PromoRejected(PromoRejection),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl EntitlementError {
    /// Machine-readable identifier returned in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationFailed",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::SelfViewRejected => "SelfViewRejected",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Gateway(_) => "GatewayError",
            Self::RefundPolicyViolation(_) => "RefundPolicyViolation",
            Self::RefundAlreadyDecided(_) => "RefundAlreadyDecided",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::AllowanceBelowUsage { .. } => "AllowanceBelowUsage",
            Self::PromoRejected(_) => "PromoRejected",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::ConcurrentModification(_) => "ConcurrentModification",
            Self::Unavailable(_) => "ServiceUnavailable",
            Self::Database(_) => "DatabaseError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Maps a sqlx failure onto the taxonomy. Serialization failures,
    /// deadlocks and lock timeouts mean the atomic update did not happen and
    /// may be retried; pool and transport failures mean the store is down.
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => {
                    Self::ConcurrentModification(format!("{}: {}", context, db_err))
                }
                Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                    Self::Unavailable(format!("{}: {}", context, db_err))
                }
                _ => Self::Database(anyhow::anyhow!("{}: {}", context, err)),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Unavailable(format!("{}: {}", context, err)),
            _ => Self::Database(anyhow::anyhow!("{}: {}", context, err)),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Retryable for EntitlementError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        let code = err.code();
        match err {
            EntitlementError::Unauthenticated(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            EntitlementError::Unauthorized(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            EntitlementError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            EntitlementError::Gateway(msg) => AppError::BadGateway(msg),
            EntitlementError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Storage unavailable, failing closed");
                AppError::ServiceUnavailable(Some(1))
            }
            EntitlementError::Database(e) => AppError::DatabaseError(e),
            EntitlementError::Internal(e) => AppError::InternalError(e),
            other => {
                let status = match &other {
                    EntitlementError::Validation(_) => StatusCode::BAD_REQUEST,
                    EntitlementError::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
                    EntitlementError::Conflict(_)
                    | EntitlementError::ConcurrentModification(_)
                    | EntitlementError::InvalidTransition { .. }
                    | EntitlementError::RefundAlreadyDecided(_) => StatusCode::CONFLICT,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                AppError::rejected(status, code, other.to_string())
            }
        }
    }
}

impl IntoResponse for EntitlementError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}
