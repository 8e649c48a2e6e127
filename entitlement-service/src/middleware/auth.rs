use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::error::EntitlementError;
use crate::services::SessionClaims;
use crate::startup::AppState;

/// Middleware to require a valid session token
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            EntitlementError::Unauthenticated("missing or invalid Authorization header".to_string())
        })?;

    let claims = state.sessions.validate(token).map_err(|e| {
        tracing::warn!(error = %e, "Session token rejected");
        e
    })?;

    // Store claims in request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor for the verified session of the caller
pub struct AuthSession(pub SessionClaims);

impl AuthSession {
    pub fn user_id(&self) -> Uuid {
        self.0.sub
    }

    /// Body-supplied user ids must name the caller.
    pub fn ensure_self(&self, user_id: Uuid) -> Result<(), EntitlementError> {
        if user_id != self.0.sub {
            return Err(EntitlementError::Unauthorized(
                "cannot act on behalf of another user".to_string(),
            ));
        }
        Ok(())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<SessionClaims>().ok_or_else(|| {
            AppError::from(EntitlementError::Unauthenticated(
                "session missing from request".to_string(),
            ))
        })?;

        Ok(AuthSession(claims.clone()))
    }
}

/// Extractor that only admits sessions whose verified role is admin
pub struct AdminSession(pub SessionClaims);

impl AdminSession {
    pub fn admin_id(&self) -> Uuid {
        self.0.sub
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthSession(claims) = AuthSession::from_request_parts(parts, state).await?;

        if !claims.is_admin() {
            tracing::warn!(user_id = %claims.sub, "Non-admin session on admin route");
            return Err(EntitlementError::Unauthorized("admin role required".to_string()).into());
        }

        Ok(AdminSession(claims))
    }
}
