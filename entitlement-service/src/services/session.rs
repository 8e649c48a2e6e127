use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::EntitlementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Claims carried by a session token. The role is only ever read from
/// here, after the signature has been verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub role: Role,
    pub iss: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

impl SessionClaims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    token_ttl_minutes: i64,
}

impl SessionService {
    pub fn new(config: &SessionConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            token_ttl_minutes: config.token_ttl_minutes,
        }
    }

    /// Generate a session token for a user
    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, EntitlementError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.token_ttl_minutes);

        let claims = SessionClaims {
            sub: user_id,
            role,
            iss: self.issuer.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                EntitlementError::Internal(anyhow::anyhow!("Failed to encode session token: {}", e))
            })
    }

    /// Validate and decode a session token
    pub fn validate(&self, token: &str) -> Result<SessionClaims, EntitlementError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| EntitlementError::Unauthenticated(format!("invalid session token: {}", e)))?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn service(secret: &str) -> SessionService {
        SessionService::new(&SessionConfig {
            jwt_secret: Secret::new(secret.to_string()),
            issuer: "entitlement-service".to_string(),
            token_ttl_minutes: 5,
        })
    }

    #[test]
    fn test_round_trip() {
        let sessions = service("test-secret");
        let user = Uuid::new_v4();
        let token = sessions.issue(user, Role::Admin).unwrap();

        let claims = sessions.validate(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert!(claims.is_admin());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let token = service("other-secret")
            .issue(Uuid::new_v4(), Role::Admin)
            .unwrap();
        assert!(matches!(
            service("test-secret").validate(&token),
            Err(EntitlementError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let sessions = SessionService::new(&SessionConfig {
            jwt_secret: Secret::new("test-secret".to_string()),
            issuer: "entitlement-service".to_string(),
            token_ttl_minutes: -10,
        });
        let token = sessions.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(sessions.validate(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(service("test-secret").validate("not.a.token").is_err());
    }
}
