//! Configuration module for entitlement-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub purchase: PurchasePolicyConfig,
    /// JSON file replacing the compiled-in package catalog.
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    /// Secondary route used for payment writes when the primary is unreachable.
    pub fallback_url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jwt_secret: Secret<String>,
    pub issuer: String,
    pub token_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct PurchasePolicyConfig {
    pub max_pending_payments: i64,
    /// Age after which a pending payment is checked against the gateway and
    /// failed if its order is unpaid.
    pub pending_expiry_minutes: i64,
    pub expiry_batch_size: i64,
}

fn required(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required", name)))
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EntitlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "entitlement-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: Secret::new(required("DATABASE_URL")?),
                fallback_url: env::var("DATABASE_FALLBACK_URL").ok().map(Secret::new),
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            gateway: GatewayConfig {
                key_id: env::var("GATEWAY_KEY_ID").unwrap_or_default(),
                key_secret: Secret::new(env::var("GATEWAY_KEY_SECRET").unwrap_or_default()),
                webhook_secret: Secret::new(required("GATEWAY_WEBHOOK_SECRET")?),
                api_base_url: env::var("GATEWAY_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
                checkout_url: env::var("GATEWAY_CHECKOUT_URL")
                    .unwrap_or_else(|_| "https://checkout.razorpay.com/v1/checkout".to_string()),
            },
            session: SessionConfig {
                jwt_secret: Secret::new(required("SESSION_JWT_SECRET")?),
                issuer: env::var("SESSION_ISSUER")
                    .unwrap_or_else(|_| "entitlement-service".to_string()),
                token_ttl_minutes: parsed_or("SESSION_TOKEN_TTL_MINUTES", 60),
            },
            purchase: PurchasePolicyConfig {
                max_pending_payments: parsed_or("MAX_PENDING_PAYMENTS", 3),
                pending_expiry_minutes: parsed_or("PENDING_PAYMENT_EXPIRY_MINUTES", 1440),
                expiry_batch_size: parsed_or("PENDING_EXPIRY_BATCH_SIZE", 100),
            },
            catalog_path: env::var("PACKAGE_CATALOG_PATH").ok(),
        })
    }
}
