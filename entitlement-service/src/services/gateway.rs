//! Payment gateway boundary.
//!
//! The core needs an order to send the user to, a signed notification when
//! the order settles, and a way to ask for an order's state when no
//! notification arrives. `RazorpayGateway` implements this over the Orders
//! API; webhooks carry an HMAC-SHA256 of the raw body.
//!
//! A failed payment attempt does not settle the order: the customer may
//! retry on the same order and pay.

use crate::config::GatewayConfig;
use crate::error::EntitlementError;
use crate::models::PaymentStatus;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

type HmacSha256 = Hmac<Sha256>;

/// An order created at the gateway; `id` becomes the payment's `gateway_ref`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

impl GatewayOrder {
    /// Order states are `created`, `attempted` and `paid`.
    pub fn is_paid(&self) -> bool {
        self.status == "paid"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an order for `amount` (major units, e.g. rupees).
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, EntitlementError>;

    /// Current state of an order.
    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, EntitlementError>;

    /// Public key id handed to the checkout page.
    fn key_id(&self) -> &str;

    /// Where the client sends the user to pay for `order_id`.
    fn checkout_url(&self, order_id: &str) -> String;

    /// Checks the webhook signature over the raw request body.
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorDetail {
    code: String,
    description: String,
}

/// Razorpay-compatible gateway client.
#[derive(Clone)]
pub struct RazorpayGateway {
    client: Client,
    config: GatewayConfig,
}

impl RazorpayGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, EntitlementError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EntitlementError::Gateway(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    async fn read_order(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<GatewayOrder, EntitlementError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EntitlementError::Gateway(format!("{} response unreadable: {}", operation, e)))?;

        tracing::debug!(status = %status, body = %body, operation, "Gateway order response");

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                EntitlementError::Gateway(format!("unexpected {} response: {}", operation, e))
            });
        }

        let (code, description) = match serde_json::from_str::<GatewayErrorBody>(&body) {
            Ok(err) => (err.error.code, err.error.description),
            Err(_) => ("UNKNOWN".to_string(), body),
        };
        tracing::error!(
            status = %status,
            code = %code,
            description = %description,
            operation,
            "Gateway order request failed"
        );
        Err(EntitlementError::Gateway(format!("{} - {}", code, description)))
    }
}

/// Amount in the smallest currency unit (paise for INR).
pub fn to_minor_units(amount: Decimal) -> Result<u64, EntitlementError> {
    (amount * Decimal::from(100))
        .round()
        .to_u64()
        .filter(|paise| *paise > 0)
        .ok_or_else(|| EntitlementError::Validation(format!("invalid charge amount {}", amount)))
}

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn compute_signature(payload: &[u8], secret: &str) -> Result<String, EntitlementError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EntitlementError::Validation("invalid signing key".to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[tracing::instrument(skip(self), fields(amount = %amount, currency = %currency))]
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, EntitlementError> {
        if !self.is_configured() {
            return Err(EntitlementError::Gateway(
                "gateway credentials not configured".to_string(),
            ));
        }

        let request = CreateOrderRequest {
            amount: to_minor_units(amount)?,
            currency,
            receipt,
        };

        let url = format!("{}/orders", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| EntitlementError::Gateway(format!("order request failed: {}", e)))?;

        let order = Self::read_order(response, "create_order").await?;
        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            "Gateway order created"
        );
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_order(&self, order_id: &str) -> Result<GatewayOrder, EntitlementError> {
        if !self.is_configured() {
            return Err(EntitlementError::Gateway(
                "gateway credentials not configured".to_string(),
            ));
        }

        let url = format!("{}/orders/{}", self.config.api_base_url, order_id);

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| EntitlementError::Gateway(format!("order lookup failed: {}", e)))?;

        Self::read_order(response, "fetch_order").await
    }

    fn key_id(&self) -> &str {
        &self.config.key_id
    }

    fn checkout_url(&self, order_id: &str) -> String {
        format!(
            "{}?key_id={}&order_id={}",
            self.config.checkout_url, self.config.key_id, order_id
        )
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(
            self.config.webhook_secret.expose_secret().as_bytes(),
        ) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(body);

        let Ok(provided) = hex::decode(signature.trim()) else {
            tracing::warn!("Webhook signature is not hex");
            return false;
        };

        // verify_slice compares in constant time
        let is_valid = mac.verify_slice(&provided).is_ok();
        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }
        is_valid
    }
}

// -----------------------------------------------------------------------------
// Webhook events
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<WebhookEntity<PaymentEntity>>,
    pub order: Option<WebhookEntity<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntity<T> {
    pub entity: T,
}

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderEntity {
    pub id: String,
}

/// What a webhook asks the adapter to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayNotification {
    Outcome {
        gateway_ref: String,
        status: PaymentStatus,
    },
    /// One payment attempt on the order failed; the order stays open.
    AttemptFailed {
        gateway_ref: String,
        attempt_id: Option<String>,
    },
    /// An event this service does not act on.
    Ignored(String),
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EntitlementError> {
        serde_json::from_slice(body)
            .map_err(|e| EntitlementError::Validation(format!("malformed webhook: {}", e)))
    }

    fn gateway_ref(&self) -> Option<String> {
        self.payload
            .payment
            .as_ref()
            .and_then(|p| p.entity.order_id.clone())
            .or_else(|| self.payload.order.as_ref().map(|o| o.entity.id.clone()))
    }

    fn attempt_id(&self) -> Option<String> {
        self.payload.payment.as_ref().map(|p| p.entity.id.clone())
    }

    pub fn into_notification(self) -> Result<GatewayNotification, EntitlementError> {
        let status = match self.event.as_str() {
            "payment.captured" | "order.paid" => Some(PaymentStatus::Completed),
            "refund.processed" | "payment.dispute.lost" => Some(PaymentStatus::Refunded),
            "payment.failed" => None,
            _ => return Ok(GatewayNotification::Ignored(self.event)),
        };

        let gateway_ref = self.gateway_ref().ok_or_else(|| {
            EntitlementError::Validation(format!("{} event carries no order id", self.event))
        })?;

        Ok(match status {
            Some(status) => GatewayNotification::Outcome {
                gateway_ref,
                status,
            },
            None => GatewayNotification::AttemptFailed {
                attempt_id: self.attempt_id(),
                gateway_ref,
            },
        })
    }
}
