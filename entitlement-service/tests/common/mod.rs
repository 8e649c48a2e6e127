//! Test helper module for entitlement-service integration tests.
//!
//! Spawns the service over an in-memory store with a mocked payment gateway.

#![allow(dead_code)]

use entitlement_service::config::{
    DatabaseConfig, EntitlementConfig, GatewayConfig, PurchasePolicyConfig, SessionConfig,
};
use entitlement_service::services::gateway::{compute_signature, SIGNATURE_HEADER};
use entitlement_service::services::{
    init_metrics, MemoryStore, RazorpayGateway, Role, SessionService, SharedStore,
};
use entitlement_service::startup::Application;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const JWT_SECRET: &str = "test-session-secret-at-least-32-bytes";

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub client: reqwest::Client,
    /// Primary store handle; switch it off to simulate an outage.
    pub store: MemoryStore,
    /// Second route over the same state, used by the payment writer fallback.
    pub fallback: MemoryStore,
    pub gateway: MockServer,
    pub sessions: SessionService,
    pub admin_id: Uuid,
}

pub fn test_config(gateway_url: &str) -> EntitlementConfig {
    EntitlementConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        service_name: "entitlement-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            fallback_url: None,
            max_connections: 1,
            min_connections: 1,
        },
        gateway: GatewayConfig {
            key_id: "rzp_test_key".to_string(),
            key_secret: Secret::new("rzp_test_secret".to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: gateway_url.to_string(),
            checkout_url: "https://checkout.test/pay".to_string(),
        },
        session: SessionConfig {
            jwt_secret: Secret::new(JWT_SECRET.to_string()),
            issuer: "entitlement-service-test".to_string(),
            token_ttl_minutes: 30,
        },
        purchase: PurchasePolicyConfig {
            max_pending_payments: 3,
            // Every pending payment is eligible for the expiry pass.
            pending_expiry_minutes: 0,
            expiry_batch_size: 100,
        },
        catalog_path: None,
    }
}

/// Mounts an `/orders` mock that hands out a fresh order id per call.
async fn mount_order_endpoint(server: &MockServer) {
    let counter = Arc::new(AtomicU32::new(0));
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(move |request: &Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("order_test_{}", n),
                "amount": body["amount"],
                "currency": body["currency"],
                "status": "created"
            }))
        })
        .mount(server)
        .await;
}

impl TestApp {
    /// Spawn a new test application on a random port.
    pub async fn spawn() -> Self {
        init_metrics();

        let gateway_server = MockServer::start().await;
        mount_order_endpoint(&gateway_server).await;

        let config = test_config(&gateway_server.uri());
        let sessions = SessionService::new(&config.session);

        let store = MemoryStore::new();
        let fallback = store.second_route();
        let gateway = RazorpayGateway::new(config.gateway.clone())
            .expect("Failed to build gateway client");

        let primary: SharedStore = Arc::new(store.clone());
        let secondary: SharedStore = Arc::new(fallback.clone());

        let app = Application::build_with_store(config, primary, Some(secondary), Arc::new(gateway))
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            client,
            store,
            fallback,
            gateway: gateway_server,
            sessions,
            admin_id: Uuid::new_v4(),
        }
    }

    pub fn user_token(&self, user_id: Uuid) -> String {
        self.sessions
            .issue(user_id, Role::User)
            .expect("Failed to issue user token")
    }

    pub fn admin_token(&self) -> String {
        self.sessions
            .issue(self.admin_id, Role::Admin)
            .expect("Failed to issue admin token")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Grants `delta` views through the admin quota endpoint.
    pub async fn grant_views(&self, user_id: Uuid, delta: i64) {
        let response = self
            .post(
                "/admin/adjust-quota",
                &self.admin_token(),
                &json!({ "user_id": user_id, "delta": delta }),
            )
            .await;
        assert_eq!(response.status(), 200, "grant_views failed");
    }

    pub async fn entitlement(&self, user_id: Uuid) -> Value {
        self.get("/entitlement", &self.user_token(user_id))
            .await
            .json()
            .await
            .expect("Failed to parse entitlement")
    }

    pub async fn record_view(&self, viewer: Uuid, profile: Uuid) -> reqwest::Response {
        self.post(
            "/record-view",
            &self.user_token(viewer),
            &json!({ "viewer_id": viewer, "viewed_profile_id": profile }),
        )
        .await
    }

    /// Starts checkout for a catalog package and returns the response body.
    pub async fn initiate_payment(
        &self,
        user_id: Uuid,
        package_id: &str,
        amount: &str,
        view_allowance: i64,
        promo_code: Option<&str>,
    ) -> reqwest::Response {
        self.post(
            "/initiate-payment",
            &self.user_token(user_id),
            &json!({
                "user_id": user_id,
                "package_id": package_id,
                "amount": amount,
                "view_allowance": view_allowance,
                "promo_code": promo_code,
            }),
        )
        .await
    }

    /// Sends a correctly signed gateway webhook.
    pub async fn send_webhook(&self, event: &str, order_id: &str) -> reqwest::Response {
        let body = json!({
            "event": event,
            "payload": {
                "payment": {
                    "entity": {
                        "id": format!("pay_{}", Uuid::new_v4().simple()),
                        "order_id": order_id,
                        "status": "captured"
                    }
                }
            }
        })
        .to_string();
        let signature =
            compute_signature(body.as_bytes(), WEBHOOK_SECRET).expect("Failed to sign webhook");

        self.client
            .post(self.url("/webhooks/gateway"))
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Buys a package end to end and returns (payment_id, gateway_ref).
    pub async fn purchase(&self, user_id: Uuid, package_id: &str, amount: &str, views: i64) -> (Uuid, String) {
        let (payment_id, gateway_ref) = self.start_checkout(user_id, package_id, amount, views).await;

        let ack = self.send_webhook("payment.captured", &gateway_ref).await;
        assert_eq!(ack.status(), 200, "completion webhook failed");

        (payment_id, gateway_ref)
    }

    /// Makes the gateway report `order_id` in `status` on lookup.
    pub async fn mount_order_state(&self, order_id: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/orders/{}", order_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": order_id,
                "amount": 500000,
                "currency": "INR",
                "status": status
            })))
            .mount(&self.gateway)
            .await;
    }

    /// Starts checkout and returns (payment_id, gateway_ref) without paying.
    pub async fn start_checkout(&self, user_id: Uuid, package_id: &str, amount: &str, views: i64) -> (Uuid, String) {
        let response = self
            .initiate_payment(user_id, package_id, amount, views, None)
            .await;
        assert_eq!(response.status(), 201, "initiate_payment failed");
        let body: Value = response.json().await.expect("Failed to parse payment");
        let payment_id: Uuid = body["payment_id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("payment_id missing");
        let gateway_ref = body["gateway_ref"].as_str().expect("gateway_ref missing").to_string();
        (payment_id, gateway_ref)
    }

    pub async fn payment_status(&self, user_id: Uuid, payment_id: Uuid) -> Value {
        self.get(&format!("/payments/{}", payment_id), &self.user_token(user_id))
            .await
            .json()
            .await
            .expect("Failed to parse payment")
    }

    pub async fn create_promo(&self, body: Value) -> reqwest::Response {
        self.post("/admin/promo-codes", &self.admin_token(), &body).await
    }
}

pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().expect("not a decimal string"),
        Value::Number(n) => n.to_string().parse().expect("not a decimal number"),
        other => panic!("expected decimal, got {}", other),
    }
}
