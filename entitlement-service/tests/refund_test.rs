//! Refund and dispute workflow integration tests.

mod common;

use common::{decimal, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

async fn request_refund(app: &TestApp, user: Uuid, payment_id: Uuid) -> reqwest::Response {
    app.post(
        "/refund/request",
        &app.user_token(user),
        &json!({ "payment_id": payment_id, "reason": "Matches were not relevant" }),
    )
    .await
}

async fn decide(app: &TestApp, refund_id: &str, decision: &str) -> reqwest::Response {
    app.post(
        "/refund/decide",
        &app.admin_token(),
        &json!({ "refund_id": refund_id, "decision": decision, "notes": "reviewed" }),
    )
    .await
}

async fn use_views(app: &TestApp, user: Uuid, count: usize) {
    for _ in 0..count {
        let response = app.record_view(user, Uuid::new_v4()).await;
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn approval_revokes_only_unused_views() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let (payment_id, _) = app.purchase(user, "silver", "5000", 20).await;
    use_views(&app, user, 5).await;

    let response = request_refund(&app, user, payment_id).await;
    assert_eq!(response.status(), 201);
    let refund: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(refund["status"], "pending");
    assert_eq!(decimal(&refund["amount"]), Decimal::from(5000));
    let refund_id = refund["refund_id"].as_str().expect("refund_id").to_string();

    let response = decide(&app, &refund_id, "approved").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "approved");
    assert_eq!(body["payment_status"], "refunded");
    assert_eq!(body["reversed_views"], 15);

    let entitlement = app.entitlement(user).await;
    assert_eq!(entitlement["views_limit"], 5);
    assert_eq!(entitlement["views_used"], 5);
    assert_eq!(entitlement["remaining"], 0);

    // Profiles already opened stay open.
    let response = app.record_view(user, Uuid::new_v4()).await;
    assert_eq!(response.status(), 402);
}

#[tokio::test]
async fn refund_is_decided_once() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let (payment_id, _) = app.purchase(user, "silver", "5000", 20).await;

    let refund: Value = request_refund(&app, user, payment_id)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let refund_id = refund["refund_id"].as_str().expect("refund_id").to_string();

    assert_eq!(decide(&app, &refund_id, "approved").await.status(), 200);

    let response = decide(&app, &refund_id, "rejected").await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "RefundAlreadyDecided");

    assert_eq!(app.entitlement(user).await["views_limit"], 0);
}

#[tokio::test]
async fn rejection_keeps_the_allowance() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let (payment_id, _) = app.purchase(user, "silver", "5000", 20).await;

    let refund: Value = request_refund(&app, user, payment_id)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let refund_id = refund["refund_id"].as_str().expect("refund_id").to_string();

    let body: Value = decide(&app, &refund_id, "rejected")
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["payment_status"], "completed");
    assert_eq!(body["reversed_views"], 0);

    assert_eq!(app.entitlement(user).await["views_limit"], 20);

    // A rejected request does not block a new one.
    assert_eq!(request_refund(&app, user, payment_id).await.status(), 201);
}

#[tokio::test]
async fn refund_policy_is_enforced() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();

    // Pending payments are not refundable.
    let body: Value = app
        .initiate_payment(user, "silver", "5000", 20, None)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let pending_id: Uuid = body["payment_id"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("payment_id");
    let response = request_refund(&app, user, pending_id).await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "RefundPolicyViolation");

    let (payment_id, _) = app.purchase(user, "gold", "8000", 50).await;

    // Only the buyer can ask.
    let response = request_refund(&app, Uuid::new_v4(), payment_id).await;
    assert_eq!(response.status(), 422);

    assert_eq!(request_refund(&app, user, payment_id).await.status(), 201);
    assert_eq!(request_refund(&app, user, payment_id).await.status(), 409);

    let response = request_refund(&app, user, Uuid::new_v4()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn refund_queue_is_admin_only() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let (payment_id, _) = app.purchase(user, "silver", "5000", 20).await;
    let refund: Value = request_refund(&app, user, payment_id)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    let response = app.get("/admin/refunds", &app.user_token(user)).await;
    assert_eq!(response.status(), 403);

    let response = app
        .post(
            "/refund/decide",
            &app.user_token(user),
            &json!({ "refund_id": refund["refund_id"], "decision": "approved" }),
        )
        .await;
    assert_eq!(response.status(), 403);

    let pending: Vec<Value> = app
        .get("/admin/refunds?status=pending", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["refund_id"], refund["refund_id"]);

    let approved: Vec<Value> = app
        .get("/admin/refunds?status=approved", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert!(approved.is_empty());
}

#[tokio::test]
async fn gateway_refund_reverses_and_closes_open_requests() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    let (payment_id, gateway_ref) = app.purchase(user, "gold", "8000", 50).await;
    use_views(&app, user, 10).await;

    let refund: Value = request_refund(&app, user, payment_id)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");

    let ack: Value = app
        .send_webhook("refund.processed", &gateway_ref)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(ack["status"], "processed");

    let ack: Value = app
        .send_webhook("payment.dispute.lost", &gateway_ref)
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(ack["status"], "duplicate");

    let entitlement = app.entitlement(user).await;
    assert_eq!(entitlement["views_limit"], 10);
    assert_eq!(entitlement["remaining"], 0);

    let refund_id = refund["refund_id"].as_str().expect("refund_id");
    let response = decide(&app, refund_id, "approved").await;
    assert_eq!(response.status(), 409);

    let adjustments: Value = app
        .get(&format!("/admin/users/{}/entitlement", user), &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let sources: Vec<&str> = adjustments["adjustments"]
        .as_array()
        .expect("adjustments")
        .iter()
        .filter_map(|a| a["source"].as_str())
        .collect();
    assert!(sources.contains(&"purchase"));
    assert!(sources.contains(&"refund_reversal"));
}
