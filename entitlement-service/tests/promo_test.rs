//! Promo code integration tests.

mod common;

use chrono::{Duration, Utc};
use common::{decimal, TestApp};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

fn promo(code: &str, percent: i64, max_discount: Option<i64>, usage_limit: i64) -> Value {
    json!({
        "code": code,
        "discount_type": "percentage",
        "value": percent.to_string(),
        "max_discount": max_discount.map(|m| m.to_string()),
        "usage_limit": usage_limit,
        "valid_from": (Utc::now() - Duration::days(1)).to_rfc3339(),
        "valid_until": (Utc::now() + Duration::days(30)).to_rfc3339(),
    })
}

async fn validate(app: &TestApp, code: &str, order_value: &str, package_id: &str) -> Value {
    let response = app
        .post(
            "/promo/validate",
            &app.user_token(Uuid::new_v4()),
            &json!({ "code": code, "order_value": order_value, "package_id": package_id }),
        )
        .await;
    assert_eq!(response.status(), 200);
    response.json().await.expect("Failed to parse JSON")
}

#[tokio::test]
async fn percentage_discount_is_priced() {
    let app = TestApp::spawn().await;
    let response = app.create_promo(promo("SAVE20", 20, None, 100)).await;
    assert_eq!(response.status(), 201);

    let body = validate(&app, "save20", "8000", "gold").await;
    assert_eq!(body["valid"], true);
    assert_eq!(decimal(&body["discount_amount"]), Decimal::from(1600));
    assert_eq!(decimal(&body["final_amount"]), Decimal::from(6400));
}

#[tokio::test]
async fn percentage_discount_is_capped() {
    let app = TestApp::spawn().await;
    app.create_promo(promo("BIG20", 20, Some(2000), 100)).await;

    let body = validate(&app, "BIG20", "20000", "platinum").await;
    assert_eq!(body["valid"], true);
    assert_eq!(decimal(&body["discount_amount"]), Decimal::from(2000));
    assert_eq!(decimal(&body["final_amount"]), Decimal::from(18000));
}

#[tokio::test]
async fn rejections_carry_a_reason() {
    let app = TestApp::spawn().await;

    let body = validate(&app, "NOPE", "8000", "gold").await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["reason"], "not_found");
    assert!(body.get("final_amount").is_none());

    let mut expired = promo("OLD10", 10, None, 100);
    expired["valid_from"] = json!((Utc::now() - Duration::days(30)).to_rfc3339());
    expired["valid_until"] = json!((Utc::now() - Duration::days(1)).to_rfc3339());
    app.create_promo(expired).await;
    assert_eq!(validate(&app, "OLD10", "8000", "gold").await["reason"], "expired");

    let mut min_order = promo("MIN10", 10, None, 100);
    min_order["min_order_value"] = json!("10000");
    app.create_promo(min_order).await;
    assert_eq!(
        validate(&app, "MIN10", "8000", "gold").await["reason"],
        "below_min_order"
    );

    let mut platinum_only = promo("PLAT10", 10, None, 100);
    platinum_only["applicable_packages"] = json!(["platinum"]);
    app.create_promo(platinum_only).await;
    assert_eq!(
        validate(&app, "PLAT10", "8000", "gold").await["reason"],
        "not_applicable"
    );

    let mut inactive = promo("OFF10", 10, None, 100);
    inactive["is_active"] = json!(false);
    app.create_promo(inactive).await;
    assert_eq!(validate(&app, "OFF10", "8000", "gold").await["reason"], "inactive");
}

#[tokio::test]
async fn discounted_purchase_redeems_the_code() {
    let app = TestApp::spawn().await;
    let user = Uuid::new_v4();
    app.create_promo(promo("SAVE20", 20, None, 100)).await;

    // Full price is refused once a code is supplied.
    let response = app
        .initiate_payment(user, "gold", "8000", 50, Some("SAVE20"))
        .await;
    assert_eq!(response.status(), 400);

    let response = app
        .initiate_payment(user, "gold", "6400", 50, Some(" save20 "))
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(decimal(&body["amount"]), Decimal::from(6400));
    let gateway_ref = body["gateway_ref"].as_str().expect("gateway_ref").to_string();
    let payment_id = body["payment_id"].as_str().expect("payment_id").to_string();

    app.send_webhook("payment.captured", &gateway_ref).await;
    app.send_webhook("payment.captured", &gateway_ref).await;

    let payment: Value = app
        .get(&format!("/payments/{}", payment_id), &app.user_token(user))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(payment["promo_code"], "SAVE20");
    assert_eq!(payment["promo_status"], "applied");
    assert_eq!(decimal(&payment["discount_amount"]), Decimal::from(1600));

    let detail: Value = app
        .get("/admin/promo-codes/SAVE20", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(detail["promo"]["used_count"], 1);
    assert_eq!(detail["usages"].as_array().map(Vec::len), Some(1));
    assert_eq!(app.entitlement(user).await["views_limit"], 50);
}

#[tokio::test]
async fn checkout_reserves_the_last_use() {
    let app = TestApp::spawn().await;
    app.create_promo(promo("ONCE", 20, None, 1)).await;

    let first = Uuid::new_v4();
    let response = app
        .initiate_payment(first, "gold", "6400", 50, Some("ONCE"))
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    let gateway_ref = body["gateway_ref"].as_str().expect("gateway_ref").to_string();

    // The single use is held by the unpaid checkout.
    let response = app
        .initiate_payment(Uuid::new_v4(), "gold", "6400", 50, Some("ONCE"))
        .await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "PromoRejected");

    let detail: Value = app
        .get("/admin/promo-codes/ONCE", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(detail["promo"]["used_count"], 1);

    app.send_webhook("payment.captured", &gateway_ref).await;
    let payments: Vec<Value> = app
        .get("/payments", &app.user_token(first))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(payments[0]["promo_status"], "applied");
    assert_eq!(app.entitlement(first).await["views_limit"], 50);

    let detail: Value = app
        .get("/admin/promo-codes/ONCE", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(detail["promo"]["used_count"], 1);
}

#[tokio::test]
async fn expired_checkout_hands_the_use_back() {
    let app = TestApp::spawn().await;
    app.create_promo(promo("ONCE", 20, None, 1)).await;

    let user = Uuid::new_v4();
    let body: Value = app
        .initiate_payment(user, "gold", "6400", 50, Some("ONCE"))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    let gateway_ref = body["gateway_ref"].as_str().expect("gateway_ref").to_string();
    app.mount_order_state(&gateway_ref, "created").await;

    let report: Value = app
        .post("/admin/payments/expire-stale", &app.admin_token(), &json!({}))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(report["expired"], 1);

    let payments: Vec<Value> = app
        .get("/payments", &app.user_token(user))
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(payments[0]["status"], "failed");
    assert_eq!(payments[0]["promo_status"], "released");

    let detail: Value = app
        .get("/admin/promo-codes/ONCE", &app.admin_token())
        .await
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(detail["promo"]["used_count"], 0);
    assert_eq!(detail["usages"].as_array().map(Vec::len), Some(0));

    let response = app
        .initiate_payment(Uuid::new_v4(), "gold", "6400", 50, Some("ONCE"))
        .await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn promo_administration_requires_admin() {
    let app = TestApp::spawn().await;

    let response = app
        .post(
            "/admin/promo-codes",
            &app.user_token(Uuid::new_v4()),
            &promo("SAVE20", 20, None, 100),
        )
        .await;
    assert_eq!(response.status(), 403);

    let response = app.create_promo(promo("SAVE20", 20, None, 100)).await;
    assert_eq!(response.status(), 201);

    let response = app.create_promo(promo("save20", 10, None, 100)).await;
    assert_eq!(response.status(), 409);

    let response = app.create_promo(promo("BAD", 150, None, 100)).await;
    assert_eq!(response.status(), 400);
}
