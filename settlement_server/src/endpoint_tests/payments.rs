use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use serde_json::json;
use settlement_engine::{
    db_types::{PaymentStatus, Provider},
    PaymentsApi,
    SettlementDatabase,
    SqliteDatabase,
    WebhookApi,
};

use super::helpers::*;
use crate::routes::{DeliveriesRoute, PaymentStatusRoute, RegisterPaymentRoute, ReplayDeliveryRoute, WebhookRoute};

fn configure(gw: &Gateway) -> impl FnOnce(&mut ServiceConfig) {
    configure_with(gw.payments_api(), gw.webhook_api())
}

fn configure_with(
    payments: PaymentsApi<SqliteDatabase>,
    webhooks: WebhookApi<SqliteDatabase>,
) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(payments))
            .app_data(web::Data::new(webhooks))
            .app_data(admin_token())
            .service(WebhookRoute::<SqliteDatabase>::new())
            .service(
                web::scope("/api")
                    .service(PaymentStatusRoute::<SqliteDatabase>::new())
                    .service(RegisterPaymentRoute::<SqliteDatabase>::new())
                    .service(DeliveriesRoute::<SqliteDatabase>::new())
                    .service(ReplayDeliveryRoute::<SqliteDatabase>::new()),
            );
    }
}

fn registration(reference: &str, order_id: &str) -> serde_json::Value {
    json!({
        "reference": reference,
        "provider": "razorpay",
        "providerPaymentId": "pay_DESlfW9H8K9uqM",
        "amount": 500000,
        "currency": "INR",
        "orderId": order_id,
    })
}

#[actix_web::test]
async fn payment_status() {
    let gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;

    let res = call(configure(&gw), TestRequest::get().uri("/api/payments/pay_100")).await;
    assert_eq!(res.status, StatusCode::OK);
    let view = res.json();
    assert_eq!(view["payment"]["status"], "PENDING");
    assert_eq!(view["orders"][0]["orderId"], "ord_100");

    let res = call(configure(&gw), TestRequest::get().uri("/api/payments/pay_404")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.json()["error"], "The data was not found. The requested payment pay_404 does not exist");
    gw.tear_down().await;
}

#[actix_web::test]
async fn registration_requires_the_admin_token() {
    let gw = Gateway::new().await;
    let req = TestRequest::post().uri("/api/payments").set_json(registration("pay_200", "ord_200"));
    let res = call(configure(&gw), req).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::post()
        .uri("/api/payments")
        .insert_header(("X-Admin-Token", "guess"))
        .set_json(registration("pay_200", "ord_200"));
    let res = call(configure(&gw), req).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(gw.db.fetch_payment("pay_200").await.unwrap().is_none());
    gw.tear_down().await;
}

#[actix_web::test]
async fn operator_endpoints_are_off_without_a_token() {
    let gw = Gateway::new().await;
    let payments = gw.payments_api();
    let webhooks = gw.webhook_api();
    let configure = move |cfg: &mut ServiceConfig| {
        cfg.app_data(web::Data::new(payments))
            .app_data(web::Data::new(webhooks))
            .service(DeliveriesRoute::<SqliteDatabase>::new());
    };
    let res = call(configure, admin(TestRequest::get().uri("/deliveries"))).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    gw.tear_down().await;
}

#[actix_web::test]
async fn register_payments() {
    let gw = Gateway::new().await;
    let req = admin(TestRequest::post().uri("/api/payments").set_json(registration("pay_200", "ord_200")));
    let res = call(configure(&gw), req).await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.json()["payment"]["provider"], "razorpay");

    let req = admin(TestRequest::post().uri("/api/payments").set_json(registration("pay_200", "ord_200")));
    let res = call(configure(&gw), req).await;
    assert_eq!(res.status, StatusCode::OK, "Registering the same payment twice is harmless");

    let req = admin(TestRequest::post().uri("/api/payments").set_json(registration("pay_201", "ord_200")));
    let res = call(configure(&gw), req).await;
    assert_eq!(res.status, StatusCode::CONFLICT);

    let mut zero = registration("pay_202", "ord_202");
    zero["amount"] = json!(0);
    let res = call(configure(&gw), admin(TestRequest::post().uri("/api/payments").set_json(zero))).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    gw.tear_down().await;
}

#[actix_web::test]
async fn failed_deliveries_can_be_listed_and_replayed() {
    let mut gw = Gateway::new().await;
    let body = razorpay_event("payment.failed", "pay_DESlfW9H8K9uqM", "pay_200");
    let webhook = TestRequest::post()
        .uri("/webhooks/razorpay")
        .insert_header(("X-Razorpay-Signature", razorpay_signature(&body)))
        .set_payload(body);
    let res = call(configure(&gw), webhook).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let query = TestRequest::get().uri("/api/deliveries?status=FAILED&provider=razorpay");
    let res = call(configure(&gw), admin(query)).await;
    assert_eq!(res.status, StatusCode::OK);
    let deliveries = res.json();
    assert_eq!(deliveries.as_array().unwrap().len(), 1);
    assert_eq!(deliveries[0]["errorKind"], "payment_not_found");
    assert!(deliveries[0]["nextAttemptAt"].is_null());
    assert!(deliveries[0].get("payload").is_none());
    let id = deliveries[0]["id"].as_i64().unwrap();

    let res = call(configure(&gw), admin(TestRequest::get().uri("/api/deliveries?status=DELIVERED"))).await;
    assert_eq!(res.json().as_array().unwrap().len(), 0);

    // The payment shows up late; the operator replays the delivery
    let req = admin(TestRequest::post().uri("/api/payments").set_json(registration("pay_200", "ord_200")));
    assert_eq!(call(configure(&gw), req).await.status, StatusCode::CREATED);
    let res = call(configure(&gw), admin(TestRequest::post().uri(&format!("/api/deliveries/{id}/replay")))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["disposition"], "settled");
    let payment = gw.db.fetch_payment("pay_200").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.provider, Provider::Razorpay);
    assert_eq!(gw.settled_events().len(), 1);

    let res = call(configure(&gw), admin(TestRequest::post().uri(&format!("/api/deliveries/{id}/replay")))).await;
    assert_eq!(res.status, StatusCode::CONFLICT, "A delivered row cannot be replayed");
    let res = call(configure(&gw), admin(TestRequest::post().uri("/api/deliveries/9999/replay"))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    gw.tear_down().await;
}
