use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use settlement_engine::{
    db_types::{DeliveryStatus, OrderStatusType, PaymentStatus},
    traits::{DeliveryLedger, DeliveryQueryFilter},
    SettlementDatabase,
    SqliteDatabase,
    WebhookApi,
};

use super::helpers::*;
use crate::{middleware::REQUEST_ID_HEADER, routes::WebhookRoute};

fn configure(api: WebhookApi<SqliteDatabase>) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(api)).service(WebhookRoute::<SqliteDatabase>::new());
    }
}

fn stripe_webhook(body: &str, signature: &str) -> TestRequest {
    TestRequest::post()
        .uri("/webhooks/stripe")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Stripe-Signature", signature))
        .set_payload(body.to_string())
}

#[actix_web::test]
async fn stripe_success_is_settled_once() {
    let mut gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;
    let body = stripe_event("evt_1", "payment_intent.succeeded", "pay_100");

    let res = call(configure(gw.webhook_api()), stripe_webhook(&body, &stripe_signature(&body))).await;
    assert_eq!(res.status, StatusCode::OK);
    let ack = res.json();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["disposition"], "settled");
    assert_eq!(ack["paymentStatus"], "SUCCEEDED");
    assert!(res.header(REQUEST_ID_HEADER).is_some());

    let payment = gw.db.fetch_payment("pay_100").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    let orders = gw.db.fetch_orders_for_payment("pay_100").await.unwrap();
    assert_eq!(orders[0].status, OrderStatusType::Paid);
    let settled = gw.settled_events();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].order_id, "ord_100");

    // Stripe resends the same event. The acknowledgement is identical and nothing else happens.
    let again = call(configure(gw.webhook_api()), stripe_webhook(&body, &stripe_signature(&body))).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body, res.body);
    assert!(gw.settled_events().is_empty());
    gw.tear_down().await;
}

#[actix_web::test]
async fn tampered_bodies_get_a_400() {
    let gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;
    let body = stripe_event("evt_1", "payment_intent.succeeded", "pay_100");
    let signature = stripe_signature(&body);
    let tampered = body.replace("pay_100", "pay_101");

    let res = call(configure(gw.webhook_api()), stripe_webhook(&tampered, &signature)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let err = res.json();
    assert!(err["error"].as_str().unwrap().starts_with("Signature verification failed"));
    assert_eq!(err["requestId"].as_str(), res.header(REQUEST_ID_HEADER));
    assert!(err["timestamp"].is_string());
    assert!(err["executionTime"].as_str().unwrap().ends_with("ms"));

    let deliveries = gw.db.search_deliveries(DeliveryQueryFilter::default()).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);
    assert_eq!(gw.db.fetch_payment("pay_100").await.unwrap().unwrap().status, PaymentStatus::Pending);
    gw.tear_down().await;
}

#[actix_web::test]
async fn missing_signatures_get_a_400() {
    let gw = Gateway::new().await;
    let body = razorpay_event("payment.captured", "pay_DESlfW9H8K9uqM", "pay_200");
    let req = TestRequest::post().uri("/webhooks/razorpay").set_payload(body);
    let res = call(configure(gw.webhook_api()), req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"], "Signature verification failed. The X-Razorpay-Signature header is missing");
    gw.tear_down().await;
}

#[actix_web::test]
async fn unknown_payments_are_not_retried() {
    let mut gw = Gateway::new().await;
    let body = razorpay_event("payment.failed", "pay_DESlfW9H8K9uqM", "pay_200");
    let req = TestRequest::post()
        .uri("/webhooks/razorpay")
        .insert_header(("X-Razorpay-Signature", razorpay_signature(&body)))
        .insert_header((REQUEST_ID_HEADER, "req-from-razorpay"))
        .set_payload(body);
    let res = call(configure(gw.webhook_api()), req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.header(REQUEST_ID_HEADER), Some("req-from-razorpay"));
    assert_eq!(res.json()["requestId"], "req-from-razorpay");

    let deliveries = gw.db.search_deliveries(DeliveryQueryFilter::default()).await.unwrap();
    assert!(deliveries[0].is_terminally_failed());
    assert!(gw.settled_events().is_empty());
    gw.tear_down().await;
}

#[actix_web::test]
async fn unregistered_providers_get_a_404() {
    let gw = Gateway::new().await;
    for provider in ["square", "paypal"] {
        let req = TestRequest::post().uri(&format!("/webhooks/{provider}")).set_payload("{}");
        let res = call(configure(gw.webhook_api()), req).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["error"], format!("Unknown payment provider: {provider}"));
    }
    let deliveries = gw.db.search_deliveries(DeliveryQueryFilter::default()).await.unwrap();
    assert!(deliveries.is_empty(), "Nothing is recorded for providers the gateway does not serve");
    gw.tear_down().await;
}

#[actix_web::test]
async fn irrelevant_events_are_acknowledged() {
    let gw = Gateway::new().await;
    let body = stripe_event("evt_9", "payment_intent.created", "pay_100");
    let res = call(configure(gw.webhook_api()), stripe_webhook(&body, &stripe_signature(&body))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["disposition"], "ignored");
    gw.tear_down().await;
}
