use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use serde_json::json;
use settlement_engine::{
    db_types::{PaymentStatus, Provider, SettlementOutcome},
    traits::ProviderPaymentStatus,
    SettlementDatabase,
    SettlementError,
    SqliteDatabase,
    VerificationApi,
};

use super::{helpers::*, mocks::MockStatusProvider};
use crate::routes::{VerifyPaymentRoute, IDEMPOTENCY_REPLAYED_HEADER};

type Api = VerificationApi<SqliteDatabase, MockStatusProvider>;

fn configure(gw: &Gateway, status: MockStatusProvider) -> impl FnOnce(&mut ServiceConfig) {
    configure_with(web::Data::new(VerificationApi::new(gw.db.clone(), status, gw.producers.clone())))
}

fn configure_with(api: web::Data<Api>) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::scope("/api")
                .app_data(api)
                .service(VerifyPaymentRoute::<SqliteDatabase, MockStatusProvider>::new()),
        );
    }
}

fn verify(key: Option<&str>, reference: &str) -> TestRequest {
    let mut req = TestRequest::post()
        .uri("/api/payments/verify")
        .set_json(json!({"paymentReference": reference, "provider": "stripe"}));
    if let Some(key) = key {
        req = req.insert_header(("Idempotency-Key", key));
    }
    req
}

fn succeeded_once() -> MockStatusProvider {
    let mut status = MockStatusProvider::new();
    status
        .expect_fetch_status()
        .times(1)
        .withf(|provider, id| *provider == Provider::Stripe && id == "pi_pay_100")
        .returning(|_, _| {
            Ok(ProviderPaymentStatus { provider_status: "succeeded".into(), outcome: SettlementOutcome::Succeeded })
        });
    status
}

#[actix_web::test]
async fn verification_settles_and_replays() {
    let mut gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;
    // Both requests share the api, so the mock's expectations span both calls
    let api = web::Data::new(VerificationApi::new(gw.db.clone(), succeeded_once(), gw.producers.clone()));

    let first = call(configure_with(api.clone()), verify(Some("key-1"), "pay_100")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header(IDEMPOTENCY_REPLAYED_HEADER), None);
    let response = first.json();
    assert_eq!(response["providerStatus"], "succeeded");
    assert_eq!(response["paymentStatus"], "SUCCEEDED");
    assert_eq!(gw.db.fetch_payment("pay_100").await.unwrap().unwrap().status, PaymentStatus::Succeeded);
    assert_eq!(gw.settled_events().len(), 1);

    let second = call(configure_with(api), verify(Some("key-1"), "pay_100")).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header(IDEMPOTENCY_REPLAYED_HEADER), Some("true"));
    assert_eq!(second.body, first.body, "Replays are byte-identical");
    assert!(gw.settled_events().is_empty());
    gw.tear_down().await;
}

#[actix_web::test]
async fn a_key_is_required() {
    let gw = Gateway::new().await;
    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().never();
    let res = call(configure(&gw, status), verify(None, "pay_100")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"], "The Idempotency-Key header is required");

    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().never();
    let res = call(configure(&gw, status), verify(Some("has space"), "pay_100")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    gw.tear_down().await;
}

#[actix_web::test]
async fn reused_keys_are_unprocessable() {
    let gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;
    gw.register(stripe_payment("pay_101", "ord_101")).await;
    let res = call(configure(&gw, succeeded_once()), verify(Some("key-1"), "pay_100")).await;
    assert_eq!(res.status, StatusCode::OK);

    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().never();
    let res = call(configure(&gw, status), verify(Some("key-1"), "pay_101")).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    gw.tear_down().await;
}

#[actix_web::test]
async fn provider_failures_are_reported() {
    let gw = Gateway::new().await;
    gw.register(stripe_payment("pay_100", "ord_100")).await;
    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().times(1).returning(|_, _| Err(SettlementError::TransientInfra("Stripe 503".into())));
    let res = call(configure(&gw, status), verify(Some("key-1"), "pay_100")).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);

    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().times(1).returning(|_, _| Err(SettlementError::ProviderRejected("404".into())));
    let res = call(configure(&gw, status), verify(Some("key-1"), "pay_100")).await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY, "The failed attempt released the key");

    let mut status = MockStatusProvider::new();
    status.expect_fetch_status().never();
    let res = call(configure(&gw, status), verify(Some("key-2"), "pay_404")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(gw.db.fetch_payment("pay_100").await.unwrap().unwrap().status, PaymentStatus::Pending);
    gw.tear_down().await;
}
