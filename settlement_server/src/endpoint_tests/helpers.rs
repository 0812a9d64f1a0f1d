use actix_web::{
    body::to_bytes,
    http::{header::HeaderMap, StatusCode},
    test,
    test::TestRequest,
    web,
    web::ServiceConfig,
    App,
};
use chrono::Utc;
use log::*;
use serde_json::Value;
use settlement_engine::{
    db_types::{NewPayment, Provider},
    events::{EventProducer, EventProducers, PaymentSettledEvent},
    providers::{razorpay, stripe, RazorpayAdapter, StripeAdapter},
    test_utils::prepare_env::{prepare_test_env, random_db_url},
    PaymentsApi,
    ProviderRegistry,
    SettlementDatabase,
    SqliteDatabase,
    WebhookApi,
};
use sgw_common::Secret;
use tokio::sync::mpsc;

use crate::middleware::{AdminToken, RequestContextFactory, ADMIN_TOKEN_HEADER};

pub const STRIPE_SECRET: &str = "whsec_endpoint";
pub const RAZORPAY_SECRET: &str = "rzp_endpoint";
pub const ADMIN_TOKEN: &str = "let-me-in";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("Body is not JSON ({e}): {}", self.body))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Runs a single request through an app built by `configure`. Errors raised by middleware are turned into the
/// response the client would see.
pub async fn call<F>(configure: F, req: TestRequest) -> TestResponse
where F: FnOnce(&mut ServiceConfig) {
    let app = App::new().wrap(RequestContextFactory).configure(configure);
    let service = test::init_service(app).await;
    debug!("Making request");
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => {
            let status = res.status();
            let headers = res.headers().clone();
            let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
            TestResponse { status, headers, body }
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let headers = res.headers().clone();
            let bytes = to_bytes(res.into_body()).await.unwrap_or_default();
            TestResponse { status, headers, body: String::from_utf8_lossy(&bytes).into_owned() }
        },
    }
}

pub fn admin(req: TestRequest) -> TestRequest {
    req.insert_header((ADMIN_TOKEN_HEADER, ADMIN_TOKEN))
}

/// A freshly migrated database, plus a channel that receives every settlement notification.
pub struct Gateway {
    pub db: SqliteDatabase,
    pub producers: EventProducers,
    pub settled: mpsc::Receiver<PaymentSettledEvent>,
}

impl Gateway {
    pub async fn new() -> Self {
        let url = random_db_url();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating database");
        let (tx, settled) = mpsc::channel(64);
        let producers = EventProducers { payment_settled_producer: vec![EventProducer::new(tx)], ..Default::default() };
        Self { db, producers, settled }
    }

    pub fn settled_events(&mut self) -> Vec<PaymentSettledEvent> {
        let mut result = Vec::new();
        while let Ok(ev) = self.settled.try_recv() {
            result.push(ev);
        }
        result
    }

    pub fn webhook_api(&self) -> WebhookApi<SqliteDatabase> {
        let mut registry = ProviderRegistry::new();
        registry
            .register(StripeAdapter::default(), Secret::new(STRIPE_SECRET.to_string()))
            .register(RazorpayAdapter, Secret::new(RAZORPAY_SECRET.to_string()));
        WebhookApi::new(self.db.clone(), registry, self.producers.clone())
    }

    pub fn payments_api(&self) -> PaymentsApi<SqliteDatabase> {
        PaymentsApi::new(self.db.clone())
    }

    pub async fn register(&self, payment: NewPayment) {
        self.payments_api().register_payment(payment).await.expect("Error registering payment");
    }

    pub async fn tear_down(self) {
        let Gateway { mut db, .. } = self;
        let url = db.url().to_string();
        if let Err(e) = db.close().await {
            error!("Failed to close database: {e}");
        }
        if let Some(path) = url.strip_prefix("sqlite://").and_then(|s| s.split('?').next()) {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub fn admin_token() -> web::Data<AdminToken> {
    web::Data::new(AdminToken(Secret::new(ADMIN_TOKEN.to_string())))
}

pub fn stripe_payment(reference: &str, order_id: &str) -> NewPayment {
    NewPayment::new(reference, Provider::Stripe, 5000.into(), "INR".parse().unwrap(), order_id)
        .with_provider_payment_id(&format!("pi_{reference}"))
}

pub fn stripe_event(event_id: &str, event_type: &str, reference: &str) -> String {
    format!(
        r#"{{"id":"{event_id}","object":"event","type":"{event_type}","created":1717243200,"data":{{"object":{{"id":"pi_{reference}","object":"payment_intent","amount":5000,"currency":"inr","status":"succeeded","metadata":{{"payment_reference":"{reference}"}}}}}}}}"#
    )
}

pub fn stripe_signature(body: &str) -> String {
    stripe::sign(body.as_bytes(), STRIPE_SECRET, Utc::now().timestamp())
}

pub fn razorpay_event(event: &str, payment_id: &str, reference: &str) -> String {
    format!(
        r#"{{"entity":"event","account_id":"acc_BFQ7uQEaa7j2z7","event":"{event}","contains":["payment"],"payload":{{"payment":{{"entity":{{"id":"{payment_id}","entity":"payment","amount":500000,"currency":"INR","status":"failed","notes":{{"payment_reference":"{reference}"}}}}}}}},"created_at":1717243200}}"#
    )
}

pub fn razorpay_signature(body: &str) -> String {
    razorpay::sign(body.as_bytes(), RAZORPAY_SECRET)
}
