#![allow(dead_code)]
//! Shared fixtures for the settlement engine integration tests.
use chrono::Utc;
use log::*;
use settlement_engine::{
    db_types::{NewPayment, Provider},
    events::{DeliveryFailedEvent, EventProducer, EventProducers, PaymentSettledEvent},
    providers::{razorpay, square, stripe, RazorpayAdapter, SquareAdapter, StripeAdapter},
    test_utils::prepare_env::{prepare_test_env, random_db_url},
    PaymentsApi,
    ProviderRegistry,
    SettlementDatabase,
    SqliteDatabase,
    WebhookApi,
};
use sgw_common::Secret;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::sync::mpsc;

pub const STRIPE_SECRET: &str = "whsec_integration";
pub const RAZORPAY_SECRET: &str = "rzp_integration";
pub const SQUARE_KEY: &str = "sq_integration";
pub const SQUARE_URL: &str = "https://gateway.example.com/webhooks/square";

pub struct Harness {
    pub db: SqliteDatabase,
    pub webhooks: WebhookApi<SqliteDatabase>,
    pub payments: PaymentsApi<SqliteDatabase>,
    pub producers: EventProducers,
    pub settled: mpsc::Receiver<PaymentSettledEvent>,
    pub failed: mpsc::Receiver<DeliveryFailedEvent>,
}

impl Harness {
    /// Every settlement notification published so far.
    pub fn settled_events(&mut self) -> Vec<PaymentSettledEvent> {
        let mut result = Vec::new();
        while let Ok(ev) = self.settled.try_recv() {
            result.push(ev);
        }
        result
    }

    pub fn failed_events(&mut self) -> Vec<DeliveryFailedEvent> {
        let mut result = Vec::new();
        while let Ok(ev) = self.failed.try_recv() {
            result.push(ev);
        }
        result
    }

    pub async fn register(&self, reference: &str, provider: Provider, amount: i64, currency: &str, order_id: &str) {
        let payment = NewPayment::new(reference, provider, amount.into(), currency.parse().unwrap(), order_id);
        let _ = self.payments.register_payment(payment).await.expect("Error registering payment");
    }
}

pub fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry
        .register(StripeAdapter::default(), Secret::new(STRIPE_SECRET.to_string()))
        .register(RazorpayAdapter, Secret::new(RAZORPAY_SECRET.to_string()))
        .register(SquareAdapter::new(SQUARE_URL), Secret::new(SQUARE_KEY.to_string()));
    registry
}

/// Producers that feed plain channels, so tests can count notifications without running handler tasks.
pub fn counting_producers() -> (EventProducers, mpsc::Receiver<PaymentSettledEvent>, mpsc::Receiver<DeliveryFailedEvent>) {
    let (settled_tx, settled_rx) = mpsc::channel(256);
    let (failed_tx, failed_rx) = mpsc::channel(256);
    let producers = EventProducers {
        payment_settled_producer: vec![EventProducer::new(settled_tx)],
        delivery_failed_producer: vec![EventProducer::new(failed_tx)],
    };
    (producers, settled_rx, failed_rx)
}

pub async fn setup() -> Harness {
    setup_with_connections(1).await
}

pub async fn setup_with_connections(max_connections: u32) -> Harness {
    let url = random_db_url();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, max_connections).await.expect("Error creating database");
    let (producers, settled, failed) = counting_producers();
    let webhooks = WebhookApi::new(db.clone(), registry(), producers.clone());
    let payments = PaymentsApi::new(db.clone());
    Harness { db, webhooks, payments, producers, settled, failed }
}

pub async fn tear_down(harness: Harness) {
    let Harness { mut db, .. } = harness;
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
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

pub fn square_event(event_id: &str, reference: &str, status: &str) -> String {
    format!(
        r#"{{"merchant_id":"6SSW7HV8K2ST5","type":"payment.updated","event_id":"{event_id}","created_at":"2024-06-01T12:00:00Z","data":{{"type":"payment","id":"sq_{reference}","object":{{"payment":{{"id":"sq_{reference}","reference_id":"{reference}","amount_money":{{"amount":2500,"currency":"USD"}},"status":"{status}"}}}}}}}}"#
    )
}

pub fn square_signature(body: &str) -> String {
    square::sign(SQUARE_URL, body.as_bytes(), SQUARE_KEY)
}
