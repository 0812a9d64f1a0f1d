use log::*;
use settlement_engine::{
    db_types::{DeliveryStatus, ErrorKind, OrderPaymentStatus, OrderStatusType, PaymentStatus, Provider},
    traits::{DeliveryLedger, DeliveryQueryFilter, SettlementError},
    DeliveryOutcome,
    Disposition,
    SettlementDatabase,
    VerificationError,
    WebhookError,
};

mod support;

use support::*;

#[tokio::test]
async fn stripe_success_settles_payment_and_order() {
    let mut h = setup().await;
    h.register("pay_100", Provider::Stripe, 5000, "INR", "ord_100").await;
    let body = stripe_event("evt_1", "payment_intent.succeeded", "pay_100");

    let outcome =
        h.webhooks.process_delivery(Provider::Stripe, Some(&stripe_signature(&body)), body.as_bytes()).await.unwrap();
    let DeliveryOutcome::Completed { delivery_id, result } = &outcome else {
        panic!("Expected a completed delivery, got {outcome:?}");
    };
    assert_eq!(result.disposition, Disposition::Settled);
    assert_eq!(result.payment_status, Some(PaymentStatus::Succeeded));

    let payment = h.db.fetch_payment("pay_100").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert!(payment.verified_at.is_some());
    let orders = h.db.fetch_orders_for_payment("pay_100").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatusType::Paid);
    assert_eq!(orders[0].payment_status, OrderPaymentStatus::Verified);

    let delivery = h.db.fetch_delivery(*delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.provider_event_id.as_deref(), Some("evt_1"));
    assert_eq!(delivery.payment_reference.as_deref(), Some("pay_100"));
    assert_eq!(delivery.attempt_count, 1);
    assert_eq!(delivery.result.as_deref(), Some(outcome.body().as_str()));

    let settled = h.settled_events();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].order_id, "ord_100");
    assert_eq!(settled[0].amount.value(), 5000);
    assert_eq!(settled[0].currency.as_str(), "INR");

    // Stripe retries the same event. Nothing changes and nobody is notified again.
    let again =
        h.webhooks.process_delivery(Provider::Stripe, Some(&stripe_signature(&body)), body.as_bytes()).await.unwrap();
    let DeliveryOutcome::Replayed { original_id, result, delivery_id: second_id } = &again else {
        panic!("Expected a replay, got {again:?}");
    };
    assert_eq!(original_id, delivery_id);
    assert_eq!(result, &outcome.body());
    assert!(h.settled_events().is_empty());
    let second = h.db.fetch_delivery(*second_id).await.unwrap().unwrap();
    assert_eq!(second.duplicate_of, Some(*delivery_id));
    assert_eq!(second.provider_event_id, None);
    assert_eq!(second.status, DeliveryStatus::Delivered);
    tear_down(h).await;
    info!("🚀️ test complete");
}

#[tokio::test]
async fn razorpay_failure_for_unknown_payment_is_not_retried() {
    let mut h = setup().await;
    h.register("pay_100", Provider::Razorpay, 500000, "INR", "ord_100").await;
    let body = razorpay_event("payment.failed", "pay_DESlfW9H8K9uqM", "pay_200");

    let failure = h
        .webhooks
        .process_delivery(Provider::Razorpay, Some(&razorpay_signature(&body)), body.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(failure.error, WebhookError::Settlement(SettlementError::PaymentNotFound("pay_200".into())));
    assert_eq!(failure.retry_at, None);
    assert!(!failure.is_retryable());

    let delivery = h.db.fetch_delivery(failure.delivery_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.error_kind, Some(ErrorKind::PaymentNotFound));
    assert_eq!(delivery.next_attempt_at, None);
    assert_eq!(delivery.provider_event_id.as_deref(), Some("pay_DESlfW9H8K9uqM:payment.failed"));

    let untouched = h.db.fetch_orders_for_payment("pay_100").await.unwrap();
    assert_eq!(untouched[0].status, OrderStatusType::Pending);
    assert!(h.settled_events().is_empty());
    let failed = h.failed_events();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_kind, ErrorKind::PaymentNotFound);

    // The provider redelivers. The stored failure is replayed without touching the settlement engine again.
    let again = h
        .webhooks
        .process_delivery(Provider::Razorpay, Some(&razorpay_signature(&body)), body.as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(again.error, WebhookError::ReplayedFailure { kind: ErrorKind::PaymentNotFound, .. }));
    tear_down(h).await;
}

#[tokio::test]
async fn terminal_payments_are_immutable() {
    let mut h = setup().await;
    h.register("pay_300", Provider::Square, 2500, "USD", "ord_300").await;
    let completed = square_event("sq_evt_1", "pay_300", "COMPLETED");
    let outcome = h
        .webhooks
        .process_delivery(Provider::Square, Some(&square_signature(&completed)), completed.as_bytes())
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Completed { .. }));
    assert_eq!(h.settled_events().len(), 1);

    // A late, contradicting event is acknowledged but does not move the payment.
    let canceled = square_event("sq_evt_2", "pay_300", "CANCELED");
    let outcome = h
        .webhooks
        .process_delivery(Provider::Square, Some(&square_signature(&canceled)), canceled.as_bytes())
        .await
        .unwrap();
    let DeliveryOutcome::Completed { result, .. } = outcome else {
        panic!("Expected a completed delivery");
    };
    assert_eq!(result.disposition, Disposition::AlreadyTerminal);
    assert_eq!(result.payment_status, Some(PaymentStatus::Succeeded));
    let payment = h.db.fetch_payment("pay_300").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    let orders = h.db.fetch_orders_for_payment("pay_300").await.unwrap();
    assert_eq!(orders[0].status, OrderStatusType::Paid);
    assert!(h.settled_events().is_empty());
    tear_down(h).await;
}

#[tokio::test]
async fn pending_outcomes_change_nothing() {
    let mut h = setup().await;
    h.register("pay_301", Provider::Square, 2500, "USD", "ord_301").await;
    let approved = square_event("sq_evt_3", "pay_301", "APPROVED");
    let outcome = h
        .webhooks
        .process_delivery(Provider::Square, Some(&square_signature(&approved)), approved.as_bytes())
        .await
        .unwrap();
    let DeliveryOutcome::Completed { result, .. } = outcome else {
        panic!("Expected a completed delivery");
    };
    assert_eq!(result.disposition, Disposition::Pending);
    let payment = h.db.fetch_payment("pay_301").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(h.settled_events().is_empty());
    tear_down(h).await;
}

#[tokio::test]
async fn tampered_bodies_are_recorded_and_rejected() {
    let mut h = setup().await;
    h.register("pay_100", Provider::Stripe, 5000, "INR", "ord_100").await;
    let body = stripe_event("evt_1", "payment_intent.succeeded", "pay_100");
    let signature = stripe_signature(&body);
    let tampered = body.replace("5000", "5");

    let failure =
        h.webhooks.process_delivery(Provider::Stripe, Some(&signature), tampered.as_bytes()).await.unwrap_err();
    assert_eq!(failure.error, WebhookError::Verification(VerificationError::InvalidSignature));
    let delivery = h.db.fetch_delivery(failure.delivery_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.error_kind, Some(ErrorKind::Verification));
    assert_eq!(delivery.provider_event_id, None);
    assert_eq!(delivery.payload, tampered.as_bytes());

    let failure = h.webhooks.process_delivery(Provider::Stripe, None, body.as_bytes()).await.unwrap_err();
    assert_eq!(failure.error, WebhookError::Verification(VerificationError::MissingSignature("Stripe-Signature")));

    let payment = h.db.fetch_payment("pay_100").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(h.settled_events().is_empty());

    // Verification failures do not claim the event id, so the genuine delivery still goes through.
    let outcome = h.webhooks.process_delivery(Provider::Stripe, Some(&signature), body.as_bytes()).await.unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Completed { .. }));
    let failed = h.db.search_deliveries(DeliveryQueryFilter::default().with_status(DeliveryStatus::Failed)).await;
    assert_eq!(failed.unwrap().len(), 2);
    tear_down(h).await;
}

#[tokio::test]
async fn irrelevant_and_unknown_events_are_acknowledged() {
    let mut h = setup().await;
    h.register("pay_100", Provider::Stripe, 5000, "INR", "ord_100").await;
    let customer = stripe_event("evt_10", "customer.created", "pay_100");
    let outcome = h
        .webhooks
        .process_delivery(Provider::Stripe, Some(&stripe_signature(&customer)), customer.as_bytes())
        .await
        .unwrap();
    let DeliveryOutcome::Completed { result, delivery_id } = outcome else {
        panic!("Expected a completed delivery");
    };
    assert_eq!(result.disposition, Disposition::Ignored);
    let delivery = h.db.fetch_delivery(delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.event_type, "customer.created");
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempt_count, 0);

    let novel = stripe_event("evt_11", "issuing_card.created", "pay_100");
    let outcome = h
        .webhooks
        .process_delivery(Provider::Stripe, Some(&stripe_signature(&novel)), novel.as_bytes())
        .await
        .unwrap();
    let DeliveryOutcome::Completed { result, .. } = outcome else {
        panic!("Expected a completed delivery");
    };
    assert_eq!(result.disposition, Disposition::Unrecognized);

    let payment = h.db.fetch_payment("pay_100").await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(h.settled_events().is_empty());
    tear_down(h).await;
}

#[tokio::test]
async fn malformed_payloads_fail_permanently() {
    let mut h = setup().await;
    let body = stripe_event("evt_12", "payment_intent.succeeded", "pay_100").replace("payment_reference", "order_ref");
    let failure = h
        .webhooks
        .process_delivery(Provider::Stripe, Some(&stripe_signature(&body)), body.as_bytes())
        .await
        .unwrap_err();
    assert_eq!(failure.error.kind(), ErrorKind::Payload);
    assert_eq!(failure.retry_at, None);
    let delivery = h.db.fetch_delivery(failure.delivery_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(delivery.event_type, "payment_intent.succeeded");
    assert_eq!(delivery.error_kind, Some(ErrorKind::Payload));
    assert_eq!(h.failed_events().len(), 1);
    tear_down(h).await;
}

#[tokio::test]
async fn unregistered_providers_are_rejected_up_front() {
    let h = setup().await;
    assert!(matches!(h.webhooks.resolve_provider("paypal"), Err(WebhookError::UnknownProvider(_))));
    let (provider, header) = h.webhooks.resolve_provider("razorpay").unwrap();
    assert_eq!(provider, Provider::Razorpay);
    assert_eq!(header, "X-Razorpay-Signature");
    tear_down(h).await;
}
