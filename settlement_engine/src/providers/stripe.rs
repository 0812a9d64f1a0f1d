//! Stripe webhooks.
//!
//! Signature header: `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The signed content is
//! `"<t>.<raw body>"`. Stripe sends several `v1` entries while a signing secret is being rolled, and any of them may
//! match.
//!
//! The platform's payment reference travels in the PaymentIntent's `metadata.payment_reference`.
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{AdapterError, EventClassification, EventEnvelope, ProviderAdapter, SettlementEvent};
use crate::{
    db_types::{Provider, SettlementOutcome},
    helpers::{hex_signature, verify_hex_signature},
};

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_SIGNATURE_TOLERANCE: Duration = Duration::seconds(300);
pub const PAYMENT_REFERENCE_KEY: &str = "payment_reference";

const IRRELEVANT_EVENTS: [&str; 5] = [
    "payment_intent.created",
    "payment_intent.requires_action",
    "payment_intent.amount_capturable_updated",
    "payment_intent.partially_funded",
    "payment_intent.updated",
];

const IRRELEVANT_FAMILIES: [&str; 12] = [
    "account.",
    "balance.",
    "charge.",
    "checkout.session.",
    "customer.",
    "invoice.",
    "payment_method.",
    "payout.",
    "price.",
    "product.",
    "refund.",
    "setup_intent.",
];

#[derive(Debug, Clone)]
pub struct StripeAdapter {
    /// Maximum distance between the signature timestamp and now. `None` disables the replay window check.
    tolerance: Option<Duration>,
}

impl Default for StripeAdapter {
    fn default() -> Self {
        Self { tolerance: Some(DEFAULT_SIGNATURE_TOLERANCE) }
    }
}

impl StripeAdapter {
    pub fn new(tolerance: Option<Duration>) -> Self {
        Self { tolerance }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSignature {
    /// Kept verbatim, since it is part of the signed content.
    pub timestamp: String,
    pub signatures: Vec<String>,
}

pub fn parse_signature_header(header: &str) -> Option<StripeSignature> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = Some(value.to_string()),
            "v1" => signatures.push(value.to_string()),
            // v0 and future schemes are ignored
            _ => {},
        }
    }
    let timestamp = timestamp?;
    if signatures.is_empty() {
        return None;
    }
    Some(StripeSignature { timestamp, signatures })
}

pub fn verify_signature(
    raw_body: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Option<Duration>,
) -> bool {
    let Some(sig) = parse_signature_header(header) else {
        return false;
    };
    let Ok(ts) = sig.timestamp.parse::<i64>() else {
        return false;
    };
    if let Some(tolerance) = tolerance {
        // `t` is attacker-controlled, so the difference may not fit in an i64
        let skew = now.timestamp().checked_sub(ts).map(i64::unsigned_abs);
        let allowed = tolerance.num_seconds().unsigned_abs();
        if !skew.is_some_and(|skew| skew <= allowed) {
            return false;
        }
    }
    let parts: [&[u8]; 3] = [sig.timestamp.as_bytes(), b".", raw_body];
    sig.signatures.iter().any(|s| verify_hex_signature(secret.as_bytes(), &parts, s))
}

/// Produces a `Stripe-Signature` header value for `raw_body`, as Stripe would.
pub fn sign(raw_body: &[u8], secret: &str, timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let sig = hex_signature(secret.as_bytes(), &[ts.as_bytes(), b".", raw_body]);
    format!("t={ts},v1={sig}")
}

#[derive(Deserialize)]
struct StripeEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
}

#[derive(Deserialize)]
struct StripeEventBody {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    created: Option<i64>,
    data: Option<StripeEventData>,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: StripePaymentIntent,
}

#[derive(Deserialize)]
struct StripePaymentIntent {
    id: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    status: Option<String>,
}

impl ProviderAdapter for StripeAdapter {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    fn signature_header(&self) -> &'static str {
        STRIPE_SIGNATURE_HEADER
    }

    fn verify(&self, raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
        verify_signature(raw_body, signature_header, secret, Utc::now(), self.tolerance)
    }

    fn envelope(&self, raw_body: &[u8]) -> Result<EventEnvelope, AdapterError> {
        let body: StripeEnvelope = serde_json::from_slice(raw_body)?;
        let event_type = body.event_type.ok_or(AdapterError::MissingField("type"))?;
        let id = body.id.ok_or(AdapterError::MissingField("id"))?;
        Ok(EventEnvelope { provider_event_id: Some(id), event_type })
    }

    fn classify(&self, event_type: &str) -> EventClassification {
        match event_type {
            "payment_intent.succeeded" => EventClassification::settles(SettlementOutcome::Succeeded),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                EventClassification::settles(SettlementOutcome::Failed)
            },
            "payment_intent.processing" => EventClassification::settles(SettlementOutcome::Pending),
            t if IRRELEVANT_EVENTS.contains(&t) || IRRELEVANT_FAMILIES.iter().any(|f| t.starts_with(f)) => {
                EventClassification::irrelevant()
            },
            _ => EventClassification::unrecognized(),
        }
    }

    fn extract_event(&self, raw_body: &[u8]) -> Result<SettlementEvent, AdapterError> {
        let body: StripeEventBody = serde_json::from_slice(raw_body)?;
        let event_type = body.event_type.ok_or(AdapterError::MissingField("type"))?;
        let classification = self.classify(&event_type);
        if !classification.is_relevant() {
            return Err(AdapterError::NotASettlementEvent(event_type));
        }
        let provider_event_id = body.id.ok_or(AdapterError::MissingField("id"))?;
        let created = body.created.ok_or(AdapterError::MissingField("created"))?;
        let occurred_at = Utc
            .timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| AdapterError::InvalidTimestamp(created.to_string()))?;
        let intent = body.data.ok_or(AdapterError::MissingField("data.object"))?.object;
        let payment_reference = intent
            .metadata
            .get(PAYMENT_REFERENCE_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(AdapterError::MissingField("data.object.metadata.payment_reference"))?
            .to_string();
        let outcome = match classification.outcome {
            Some(outcome) => outcome,
            None => {
                let status = intent.status.as_deref().ok_or(AdapterError::MissingField("data.object.status"))?;
                self.outcome_for_status(status).ok_or_else(|| AdapterError::UnknownStatus(status.to_string()))?
            },
        };
        Ok(SettlementEvent {
            provider_event_id,
            provider: Provider::Stripe,
            event_type,
            payment_reference,
            provider_payment_id: intent.id,
            outcome,
            occurred_at,
            raw_payload: raw_body.to_vec(),
        })
    }

    fn outcome_for_status(&self, status: &str) -> Option<SettlementOutcome> {
        match status {
            "succeeded" => Some(SettlementOutcome::Succeeded),
            "canceled" => Some(SettlementOutcome::Failed),
            "processing" | "requires_capture" | "requires_action" | "requires_confirmation"
            | "requires_payment_method" => Some(SettlementOutcome::Pending),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    const SUCCEEDED: &str = r#"{"id":"evt_1","object":"event","type":"payment_intent.succeeded","created":1717243200,"data":{"object":{"id":"pi_3Abc","object":"payment_intent","amount":5000,"currency":"inr","status":"succeeded","metadata":{"payment_reference":"pay_100"}}}}"#;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_717_243_210, 0).unwrap()
    }

    #[test]
    fn header_parsing() {
        let sig = parse_signature_header("t=1717243200,v1=abc,v0=old,v1=def").unwrap();
        assert_eq!(sig.timestamp, "1717243200");
        assert_eq!(sig.signatures, vec!["abc".to_string(), "def".to_string()]);
        assert!(parse_signature_header("v1=abc").is_none());
        assert!(parse_signature_header("t=1717243200").is_none());
        assert!(parse_signature_header("garbage").is_none());
    }

    #[test]
    fn verifies_a_genuine_signature() {
        let header = sign(SUCCEEDED.as_bytes(), SECRET, 1_717_243_200);
        assert!(verify_signature(SUCCEEDED.as_bytes(), &header, SECRET, now(), Some(DEFAULT_SIGNATURE_TOLERANCE)));
    }

    #[test]
    fn accepts_any_of_several_v1_signatures() {
        let genuine = sign(SUCCEEDED.as_bytes(), SECRET, 1_717_243_200);
        let header = genuine.replace("v1=", "v1=deadbeef,v1=");
        assert!(verify_signature(SUCCEEDED.as_bytes(), &header, SECRET, now(), None));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let header = sign(SUCCEEDED.as_bytes(), SECRET, 1_717_243_200);
        let tampered = SUCCEEDED.replace("5000", "50");
        assert!(!verify_signature(tampered.as_bytes(), &header, SECRET, now(), None));
    }

    #[test]
    fn rejects_the_wrong_secret_and_stale_timestamps() {
        let header = sign(SUCCEEDED.as_bytes(), SECRET, 1_717_243_200);
        assert!(!verify_signature(SUCCEEDED.as_bytes(), &header, "whsec_other", now(), None));
        let much_later = now() + Duration::hours(1);
        assert!(!verify_signature(SUCCEEDED.as_bytes(), &header, SECRET, much_later, Some(DEFAULT_SIGNATURE_TOLERANCE)));
        assert!(verify_signature(SUCCEEDED.as_bytes(), &header, SECRET, much_later, None));
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let body = SUCCEEDED.as_bytes();
        for ts in [i64::MIN, i64::MAX] {
            let header = sign(body, SECRET, ts);
            assert!(!verify_signature(body, &header, SECRET, now(), Some(DEFAULT_SIGNATURE_TOLERANCE)));
        }
        let forged = "t=-9223372036854775808,v1=00";
        assert!(!verify_signature(b"{}", forged, "whsec", Utc::now(), Some(DEFAULT_SIGNATURE_TOLERANCE)));
        // without a tolerance only the signature counts
        let header = sign(body, SECRET, i64::MIN);
        assert!(verify_signature(body, &header, SECRET, now(), None));
    }

    #[test]
    fn extracts_the_canonical_event() {
        let adapter = StripeAdapter::default();
        let event = adapter.extract_event(SUCCEEDED.as_bytes()).unwrap();
        assert_eq!(event.provider_event_id, "evt_1");
        assert_eq!(event.provider, Provider::Stripe);
        assert_eq!(event.payment_reference, "pay_100");
        assert_eq!(event.provider_payment_id.as_deref(), Some("pi_3Abc"));
        assert_eq!(event.outcome, SettlementOutcome::Succeeded);
        assert_eq!(event.occurred_at.timestamp(), 1_717_243_200);
        assert_eq!(event.raw_payload, SUCCEEDED.as_bytes());
    }

    #[test]
    fn missing_reference_is_a_payload_error() {
        let adapter = StripeAdapter::default();
        let body = SUCCEEDED.replace(r#""payment_reference":"pay_100""#, r#""order":"1""#);
        let err = adapter.extract_event(body.as_bytes()).unwrap_err();
        assert_eq!(err, AdapterError::MissingField("data.object.metadata.payment_reference"));
        let err = adapter.extract_event(b"{not json").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidJson(_)));
    }

    #[test]
    fn classification() {
        let adapter = StripeAdapter::default();
        assert_eq!(adapter.classify("payment_intent.succeeded").outcome, Some(SettlementOutcome::Succeeded));
        assert_eq!(adapter.classify("payment_intent.canceled").outcome, Some(SettlementOutcome::Failed));
        assert_eq!(adapter.classify("payment_intent.processing").outcome, Some(SettlementOutcome::Pending));
        assert!(!adapter.classify("customer.created").is_relevant());
        assert_eq!(adapter.classify("charge.refunded").relevance, crate::providers::Relevance::Irrelevant);
        assert_eq!(adapter.classify("issuing_card.created").relevance, crate::providers::Relevance::Unrecognized);
        let body = SUCCEEDED.replace("payment_intent.succeeded", "customer.created");
        assert_eq!(
            adapter.extract_event(body.as_bytes()).unwrap_err(),
            AdapterError::NotASettlementEvent("customer.created".into())
        );
    }

    #[test]
    fn envelope_of_an_irrelevant_event() {
        let adapter = StripeAdapter::default();
        let env = adapter.envelope(br#"{"id":"evt_9","type":"customer.created","data":{"object":{}}}"#).unwrap();
        assert_eq!(env.provider_event_id.as_deref(), Some("evt_9"));
        assert_eq!(env.event_type, "customer.created");
    }
}
