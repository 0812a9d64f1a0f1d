//! Razorpay webhooks.
//!
//! Signature header: `X-Razorpay-Signature`, the hex HMAC-SHA256 of the raw body keyed with the webhook secret.
//!
//! Razorpay bodies carry no event id. Each payment id receives a given event at most once, so the event id is derived
//! as `"<entity id>:<event>"`. Notes are an object when populated and an empty array otherwise.
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{AdapterError, EventClassification, EventEnvelope, ProviderAdapter, SettlementEvent};
use crate::{
    db_types::{Provider, SettlementOutcome},
    helpers::{hex_signature, verify_hex_signature},
};

pub const RAZORPAY_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";
pub const PAYMENT_REFERENCE_NOTE: &str = "payment_reference";

const IRRELEVANT_FAMILIES: [&str; 13] = [
    "account.",
    "fund_account.",
    "invoice.",
    "order.",
    "payment.dispute.",
    "payment.downtime.",
    "payment_link.",
    "payout.",
    "qr_code.",
    "refund.",
    "settlement.",
    "subscription.",
    "transfer.",
];

#[derive(Debug, Clone, Default)]
pub struct RazorpayAdapter;

pub fn sign(raw_body: &[u8], secret: &str) -> String {
    hex_signature(secret.as_bytes(), &[raw_body])
}

#[derive(Deserialize)]
struct RazorpayEvent {
    event: Option<String>,
    #[serde(default)]
    contains: Vec<String>,
    #[serde(default)]
    payload: Map<String, Value>,
    created_at: Option<i64>,
}

#[derive(Deserialize)]
struct RazorpayPayment {
    id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    notes: Value,
}

impl RazorpayEvent {
    fn entity(&self, name: &str) -> Option<&Value> {
        self.payload.get(name).and_then(|p| p.get("entity"))
    }

    fn primary_entity_id(&self) -> Option<&str> {
        let name = self.contains.first()?;
        self.entity(name).and_then(|e| e.get("id")).and_then(Value::as_str)
    }
}

fn event_id(entity_id: &str, event: &str) -> String {
    format!("{entity_id}:{event}")
}

impl ProviderAdapter for RazorpayAdapter {
    fn provider(&self) -> Provider {
        Provider::Razorpay
    }

    fn signature_header(&self) -> &'static str {
        RAZORPAY_SIGNATURE_HEADER
    }

    fn verify(&self, raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
        verify_hex_signature(secret.as_bytes(), &[raw_body], signature_header)
    }

    fn envelope(&self, raw_body: &[u8]) -> Result<EventEnvelope, AdapterError> {
        let body: RazorpayEvent = serde_json::from_slice(raw_body)?;
        let event_type = body.event.clone().ok_or(AdapterError::MissingField("event"))?;
        let provider_event_id = body.primary_entity_id().map(|id| event_id(id, &event_type));
        Ok(EventEnvelope { provider_event_id, event_type })
    }

    fn classify(&self, event_type: &str) -> EventClassification {
        match event_type {
            "payment.captured" => EventClassification::settles(SettlementOutcome::Succeeded),
            "payment.failed" => EventClassification::settles(SettlementOutcome::Failed),
            "payment.authorized" => EventClassification::settles(SettlementOutcome::Pending),
            t if IRRELEVANT_FAMILIES.iter().any(|f| t.starts_with(f)) => EventClassification::irrelevant(),
            _ => EventClassification::unrecognized(),
        }
    }

    fn extract_event(&self, raw_body: &[u8]) -> Result<SettlementEvent, AdapterError> {
        let body: RazorpayEvent = serde_json::from_slice(raw_body)?;
        let event_type = body.event.clone().ok_or(AdapterError::MissingField("event"))?;
        let classification = self.classify(&event_type);
        if !classification.is_relevant() {
            return Err(AdapterError::NotASettlementEvent(event_type));
        }
        let entity = body.entity("payment").ok_or(AdapterError::MissingField("payload.payment.entity"))?;
        let payment: RazorpayPayment = serde_json::from_value(entity.clone())?;
        let payment_id = payment.id.ok_or(AdapterError::MissingField("payload.payment.entity.id"))?;
        let payment_reference = payment
            .notes
            .get(PAYMENT_REFERENCE_NOTE)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(AdapterError::MissingField("payload.payment.entity.notes.payment_reference"))?
            .to_string();
        let created = body.created_at.ok_or(AdapterError::MissingField("created_at"))?;
        let occurred_at = Utc
            .timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| AdapterError::InvalidTimestamp(created.to_string()))?;
        let outcome = match classification.outcome {
            Some(outcome) => outcome,
            None => {
                let status = payment.status.as_deref().ok_or(AdapterError::MissingField("status"))?;
                self.outcome_for_status(status).ok_or_else(|| AdapterError::UnknownStatus(status.to_string()))?
            },
        };
        Ok(SettlementEvent {
            provider_event_id: event_id(&payment_id, &event_type),
            provider: Provider::Razorpay,
            event_type,
            payment_reference,
            provider_payment_id: Some(payment_id),
            outcome,
            occurred_at,
            raw_payload: raw_body.to_vec(),
        })
    }

    fn outcome_for_status(&self, status: &str) -> Option<SettlementOutcome> {
        match status {
            "captured" => Some(SettlementOutcome::Succeeded),
            // refunds are settled separately, the payment itself went through
            "refunded" => Some(SettlementOutcome::Succeeded),
            "failed" => Some(SettlementOutcome::Failed),
            "created" | "authorized" => Some(SettlementOutcome::Pending),
            _ => None,
        }
    }
}
