//! Square webhooks.
//!
//! Signature header: `X-Square-HmacSha256-Signature`, the base64 HMAC-SHA256 of the notification URL followed by the
//! raw body, keyed with the subscription's signature key. The URL must match the one registered with Square exactly.
//!
//! Square reports payments through `payment.created` and `payment.updated`; the outcome is carried by the payment's
//! status. The platform's reference is the payment's `reference_id`.
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{AdapterError, EventClassification, EventEnvelope, ProviderAdapter, SettlementEvent};
use crate::{
    db_types::{Provider, SettlementOutcome},
    helpers::{base64_signature, verify_base64_signature},
};

pub const SQUARE_SIGNATURE_HEADER: &str = "X-Square-HmacSha256-Signature";

const IRRELEVANT_FAMILIES: [&str; 9] = [
    "bank_account.",
    "customer.",
    "dispute.",
    "invoice.",
    "loyalty.",
    "order.",
    "payout.",
    "refund.",
    "subscription.",
];

#[derive(Debug, Clone, Default)]
pub struct SquareAdapter {
    notification_url: String,
}

impl SquareAdapter {
    pub fn new(notification_url: &str) -> Self {
        Self { notification_url: notification_url.to_string() }
    }

    pub fn notification_url(&self) -> &str {
        &self.notification_url
    }
}

pub fn sign(notification_url: &str, raw_body: &[u8], signature_key: &str) -> String {
    base64_signature(signature_key.as_bytes(), &[notification_url.as_bytes(), raw_body])
}

#[derive(Deserialize)]
struct SquareEnvelope {
    event_id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
}

#[derive(Deserialize)]
struct SquareEvent {
    event_id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    created_at: Option<String>,
    data: Option<SquareEventData>,
}

#[derive(Deserialize)]
struct SquareEventData {
    object: Option<SquareEventObject>,
}

#[derive(Deserialize)]
struct SquareEventObject {
    payment: Option<SquarePayment>,
}

#[derive(Deserialize)]
struct SquarePayment {
    id: Option<String>,
    reference_id: Option<String>,
    status: Option<String>,
}

impl ProviderAdapter for SquareAdapter {
    fn provider(&self) -> Provider {
        Provider::Square
    }

    fn signature_header(&self) -> &'static str {
        SQUARE_SIGNATURE_HEADER
    }

    fn verify(&self, raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
        verify_base64_signature(secret.as_bytes(), &[self.notification_url.as_bytes(), raw_body], signature_header)
    }

    fn envelope(&self, raw_body: &[u8]) -> Result<EventEnvelope, AdapterError> {
        let body: SquareEnvelope = serde_json::from_slice(raw_body)?;
        let event_type = body.event_type.ok_or(AdapterError::MissingField("type"))?;
        Ok(EventEnvelope { provider_event_id: body.event_id, event_type })
    }

    fn classify(&self, event_type: &str) -> EventClassification {
        match event_type {
            "payment.created" | "payment.updated" => EventClassification::status_dependent(),
            t if IRRELEVANT_FAMILIES.iter().any(|f| t.starts_with(f)) => EventClassification::irrelevant(),
            _ => EventClassification::unrecognized(),
        }
    }

    fn extract_event(&self, raw_body: &[u8]) -> Result<SettlementEvent, AdapterError> {
        let body: SquareEvent = serde_json::from_slice(raw_body)?;
        let event_type = body.event_type.ok_or(AdapterError::MissingField("type"))?;
        if !self.classify(&event_type).is_relevant() {
            return Err(AdapterError::NotASettlementEvent(event_type));
        }
        let provider_event_id = body.event_id.ok_or(AdapterError::MissingField("event_id"))?;
        let payment = body
            .data
            .and_then(|d| d.object)
            .and_then(|o| o.payment)
            .ok_or(AdapterError::MissingField("data.object.payment"))?;
        let payment_reference = payment
            .reference_id
            .filter(|s| !s.is_empty())
            .ok_or(AdapterError::MissingField("data.object.payment.reference_id"))?;
        let status = payment.status.ok_or(AdapterError::MissingField("data.object.payment.status"))?;
        let outcome = self.outcome_for_status(&status).ok_or(AdapterError::UnknownStatus(status))?;
        let created_at = body.created_at.ok_or(AdapterError::MissingField("created_at"))?;
        let occurred_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| AdapterError::InvalidTimestamp(created_at.clone()))?
            .with_timezone(&Utc);
        Ok(SettlementEvent {
            provider_event_id,
            provider: Provider::Square,
            event_type,
            payment_reference,
            provider_payment_id: payment.id,
            outcome,
            occurred_at,
            raw_payload: raw_body.to_vec(),
        })
    }

    fn outcome_for_status(&self, status: &str) -> Option<SettlementOutcome> {
        match status {
            "COMPLETED" => Some(SettlementOutcome::Succeeded),
            "FAILED" | "CANCELED" => Some(SettlementOutcome::Failed),
            "APPROVED" | "PENDING" => Some(SettlementOutcome::Pending),
            _ => None,
        }
    }
}
