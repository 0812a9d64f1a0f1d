use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db_types::{Provider, SettlementOutcome};

/// Canonical, provider-agnostic description of something that happened to a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    /// Unique per provider. `(provider, provider_event_id)` is the deduplication key.
    pub provider_event_id: String,
    pub provider: Provider,
    pub event_type: String,
    /// The platform's payment reference, carried in the provider's metadata fields.
    pub payment_reference: String,
    pub provider_payment_id: Option<String>,
    pub outcome: SettlementOutcome,
    /// As reported by the provider.
    pub occurred_at: DateTime<Utc>,
    #[serde(skip)]
    pub raw_payload: Vec<u8>,
}

/// The identifying header of a webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// `None` when the provider sends no usable identifier for this kind of event.
    pub provider_event_id: Option<String>,
    pub event_type: String,
}
