use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{
        DeliveryRecord,
        DeliveryStatus,
        ErrorKind,
        IdempotencyRecord,
        Order,
        Payment,
        PaymentStatus,
        Provider,
        SettlementOutcome,
    },
    providers::SettlementEvent,
};

/// The input to the settlement transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    pub payment_reference: String,
    pub provider: Provider,
    pub outcome: SettlementOutcome,
    /// Recorded as `verified_at` on success.
    pub settled_at: DateTime<Utc>,
}

impl SettlementRequest {
    pub fn new(payment_reference: &str, provider: Provider, outcome: SettlementOutcome) -> Self {
        Self { payment_reference: payment_reference.to_string(), provider, outcome, settled_at: Utc::now() }
    }
}

impl From<&SettlementEvent> for SettlementRequest {
    fn from(event: &SettlementEvent) -> Self {
        Self::new(&event.payment_reference, event.provider, event.outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "change")]
pub enum SettlementChange {
    /// This call moved the payment out of `PENDING`.
    Settled { from: PaymentStatus, to: PaymentStatus },
    /// The payment had already settled; the event was recorded and nothing changed.
    AlreadyTerminal { status: PaymentStatus },
    /// The outcome was `PENDING`; nothing changed.
    StillPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementResult {
    pub payment: Payment,
    /// The payment's orders, as they are after the transition.
    pub orders: Vec<Order>,
    pub change: SettlementChange,
}

impl SettlementResult {
    pub fn is_transition(&self) -> bool {
        matches!(self.change, SettlementChange::Settled { .. })
    }
}

/// The result of tagging a delivery row with its provider event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachResult {
    /// This row now owns the event.
    Attached(DeliveryRecord),
    /// Another row already owns the event. The current row has been marked as its duplicate.
    Duplicate(DeliveryRecord),
}

/// How a processing attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeUpdate {
    Delivered { result: String },
    /// Terminal failure. Clears any queued retry.
    Failed { kind: ErrorKind, message: String },
    /// `FAILED` for now, to be picked up again at `next_attempt_at`.
    RetryScheduled { kind: ErrorKind, message: String, next_attempt_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryQueryFilter {
    pub status: Option<DeliveryStatus>,
    pub provider: Option<Provider>,
    pub limit: Option<i64>,
}

impl DeliveryQueryFilter {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.filter(|l| *l > 0).unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyClaim {
    /// The caller owns the key and must either store a response or release it.
    Claimed,
    /// The key is taken. The record's `response` is `None` while its owner is still running.
    Existing(IdempotencyRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPaymentStatus {
    /// The provider's own status string, e.g. `succeeded` or `captured`.
    pub provider_status: String,
    pub outcome: SettlementOutcome,
}
