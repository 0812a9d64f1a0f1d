use serde::{Deserialize, Serialize};
use sgw_common::{CurrencyCode, MinorUnits};

use crate::db_types::{ErrorKind, Order, PaymentStatus, Provider, SettlementOutcome};

/// Fired once per order when its payment reaches a terminal state. This is the outbound notification contract that
/// the email/SMS dispatcher consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettledEvent {
    pub order_id: String,
    pub payment_reference: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub outcome: SettlementOutcome,
}

impl PaymentSettledEvent {
    pub fn new(order: &Order, status: PaymentStatus) -> Self {
        let outcome = match status {
            PaymentStatus::Succeeded => SettlementOutcome::Succeeded,
            PaymentStatus::Failed => SettlementOutcome::Failed,
            PaymentStatus::Pending => SettlementOutcome::Pending,
        };
        Self {
            order_id: order.order_id.clone(),
            payment_reference: order.payment_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            outcome,
        }
    }
}

/// Fired when a delivery lands in `FAILED` with nothing left to retry, i.e. it needs manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailedEvent {
    pub delivery_id: i64,
    pub provider: Provider,
    pub provider_event_id: Option<String>,
    pub error_kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentSettled(PaymentSettledEvent),
    DeliveryFailed(DeliveryFailedEvent),
}
