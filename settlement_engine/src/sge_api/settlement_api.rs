use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Provider, SettlementOutcome},
    events::{EventProducers, PaymentSettledEvent},
    providers::SettlementEvent,
    traits::{SettlementChange, SettlementDatabase, SettlementError, SettlementRequest, SettlementResult},
};

/// `SettlementApi` applies settlement outcomes to the payment/order aggregate and notifies subscribers of terminal
/// transitions.
///
/// Notifications are sent after the transaction commits, once per order, and only by the call that performed the
/// transition. Replays and out-of-order events that hit an already settled payment are silent.
#[derive(Clone)]
pub struct SettlementApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for SettlementApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B> SettlementApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> SettlementApi<B>
where B: SettlementDatabase
{
    /// Applies a canonical provider event and notifies subscribers.
    pub async fn apply(&self, event: &SettlementEvent) -> Result<SettlementResult, SettlementError> {
        trace!(
            "🔄️ Applying {} event {} ({}) to payment {}",
            event.provider,
            event.provider_event_id,
            event.outcome,
            event.payment_reference
        );
        let result = self.transition(&SettlementRequest::from(event)).await?;
        self.notify(&result).await;
        Ok(result)
    }

    /// Applies an outcome learned outside of a webhook, e.g. from a status look-up, and notifies subscribers.
    pub async fn apply_outcome(
        &self,
        reference: &str,
        provider: Provider,
        outcome: SettlementOutcome,
    ) -> Result<SettlementResult, SettlementError> {
        let result = self.transition(&SettlementRequest::new(reference, provider, outcome)).await?;
        self.notify(&result).await;
        Ok(result)
    }

    /// The transactional state change, without notifications. Callers that bound the transaction with a deadline
    /// call this and [`Self::notify`] separately, so that a slow subscriber can never cause a rollback.
    pub async fn transition(&self, request: &SettlementRequest) -> Result<SettlementResult, SettlementError> {
        let result = self.db.settle_payment(request).await?;
        match result.change {
            SettlementChange::Settled { from, to } => {
                info!("🔄️ Payment {} settled: {from} -> {to}", request.payment_reference);
            },
            SettlementChange::AlreadyTerminal { status } => {
                info!(
                    "🔄️ Payment {} is already {status}. {} event recorded without changes.",
                    request.payment_reference, request.outcome
                );
            },
            SettlementChange::StillPending => {
                debug!("🔄️ Payment {} is still pending. Nothing to do.", request.payment_reference);
            },
        }
        Ok(result)
    }

    /// Publishes one [`PaymentSettledEvent`] per order, if and only if `result` is a transition.
    pub async fn notify(&self, result: &SettlementResult) {
        let SettlementChange::Settled { to, .. } = result.change else {
            return;
        };
        if self.producers.payment_settled_producer.is_empty() {
            return;
        }
        debug!("🔄️📬️ Notifying subscribers of {} settled orders", result.orders.len());
        for order in &result.orders {
            self.producers.publish_payment_settled(PaymentSettledEvent::new(order, to)).await;
        }
    }
}
