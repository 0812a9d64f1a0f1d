use std::fmt::Debug;

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{DeliveryRecord, NewPayment, Order, Payment},
    traits::{DeliveryLedger, DeliveryQueryFilter, SettlementDatabase, SettlementError},
};

/// A payment and its orders, as shown to UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub payment: Payment,
    pub orders: Vec<Order>,
}

/// `PaymentsApi` covers payment registration and the read-only queries used by dashboards and operators.
pub struct PaymentsApi<B> {
    db: B,
}

impl<B> Debug for PaymentsApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentsApi")
    }
}

impl<B> PaymentsApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> PaymentsApi<B>
where B: SettlementDatabase + DeliveryLedger
{
    /// Registers a pending payment and its order. Must happen before the provider can send webhooks for it.
    ///
    /// Returns `false` in the second field if an identical payment was already registered.
    pub async fn register_payment(&self, payment: NewPayment) -> Result<(PaymentView, bool), SettlementError> {
        if !payment.amount.is_positive() {
            return Err(SettlementError::InvalidRequest(format!("Amount must be positive, got {}", payment.amount)));
        }
        if payment.reference.trim().is_empty() || payment.order_id.trim().is_empty() {
            return Err(SettlementError::InvalidRequest("Payment reference and order id are required".to_string()));
        }
        let (payment, order, inserted) = self.db.insert_payment(payment).await?;
        if inserted {
            info!("💰️ Payment {} registered for order {}", payment.id, order.order_id);
        }
        let orders = self.db.fetch_orders_for_payment(&payment.id).await?;
        Ok((PaymentView { payment, orders }, inserted))
    }

    pub async fn payment_status(&self, reference: &str) -> Result<PaymentView, SettlementError> {
        let payment =
            self.db.fetch_payment(reference).await?.ok_or_else(|| SettlementError::PaymentNotFound(reference.into()))?;
        let orders = self.db.fetch_orders_for_payment(reference).await?;
        Ok(PaymentView { payment, orders })
    }

    pub async fn deliveries(&self, filter: DeliveryQueryFilter) -> Result<Vec<DeliveryRecord>, SettlementError> {
        self.db.search_deliveries(filter).await
    }

    pub async fn delivery(&self, id: i64) -> Result<DeliveryRecord, SettlementError> {
        self.db.fetch_delivery(id).await?.ok_or(SettlementError::DeliveryNotFound(id))
    }
}
