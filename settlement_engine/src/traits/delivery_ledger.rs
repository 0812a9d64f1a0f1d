use chrono::{DateTime, Utc};

use crate::{
    db_types::{DeliveryRecord, NewDelivery, Provider},
    traits::{
        data_objects::{AttachResult, DeliveryQueryFilter, OutcomeUpdate},
        SettlementError,
    },
};

/// The webhook delivery ledger. Every inbound call gets a row, whether or not it verifies, and rows are never
/// deleted. The ledger is also the retry queue: a `FAILED` row with a `next_attempt_at` is waiting to be retried.
#[allow(async_fn_in_trait)]
pub trait DeliveryLedger: Clone {
    /// Creates a `RECEIVED` row for a delivery. Always the first thing that happens to a webhook.
    async fn record_received(&self, delivery: NewDelivery) -> Result<DeliveryRecord, SettlementError>;

    /// `RECEIVED -> VERIFIED`, once the signature has been checked.
    async fn mark_verified(&self, id: i64) -> Result<DeliveryRecord, SettlementError>;

    /// Records the event identity on the delivery.
    ///
    /// `(provider, provider_event_id)` is unique across the ledger. When another row already owns the event id, this
    /// row is linked to it through `duplicate_of` and [`AttachResult::Duplicate`] carries the owning row. A `None` event
    /// id only records the event type and payment reference.
    async fn attach_event(
        &self,
        id: i64,
        provider_event_id: Option<&str>,
        event_type: &str,
        payment_reference: Option<&str>,
    ) -> Result<AttachResult, SettlementError>;

    /// Counts a processing attempt. Returns the new attempt count.
    async fn begin_attempt(&self, id: i64) -> Result<i64, SettlementError>;

    async fn update_outcome(&self, id: i64, update: OutcomeUpdate) -> Result<DeliveryRecord, SettlementError>;

    async fn fetch_delivery(&self, id: i64) -> Result<Option<DeliveryRecord>, SettlementError>;

    /// The row that owns the given event, if any.
    async fn fetch_delivery_by_event(
        &self,
        provider: Provider,
        provider_event_id: &str,
    ) -> Result<Option<DeliveryRecord>, SettlementError>;

    /// Claims up to `limit` rows that are due for processing and hides them from other workers until `lease_until`.
    ///
    /// Due rows are `FAILED` rows whose `next_attempt_at` has passed, and `VERIFIED` rows owning an event that have not
    /// been touched since `stale_before` (their worker died mid-delivery).
    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, SettlementError>;

    /// Most recent first.
    async fn search_deliveries(&self, filter: DeliveryQueryFilter) -> Result<Vec<DeliveryRecord>, SettlementError>;
}
