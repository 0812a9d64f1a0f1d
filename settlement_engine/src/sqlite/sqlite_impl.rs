//! `SqliteDatabase` is the concrete settlement engine backend.
//!
//! It implements all of the storage traits defined in the [`traits`](crate::traits) module on top of the low-level
//! functions in [`db`](super::db), composing them into transactions where atomicity matters.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate::MigrateError, SqlitePool};

use super::db::{db_url, deliveries, idempotency, is_unique_violation, new_pool, orders, payments};
use crate::{
    db_types::{
        order_state_for,
        DeliveryRecord,
        DeliveryStatus,
        NewDelivery,
        NewIdempotencyRecord,
        NewPayment,
        Order,
        Payment,
        PaymentStatus,
        Provider,
    },
    traits::{
        AttachResult,
        DeliveryLedger,
        DeliveryQueryFilter,
        IdempotencyClaim,
        IdempotencyLedger,
        OutcomeUpdate,
        SettlementChange,
        SettlementDatabase,
        SettlementError,
        SettlementRequest,
        SettlementResult,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<(Payment, Order, bool), SettlementError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let result = match payments::insert_payment(&payment, now, &mut tx).await? {
            Some(stored) => {
                let order = orders::insert_order(&payment, now, &mut tx)
                    .await?
                    .ok_or_else(|| SettlementError::OrderAlreadyExists(payment.order_id.clone()))?;
                debug!(
                    "🗃️ Payment {} registered for order {} ({} {})",
                    stored.id, order.order_id, stored.amount, stored.currency
                );
                (stored, order, true)
            },
            None => {
                // no row under this reference means the provider payment id belongs to another payment
                let existing = payments::fetch_payment(&payment.reference, &mut tx)
                    .await?
                    .ok_or_else(|| SettlementError::PaymentAlreadyExists(payment.reference.clone()))?;
                let order = orders::fetch_order_by_order_id(&payment.order_id, &mut tx)
                    .await?
                    .filter(|o| o.payment_id == existing.id);
                match order {
                    Some(order) if payment.is_equivalent(&existing) => {
                        debug!("🗃️ Payment {} was already registered", existing.id);
                        (existing, order, false)
                    },
                    _ => return Err(SettlementError::PaymentAlreadyExists(payment.reference)),
                }
            },
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_payment(&self, reference: &str) -> Result<Option<Payment>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::fetch_payment(reference, &mut conn).await?;
        Ok(payment)
    }

    async fn fetch_orders_for_payment(&self, reference: &str) -> Result<Vec<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::fetch_orders_for_payment(reference, &mut conn).await?;
        Ok(orders)
    }

    async fn settle_payment(&self, request: &SettlementRequest) -> Result<SettlementResult, SettlementError> {
        let reference = request.payment_reference.as_str();
        let mut tx = self.pool.begin().await?;
        // Everything below runs under the write lock taken by this first statement
        let current = payments::lock_payment(reference, &mut tx)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(reference.to_string()))?;
        if current.provider != request.provider {
            return Err(SettlementError::ProviderMismatch {
                reference: reference.to_string(),
                event: request.provider,
                expected: current.provider,
            });
        }
        if current.status.is_terminal() {
            let orders = orders::fetch_orders_for_payment(reference, &mut tx).await?;
            tx.commit().await?;
            debug!("🗃️ Payment {reference} is already {}. Nothing to do.", current.status);
            let change = SettlementChange::AlreadyTerminal { status: current.status };
            return Ok(SettlementResult { payment: current, orders, change });
        }
        let Some(new_status) = request.outcome.terminal_status() else {
            let orders = orders::fetch_orders_for_payment(reference, &mut tx).await?;
            tx.commit().await?;
            return Ok(SettlementResult { payment: current, orders, change: SettlementChange::StillPending });
        };
        let now = Utc::now();
        let verified_at = (new_status == PaymentStatus::Succeeded).then_some(request.settled_at);
        let payment = payments::settle_pending_payment(reference, new_status, verified_at, now, &mut tx)
            .await?
            .ok_or_else(|| SettlementError::DatabaseError(format!("Payment {reference} left PENDING under lock")))?;
        let (order_status, order_payment_status) = order_state_for(new_status);
        let orders =
            orders::update_orders_for_payment(reference, order_status, order_payment_status, now, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Payment {reference} settled {} -> {}. {} orders updated",
            current.status,
            payment.status,
            orders.len()
        );
        let change = SettlementChange::Settled { from: current.status, to: payment.status };
        Ok(SettlementResult { payment, orders, change })
    }

    async fn mark_payment_verified(&self, reference: &str, at: DateTime<Utc>) -> Result<Payment, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        payments::stamp_last_verified(reference, at, &mut conn)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(reference.to_string()))
    }

    async fn close(&mut self) -> Result<(), SettlementError> {
        self.pool.close().await;
        Ok(())
    }
}

impl DeliveryLedger for SqliteDatabase {
    async fn record_received(&self, delivery: NewDelivery) -> Result<DeliveryRecord, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let record = deliveries::insert_delivery(delivery, &mut conn).await?;
        trace!("🗃️ Delivery #{} from {} recorded", record.id, record.provider);
        Ok(record)
    }

    async fn mark_verified(&self, id: i64) -> Result<DeliveryRecord, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        deliveries::set_status(id, DeliveryStatus::Verified, Utc::now(), &mut conn)
            .await?
            .ok_or(SettlementError::DeliveryNotFound(id))
    }

    async fn attach_event(
        &self,
        id: i64,
        provider_event_id: Option<&str>,
        event_type: &str,
        payment_reference: Option<&str>,
    ) -> Result<AttachResult, SettlementError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let attached = deliveries::set_event(id, provider_event_id, event_type, payment_reference, now, &mut tx).await;
        let result = match attached {
            Ok(Some(record)) => AttachResult::Attached(record),
            Ok(None) => return Err(SettlementError::DeliveryNotFound(id)),
            Err(e) if is_unique_violation(&e) => {
                let provider = deliveries::fetch_delivery(id, &mut tx)
                    .await?
                    .map(|r| r.provider)
                    .ok_or(SettlementError::DeliveryNotFound(id))?;
                let event_id = provider_event_id.unwrap_or_default();
                let original = deliveries::fetch_delivery_by_event(provider, event_id, &mut tx)
                    .await?
                    .ok_or_else(|| SettlementError::DatabaseError(format!("No owner for {provider} event {event_id}")))?;
                deliveries::mark_duplicate(id, original.id, event_type, payment_reference, now, &mut tx).await?;
                AttachResult::Duplicate(original)
            },
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;
        Ok(result)
    }

    async fn begin_attempt(&self, id: i64) -> Result<i64, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let count = deliveries::increment_attempts(id, Utc::now(), &mut conn).await?;
        count.ok_or(SettlementError::DeliveryNotFound(id))
    }

    async fn update_outcome(&self, id: i64, update: OutcomeUpdate) -> Result<DeliveryRecord, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let record = deliveries::update_outcome(id, update, Utc::now(), &mut conn).await?;
        record.ok_or(SettlementError::DeliveryNotFound(id))
    }

    async fn fetch_delivery(&self, id: i64) -> Result<Option<DeliveryRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let record = deliveries::fetch_delivery(id, &mut conn).await?;
        Ok(record)
    }

    async fn fetch_delivery_by_event(
        &self,
        provider: Provider,
        provider_event_id: &str,
    ) -> Result<Option<DeliveryRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let record = deliveries::fetch_delivery_by_event(provider, provider_event_id, &mut conn).await?;
        Ok(record)
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let claimed = deliveries::claim_due_deliveries(now, lease_until, stale_before, limit, &mut conn).await?;
        if !claimed.is_empty() {
            debug!("🗃️ Claimed {} due deliveries until {lease_until}", claimed.len());
        }
        Ok(claimed)
    }

    async fn search_deliveries(&self, filter: DeliveryQueryFilter) -> Result<Vec<DeliveryRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let records = deliveries::search_deliveries(filter, &mut conn).await?;
        Ok(records)
    }
}

impl IdempotencyLedger for SqliteDatabase {
    async fn claim_idempotency_key(
        &self,
        record: NewIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyClaim, SettlementError> {
        let key = record.key.clone();
        let mut tx = self.pool.begin().await?;
        if idempotency::delete_if_expired(&key, now, &mut tx).await? > 0 {
            debug!("🗃️ Idempotency key {key} had expired or was abandoned, and is being reused");
        }
        let claim = match idempotency::insert_claim(record, &mut tx).await? {
            Some(_) => IdempotencyClaim::Claimed,
            None => {
                let existing = idempotency::fetch_record(&key, &mut tx)
                    .await?
                    .ok_or_else(|| SettlementError::DatabaseError(format!("Idempotency key {key} vanished")))?;
                IdempotencyClaim::Existing(existing)
            },
        };
        tx.commit().await?;
        Ok(claim)
    }

    async fn store_idempotent_response(&self, key: &str, response: &str) -> Result<(), SettlementError> {
        let mut conn = self.pool.acquire().await?;
        if idempotency::store_response(key, response, &mut conn).await? == 0 {
            warn!("🗃️ Tried to store a response for idempotency key {key}, but the key is not open for one");
        }
        Ok(())
    }

    async fn release_idempotency_key(&self, key: &str) -> Result<(), SettlementError> {
        let mut conn = self.pool.acquire().await?;
        idempotency::release_claim(key, &mut conn).await?;
        Ok(())
    }

    async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let purged = idempotency::purge_expired(now, &mut conn).await?;
        Ok(purged)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the `SGW_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date with the embedded migrations.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
