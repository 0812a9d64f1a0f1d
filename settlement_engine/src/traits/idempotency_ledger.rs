use chrono::{DateTime, Utc};

use crate::{
    db_types::NewIdempotencyRecord,
    traits::{data_objects::IdempotencyClaim, SettlementError},
};

/// A durable key to response cache for client-initiated calls.
///
/// Keys are claimed before the work runs and filled in afterwards, so that a concurrent call with the same key can
/// never run the work a second time.
#[allow(async_fn_in_trait)]
pub trait IdempotencyLedger: Clone {
    /// Claims `record.key`, unless an unexpired record already holds it. An expired record, or a claim whose lease ran
    /// out before a response was stored, is replaced.
    async fn claim_idempotency_key(
        &self,
        record: NewIdempotencyRecord,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyClaim, SettlementError>;

    /// Fills in the response of an open claim. The first stored response wins.
    async fn store_idempotent_response(&self, key: &str, response: &str) -> Result<(), SettlementError>;

    /// Gives up a claim whose work failed, so that the client can try again with the same key. Keys that already
    /// hold a response are never released.
    async fn release_idempotency_key(&self, key: &str) -> Result<(), SettlementError>;

    /// Deletes expired records. Returns the number removed.
    async fn purge_expired_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, SettlementError>;
}
