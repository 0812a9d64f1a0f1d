//! The webhook ingestion pipeline.
//!
//! A delivery moves through the following steps. Each step records its result in the delivery ledger before the next
//! one starts, so that the ledger always reflects how far a delivery got.
//!
//! 1. The delivery is recorded as `RECEIVED`, verified or not.
//! 2. The signature is checked against the raw bytes. Failures end here as `FAILED` and are never retried.
//! 3. The envelope is read and the event type classified. Irrelevant and unrecognized events are acknowledged and end
//!    as `DELIVERED` without touching the settlement engine.
//! 4. The event identity is attached to the row. If another row already owns the event, this delivery is a duplicate
//!    and short-circuits to the owner's recorded outcome.
//! 5. The settlement transition runs under a deadline. Transient failures are queued for retry through the ledger.
//!
//! Retries and stale-row recovery re-enter at step 3 using the payload stored on the row.
use std::{
    fmt::Debug,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{DeliveryRecord, DeliveryStatus, ErrorKind, NewDelivery, PaymentStatus, Provider},
    events::{DeliveryFailedEvent, EventProducers},
    providers::{ProviderAdapter, ProviderRegistry, Relevance, SettlementEvent},
    sge_api::{
        errors::WebhookError,
        retry::{RetryDecision, RetryPolicy},
        settlement_api::SettlementApi,
    },
    traits::{
        AttachResult,
        DeliveryLedger,
        OutcomeUpdate,
        SettlementChange,
        SettlementDatabase,
        SettlementError,
        SettlementRequest,
        SettlementResult,
    },
};

pub const DEFAULT_SETTLEMENT_DEADLINE: Duration = Duration::from_millis(4000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The payment moved to a terminal state.
    Settled,
    /// The payment had already settled; the event changed nothing.
    AlreadyTerminal,
    /// The event reported a pending payment.
    Pending,
    /// A known event type that does not concern settlement.
    Ignored,
    /// An event type this gateway does not know.
    Unrecognized,
    /// A redelivery of an event whose first delivery is still being processed.
    InFlight,
}

/// The acknowledgement returned to the provider. It is stored on the delivery row, and redeliveries of the same event
/// receive it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub received: bool,
    pub delivery_id: i64,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

impl DeliveryResult {
    pub fn acknowledged(delivery_id: i64, disposition: Disposition) -> Self {
        Self { received: true, delivery_id, disposition, payment_reference: None, payment_status: None }
    }

    pub fn from_settlement(delivery_id: i64, result: &SettlementResult) -> Self {
        let disposition = match result.change {
            SettlementChange::Settled { .. } => Disposition::Settled,
            SettlementChange::AlreadyTerminal { .. } => Disposition::AlreadyTerminal,
            SettlementChange::StillPending => Disposition::Pending,
        };
        Self {
            received: true,
            delivery_id,
            disposition,
            payment_reference: Some(result.payment.id.clone()),
            payment_status: Some(result.payment.status),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of plain fields cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"received":true}"#.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// This delivery was processed to completion.
    Completed { delivery_id: i64, result: DeliveryResult },
    /// A redelivery of an event that was already delivered. `result` is the original acknowledgement.
    Replayed { delivery_id: i64, original_id: i64, result: String },
    /// A redelivery of an event that another delivery is still processing.
    InFlight { delivery_id: i64, original_id: i64 },
}

impl DeliveryOutcome {
    pub fn delivery_id(&self) -> i64 {
        match self {
            DeliveryOutcome::Completed { delivery_id, .. } => *delivery_id,
            DeliveryOutcome::Replayed { delivery_id, .. } => *delivery_id,
            DeliveryOutcome::InFlight { delivery_id, .. } => *delivery_id,
        }
    }

    /// The JSON body to acknowledge the delivery with.
    pub fn body(&self) -> String {
        match self {
            DeliveryOutcome::Completed { result, .. } => result.to_json(),
            DeliveryOutcome::Replayed { result, .. } => result.clone(),
            DeliveryOutcome::InFlight { original_id, .. } => {
                DeliveryResult::acknowledged(*original_id, Disposition::InFlight).to_json()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// `None` if the delivery could not even be recorded.
    pub delivery_id: Option<i64>,
    pub error: WebhookError,
    /// Set when a retry has been queued in the ledger.
    pub retry_at: Option<DateTime<Utc>>,
}

impl DeliveryFailure {
    fn new(delivery_id: Option<i64>, error: WebhookError) -> Self {
        Self { delivery_id, error, retry_at: None }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub claimed: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

/// Per-attempt context carried through the pipeline for logging.
struct Attempt {
    delivery_id: i64,
    provider: Provider,
    provider_event_id: Option<String>,
    started: Instant,
}

impl Attempt {
    fn new(delivery_id: i64, provider: Provider) -> Self {
        Self { delivery_id, provider, provider_event_id: None, started: Instant::now() }
    }

    fn event_id(&self) -> &str {
        self.provider_event_id.as_deref().unwrap_or("<none>")
    }
}

pub struct WebhookApi<B> {
    db: B,
    registry: ProviderRegistry,
    settlement: SettlementApi<B>,
    policy: RetryPolicy,
    deadline: Duration,
    producers: EventProducers,
}

impl<B> Debug for WebhookApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi ({:?})", self.registry.providers())
    }
}

impl<B: Clone> WebhookApi<B> {
    pub fn new(db: B, registry: ProviderRegistry, producers: EventProducers) -> Self {
        let settlement = SettlementApi::new(db.clone(), producers.clone());
        Self {
            db,
            registry,
            settlement,
            policy: RetryPolicy::default(),
            deadline: DEFAULT_SETTLEMENT_DEADLINE,
            producers,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<B> WebhookApi<B>
where B: SettlementDatabase + DeliveryLedger
{
    /// Maps a URL path segment onto a registered provider. Returns the provider and the name of its signature header.
    pub fn resolve_provider(&self, name: &str) -> Result<(Provider, &'static str), WebhookError> {
        let provider = name.parse::<Provider>().map_err(|_| WebhookError::UnknownProvider(name.to_string()))?;
        let registered = self.registry.get(provider).ok_or_else(|| WebhookError::UnknownProvider(name.to_string()))?;
        Ok((provider, registered.adapter().signature_header()))
    }

    /// Handles one inbound webhook call from start to finish.
    pub async fn process_delivery(
        &self,
        provider: Provider,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<DeliveryOutcome, DeliveryFailure> {
        let registered = self
            .registry
            .get(provider)
            .ok_or_else(|| DeliveryFailure::new(None, WebhookError::UnknownProvider(provider.to_string())))?;
        let record = self
            .db
            .record_received(NewDelivery::new(provider, raw_body))
            .await
            .map_err(|e| DeliveryFailure::new(None, e.into()))?;
        let mut attempt = Attempt::new(record.id, provider);
        debug!("🔄️ Delivery #{} received from {provider} ({} bytes)", record.id, raw_body.len());

        if let Err(e) = registered.verify(raw_body, signature) {
            warn!(
                "🔐️ Delivery #{} from {provider} failed signature verification: {e}. ({} ms)",
                record.id,
                attempt.started.elapsed().as_millis()
            );
            let error = WebhookError::from(e);
            let update = OutcomeUpdate::Failed { kind: error.kind(), message: error.to_string() };
            if let Err(e) = self.db.update_outcome(record.id, update).await {
                error!("🔄️ Could not record the verification failure of delivery #{}: {e}", record.id);
            }
            return Err(DeliveryFailure::new(Some(record.id), error));
        }
        let record = match self.db.mark_verified(record.id).await {
            Ok(record) => record,
            Err(e) => return Err(self.fail_attempt(&attempt, e.into(), 0).await),
        };
        self.process_verified(&record, registered.adapter(), &mut attempt).await
    }

    /// Re-enters the pipeline for a row taken from the ledger, using its stored payload. The signature was checked
    /// when the row was first received.
    pub async fn redeliver(&self, record: DeliveryRecord) -> Result<DeliveryOutcome, DeliveryFailure> {
        let mut attempt = Attempt::new(record.id, record.provider);
        attempt.provider_event_id = record.provider_event_id.clone();
        info!(
            "🔄️ Redelivering #{} ({} event {}, {} attempts so far)",
            record.id,
            record.provider,
            attempt.event_id(),
            record.attempt_count
        );
        let Some(adapter) = self.registry.adapter(record.provider) else {
            let error = SettlementError::ProviderNotConfigured(record.provider);
            return Err(self.fail_attempt(&attempt, error.into(), record.attempt_count).await);
        };
        self.process_verified(&record, adapter, &mut attempt).await
    }

    /// Operator-initiated replay of a delivery that has terminally failed, e.g. after the missing payment has been
    /// registered.
    pub async fn replay_delivery(&self, id: i64) -> Result<DeliveryOutcome, DeliveryFailure> {
        let record = self
            .db
            .fetch_delivery(id)
            .await
            .map_err(|e| DeliveryFailure::new(Some(id), e.into()))?
            .ok_or_else(|| DeliveryFailure::new(Some(id), SettlementError::DeliveryNotFound(id).into()))?;
        let rejection = if !record.is_terminally_failed() {
            Some(format!("Only terminally failed deliveries can be replayed, and this one is {}", record.status))
        } else if record.error_kind == Some(ErrorKind::Verification) {
            Some("It never passed signature verification".to_string())
        } else {
            record.duplicate_of.map(|original| format!("It is a redelivery. Replay delivery #{original} instead"))
        };
        if let Some(reason) = rejection {
            return Err(DeliveryFailure::new(Some(id), WebhookError::ReplayRejected(id, reason)));
        }
        info!("🔄️ Manual replay of delivery #{id} requested");
        self.redeliver(record).await
    }

    /// Claims due and stale rows from the ledger and redelivers them.
    pub async fn process_due_retries(&self, now: DateTime<Utc>) -> Result<RetrySummary, SettlementError> {
        let lease_until = now + self.policy.lease;
        let stale_before = now - self.policy.stale_after;
        let due = self.db.claim_due_deliveries(now, lease_until, stale_before, self.policy.batch_size).await?;
        let mut summary = RetrySummary { claimed: due.len(), ..Default::default() };
        for record in due {
            match self.redeliver(record).await {
                Ok(_) => summary.delivered += 1,
                Err(f) if f.retry_at.is_some() => summary.rescheduled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    async fn process_verified(
        &self,
        record: &DeliveryRecord,
        adapter: &dyn ProviderAdapter,
        attempt: &mut Attempt,
    ) -> Result<DeliveryOutcome, DeliveryFailure> {
        let id = record.id;
        let envelope = match adapter.envelope(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => return Err(self.fail_attempt(attempt, e.into(), record.attempt_count).await),
        };
        let classification = adapter.classify(&envelope.event_type);
        if !classification.is_relevant() {
            let disposition = match classification.relevance {
                Relevance::Unrecognized => {
                    info!(
                        "🔄️ Delivery #{id}: {} event type {} is not recognized",
                        attempt.provider, envelope.event_type
                    );
                    Disposition::Unrecognized
                },
                _ => {
                    debug!(
                        "🔄️ Delivery #{id}: {} event {} is not a settlement event",
                        attempt.provider, envelope.event_type
                    );
                    Disposition::Ignored
                },
            };
            attempt.provider_event_id = envelope.provider_event_id.clone();
            if let Some(outcome) =
                self.attach(record, attempt, envelope.provider_event_id.as_deref(), &envelope.event_type, None).await?
            {
                return Ok(outcome);
            }
            let result = DeliveryResult::acknowledged(id, disposition);
            return self.complete(attempt, result).await;
        }

        let event = match adapter.extract_event(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                // keep the event type for the audit trail, even though the body is unusable
                if let Err(e) = self.db.attach_event(id, None, &envelope.event_type, None).await {
                    warn!("🔄️ Could not record the event type of delivery #{id}: {e}");
                }
                return Err(self.fail_attempt(attempt, e.into(), record.attempt_count).await);
            },
        };
        attempt.provider_event_id = Some(event.provider_event_id.clone());
        if let Some(outcome) = self
            .attach(
                record,
                attempt,
                Some(&event.provider_event_id),
                &event.event_type,
                Some(&event.payment_reference),
            )
            .await?
        {
            return Ok(outcome);
        }
        self.settle(attempt, &event).await
    }

    /// Attaches the event identity to the row, unless it already owns it. Returns `Some` if the delivery turned out to
    /// be a duplicate and has been dealt with.
    async fn attach(
        &self,
        record: &DeliveryRecord,
        attempt: &Attempt,
        provider_event_id: Option<&str>,
        event_type: &str,
        payment_reference: Option<&str>,
    ) -> Result<Option<DeliveryOutcome>, DeliveryFailure> {
        if record.provider_event_id.is_some() && record.provider_event_id.as_deref() == provider_event_id {
            return Ok(None);
        }
        match self.db.attach_event(record.id, provider_event_id, event_type, payment_reference).await {
            Ok(AttachResult::Attached(_)) => Ok(None),
            Ok(AttachResult::Duplicate(original)) => self.handle_duplicate(attempt, original).await.map(Some),
            Err(e) => Err(self.fail_attempt(attempt, e.into(), record.attempt_count).await),
        }
    }

    async fn handle_duplicate(
        &self,
        attempt: &Attempt,
        original: DeliveryRecord,
    ) -> Result<DeliveryOutcome, DeliveryFailure> {
        let id = attempt.delivery_id;
        let original_id = original.id;
        match original.status {
            DeliveryStatus::Delivered => {
                let result = original.result.unwrap_or_else(|| {
                    DeliveryResult::acknowledged(original_id, Disposition::AlreadyTerminal).to_json()
                });
                info!(
                    "🔄️ Delivery #{id} is a redelivery of {} event {} (#{original_id}). Replaying the stored \
                     result.",
                    attempt.provider,
                    attempt.event_id()
                );
                self.record_outcome(id, OutcomeUpdate::Delivered { result: result.clone() }).await;
                Ok(DeliveryOutcome::Replayed { delivery_id: id, original_id, result })
            },
            DeliveryStatus::Failed if original.next_attempt_at.is_none() => {
                let kind = original.error_kind.unwrap_or(ErrorKind::Permanent);
                let message = original.error_message.unwrap_or_default();
                info!(
                    "🔄️ Delivery #{id} is a redelivery of {} event {} (#{original_id}), which failed. Replaying the \
                     failure.",
                    attempt.provider,
                    attempt.event_id()
                );
                let message_for_row = format!("Redelivery of #{original_id}. {message}");
                let update = OutcomeUpdate::Failed { kind, message: message_for_row };
                self.record_outcome(id, update).await;
                let error = WebhookError::ReplayedFailure { original: original_id, kind, message };
                Err(DeliveryFailure::new(Some(id), error))
            },
            _ => {
                debug!("🔄️ Delivery #{id} is a redelivery of #{original_id}, which is still in progress");
                let result = DeliveryResult::acknowledged(original_id, Disposition::InFlight).to_json();
                self.record_outcome(id, OutcomeUpdate::Delivered { result }).await;
                Ok(DeliveryOutcome::InFlight { delivery_id: id, original_id })
            },
        }
    }

    /// Runs the settlement transition under the deadline, then notifies and records the outcome.
    async fn settle(&self, attempt: &Attempt, event: &SettlementEvent) -> Result<DeliveryOutcome, DeliveryFailure> {
        let id = attempt.delivery_id;
        let attempts = match self.db.begin_attempt(id).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail_attempt(attempt, e.into(), 0).await),
        };
        let request = SettlementRequest::from(event);
        let result = match tokio::time::timeout(self.deadline, self.settlement.transition(&request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(self.fail_attempt(attempt, e.into(), attempts).await),
            Err(_) => {
                let error = WebhookError::DeadlineExceeded(self.deadline.as_millis());
                return Err(self.fail_attempt(attempt, error, attempts).await);
            },
        };
        // the transaction has committed; notification is fire-and-forget and outside the deadline
        self.settlement.notify(&result).await;
        let result = DeliveryResult::from_settlement(id, &result);
        self.complete(attempt, result).await
    }

    async fn complete(&self, attempt: &Attempt, result: DeliveryResult) -> Result<DeliveryOutcome, DeliveryFailure> {
        let id = attempt.delivery_id;
        let update = OutcomeUpdate::Delivered { result: result.to_json() };
        if let Err(e) = self.db.update_outcome(id, update).await {
            // The work is done. If the row stays VERIFIED, stale recovery re-runs it as a no-op.
            error!("🔄️ Delivery #{id} was processed, but its outcome could not be recorded: {e}");
        }
        debug!(
            "🔄️ Delivery #{id} ({} event {}) delivered: {:?} in {} ms",
            attempt.provider,
            attempt.event_id(),
            result.disposition,
            attempt.started.elapsed().as_millis()
        );
        Ok(DeliveryOutcome::Completed { delivery_id: id, result })
    }

    /// Records a failed attempt and queues a retry if the policy allows one.
    async fn fail_attempt(&self, attempt: &Attempt, error: WebhookError, attempts: i64) -> DeliveryFailure {
        let id = attempt.delivery_id;
        let kind = error.kind();
        let message = error.to_string();
        let elapsed = attempt.started.elapsed().as_millis();
        let decision = self.policy.decide(kind, attempts, Utc::now());
        let (update, retry_at) = match decision {
            RetryDecision::RetryAt(at) => {
                info!(
                    "🔄️ Delivery #{id} ({} event {}) failed on attempt {attempts}: {message}. Retrying at {at}. \
                     ({elapsed} ms)",
                    attempt.provider,
                    attempt.event_id()
                );
                (OutcomeUpdate::RetryScheduled { kind, message: message.clone(), next_attempt_at: at }, Some(at))
            },
            RetryDecision::Exhausted => {
                error!(
                    "🔄️ Delivery #{id} ({} event {}) failed on its last attempt ({attempts}): {message}. Manual \
                     reconciliation is required. ({elapsed} ms)",
                    attempt.provider,
                    attempt.event_id()
                );
                (OutcomeUpdate::Failed { kind, message: message.clone() }, None)
            },
            RetryDecision::DoNotRetry => {
                warn!(
                    "🔄️ Delivery #{id} ({} event {}) failed permanently [{kind}]: {message}. ({elapsed} ms)",
                    attempt.provider,
                    attempt.event_id()
                );
                (OutcomeUpdate::Failed { kind, message: message.clone() }, None)
            },
        };
        self.record_outcome(id, update).await;
        if retry_at.is_none() {
            let event = DeliveryFailedEvent {
                delivery_id: id,
                provider: attempt.provider,
                provider_event_id: attempt.provider_event_id.clone(),
                error_kind: kind,
                message,
            };
            self.producers.publish_delivery_failed(event).await;
        }
        DeliveryFailure { delivery_id: Some(id), error, retry_at }
    }

    async fn record_outcome(&self, id: i64, update: OutcomeUpdate) {
        if let Err(e) = self.db.update_outcome(id, update).await {
            error!("🔄️ Could not record the outcome of delivery #{id}: {e}");
        }
    }
}
