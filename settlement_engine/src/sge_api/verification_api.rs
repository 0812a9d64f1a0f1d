//! Client-initiated payment verification.
//!
//! A client that is unsure whether a payment went through asks the gateway to check with the provider. The call is
//! guarded by an idempotency key: the first call with a key does the work and stores its response, and later calls with
//! the same key and the same request get the stored response back, byte for byte, without contacting the provider
//! again.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{NewIdempotencyRecord, Order, PaymentStatus, Provider, SettlementOutcome},
    events::EventProducers,
    helpers::payload_digest,
    sge_api::{errors::VerifyApiError, settlement_api::SettlementApi},
    traits::{IdempotencyClaim, IdempotencyLedger, PaymentStatusProvider, SettlementDatabase, SettlementError},
};

pub const DEFAULT_IDEMPOTENCY_RETENTION: Duration = Duration::hours(24);
/// Comfortably longer than a provider lookup plus the settlement transaction.
pub const DEFAULT_IDEMPOTENCY_CLAIM_LEASE: Duration = Duration::minutes(2);
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub payment_reference: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub payment_reference: String,
    pub provider: Provider,
    /// The status as the provider reported it.
    pub provider_status: String,
    pub outcome: SettlementOutcome,
    /// The platform's status after the outcome was applied.
    pub payment_status: PaymentStatus,
    pub orders: Vec<Order>,
    pub verified_at: DateTime<Utc>,
}

/// The serialized response, and whether it was replayed from the idempotency ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReply {
    pub replayed: bool,
    pub body: String,
}

pub struct VerificationApi<B, P> {
    db: B,
    status_provider: P,
    settlement: SettlementApi<B>,
    retention: Duration,
    claim_lease: Duration,
}

impl<B, P> Debug for VerificationApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerificationApi")
    }
}

impl<B: Clone, P> VerificationApi<B, P> {
    pub fn new(db: B, status_provider: P, producers: EventProducers) -> Self {
        let settlement = SettlementApi::new(db.clone(), producers);
        Self {
            db,
            status_provider,
            settlement,
            retention: DEFAULT_IDEMPOTENCY_RETENTION,
            claim_lease: DEFAULT_IDEMPOTENCY_CLAIM_LEASE,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// If the claimant of a key crashes before storing its response, the key answers `409` until this lease runs out
    /// and is then free to be claimed again.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }
}

/// Keys are opaque to the gateway but must be printable ASCII without spaces, and not absurdly long.
pub fn validate_idempotency_key(key: &str) -> Result<(), VerifyApiError> {
    if key.is_empty() {
        return Err(VerifyApiError::InvalidKey("The key is empty".to_string()));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(VerifyApiError::InvalidKey(format!("The key is longer than {MAX_IDEMPOTENCY_KEY_LENGTH} characters")));
    }
    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(VerifyApiError::InvalidKey("The key must be printable ASCII without whitespace".to_string()));
    }
    Ok(())
}

/// Two requests are the same request if they hit the same path with the same parameters.
pub fn request_fingerprint(path: &str, params: &str) -> String {
    payload_digest(format!("{path}\n{params}").as_bytes())
}

impl<B, P> VerificationApi<B, P>
where
    B: SettlementDatabase + IdempotencyLedger,
    P: PaymentStatusProvider,
{
    pub async fn verify(
        &self,
        key: &str,
        path: &str,
        request: &VerifyPaymentRequest,
    ) -> Result<VerifyReply, VerifyApiError> {
        validate_idempotency_key(key)?;
        let params = serde_json::to_string(request)?;
        let fingerprint = request_fingerprint(path, &params);
        let now = Utc::now();
        let record = NewIdempotencyRecord {
            key: key.to_string(),
            request_path: path.to_string(),
            request_params: params,
            request_fingerprint: fingerprint.clone(),
            created_at: now,
            expires_at: now + self.retention,
            claim_expires_at: now + self.claim_lease,
        };
        match self.db.claim_idempotency_key(record, now).await? {
            IdempotencyClaim::Existing(existing) => {
                if existing.request_fingerprint != fingerprint {
                    warn!("🔄️ Idempotency key {key} was reused for a different request");
                    return Err(VerifyApiError::KeyReused);
                }
                match existing.response {
                    Some(body) => {
                        debug!("🔄️ Replaying the stored response for idempotency key {key}");
                        Ok(VerifyReply { replayed: true, body })
                    },
                    None => Err(VerifyApiError::InProgress),
                }
            },
            IdempotencyClaim::Claimed => match self.execute(request).await {
                Ok(response) => {
                    let body = serde_json::to_string(&response)?;
                    if let Err(e) = self.db.store_idempotent_response(key, &body).await {
                        // the key stays claimed without a response until its lease runs out
                        error!("🔄️ Could not store the response for idempotency key {key}: {e}");
                    }
                    Ok(VerifyReply { replayed: false, body })
                },
                Err(e) => {
                    if let Err(release_err) = self.db.release_idempotency_key(key).await {
                        error!("🔄️ Could not release idempotency key {key}: {release_err}");
                    }
                    Err(e)
                },
            },
        }
    }

    async fn execute(&self, request: &VerifyPaymentRequest) -> Result<VerifyPaymentResponse, VerifyApiError> {
        let reference = request.payment_reference.as_str();
        let payment = self
            .db
            .fetch_payment(reference)
            .await?
            .ok_or_else(|| SettlementError::PaymentNotFound(reference.to_string()))?;
        if payment.provider != request.provider {
            return Err(SettlementError::ProviderMismatch {
                reference: reference.to_string(),
                event: request.provider,
                expected: payment.provider,
            }
            .into());
        }
        let provider_payment_id = payment
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| SettlementError::MissingProviderPaymentId(reference.to_string()))?;
        let status = self.status_provider.fetch_status(payment.provider, provider_payment_id).await?;
        debug!("🔄️ {} reports payment {reference} as {} ({})", payment.provider, status.provider_status, status.outcome);
        let verified_at = Utc::now();
        self.db.mark_payment_verified(reference, verified_at).await?;
        let result = self.settlement.apply_outcome(reference, payment.provider, status.outcome).await?;
        Ok(VerifyPaymentResponse {
            payment_reference: reference.to_string(),
            provider: payment.provider,
            provider_status: status.provider_status,
            outcome: status.outcome,
            payment_status: result.payment.status,
            orders: result.orders,
            verified_at,
        })
    }
}
