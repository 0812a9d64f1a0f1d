use thiserror::Error;

use crate::{
    db_types::{ErrorKind, Provider},
    providers::AdapterError,
    traits::SettlementError,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("The {0} header is missing")]
    MissingSignature(&'static str),
    #[error("The signature does not match the payload")]
    InvalidSignature,
    #[error("No webhook secret is configured for {0}")]
    MissingSecret(Provider),
}

/// Everything that can go wrong while handling a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("Unknown payment provider: {0}")]
    UnknownProvider(String),
    #[error("Signature verification failed. {0}")]
    Verification(#[from] VerificationError),
    #[error("Invalid payload. {0}")]
    Payload(#[from] AdapterError),
    #[error("{0}")]
    Settlement(#[from] SettlementError),
    #[error("Settlement did not complete within {0} ms")]
    DeadlineExceeded(u128),
    #[error("This event was already processed by delivery #{original} and failed. {message}")]
    ReplayedFailure { original: i64, kind: ErrorKind, message: String },
    #[error("Delivery #{0} cannot be replayed. {1}")]
    ReplayRejected(i64, String),
}

impl WebhookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookError::UnknownProvider(_) => ErrorKind::Permanent,
            WebhookError::Verification(_) => ErrorKind::Verification,
            WebhookError::Payload(_) => ErrorKind::Payload,
            WebhookError::Settlement(e) => e.kind(),
            WebhookError::DeadlineExceeded(_) => ErrorKind::Transient,
            WebhookError::ReplayedFailure { kind, .. } => *kind,
            WebhookError::ReplayRejected(..) => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyApiError {
    #[error("The idempotency key has already been used for a different request")]
    KeyReused,
    #[error("A request with this idempotency key is still in progress")]
    InProgress,
    #[error("Invalid idempotency key. {0}")]
    InvalidKey(String),
    #[error("{0}")]
    Settlement(#[from] SettlementError),
    #[error("Could not serialize the verification result. {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for VerifyApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
