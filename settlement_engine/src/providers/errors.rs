use thiserror::Error;

/// A payload that passed signature verification but cannot be turned into an event. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Payload is not valid JSON. {0}")]
    InvalidJson(String),
    #[error("Payload is missing the required field `{0}`")]
    MissingField(&'static str),
    #[error("Event type {0} does not describe a settlement")]
    NotASettlementEvent(String),
    #[error("Unrecognised payment status: {0}")]
    UnknownStatus(String),
    #[error("Invalid timestamp in payload: {0}")]
    InvalidTimestamp(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidJson(e.to_string())
    }
}
