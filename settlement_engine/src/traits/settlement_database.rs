use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{ErrorKind, NewPayment, Order, Payment, Provider},
    traits::data_objects::{SettlementRequest, SettlementResult},
};

/// The payment/order aggregate.
///
/// Payments and their orders are only ever written together, inside one transaction, by
/// [`SettlementDatabase::settle_payment`]. Everything else is either creation or a read.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new pending payment and the order it pays for, in one transaction.
    ///
    /// The call is idempotent: registering an identical payment again returns the stored records and `false`. A
    /// payment with the same reference but different details is rejected with
    /// [`SettlementError::PaymentAlreadyExists`].
    async fn insert_payment(&self, payment: NewPayment) -> Result<(Payment, Order, bool), SettlementError>;

    async fn fetch_payment(&self, reference: &str) -> Result<Option<Payment>, SettlementError>;

    async fn fetch_orders_for_payment(&self, reference: &str) -> Result<Vec<Order>, SettlementError>;

    /// Applies a settlement outcome to a payment and all of its orders.
    ///
    /// * `PENDING -> SUCCEEDED` and `PENDING -> FAILED` update the payment and its orders atomically.
    /// * A payment that is already terminal is left untouched and [`SettlementChange::AlreadyTerminal`] is returned.
    /// * A `PENDING` outcome changes nothing.
    ///
    /// Concurrent calls for the same reference are serialized by the database; exactly one of them performs the
    /// transition.
    ///
    /// [`SettlementChange::AlreadyTerminal`]: crate::traits::SettlementChange::AlreadyTerminal
    async fn settle_payment(&self, request: &SettlementRequest) -> Result<SettlementResult, SettlementError>;

    /// Stamps `last_verified_at` after a client-initiated status check. Does not change the status.
    async fn mark_payment_verified(&self, reference: &str, at: DateTime<Utc>) -> Result<Payment, SettlementError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), SettlementError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(String),
    #[error("Cannot insert payment, since {0} already exists with different details")]
    PaymentAlreadyExists(String),
    #[error("Cannot insert order, since it already exists with id {0}")]
    OrderAlreadyExists(String),
    #[error("Payment {reference} belongs to {expected}, but the event came from {event}")]
    ProviderMismatch { reference: String, event: Provider, expected: Provider },
    #[error("Payment {0} has no provider payment id, so its status cannot be looked up")]
    MissingProviderPaymentId(String),
    #[error("The requested delivery {0} does not exist")]
    DeliveryNotFound(i64),
    #[error("Temporary infrastructure failure: {0}")]
    TransientInfra(String),
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The payment provider rejected the request: {0}")]
    ProviderRejected(String),
    #[error("The payment provider reported an unrecognised status: {0}")]
    UnknownProviderStatus(String),
    #[error("{0} is not configured on this gateway")]
    ProviderNotConfigured(Provider),
    #[error("Invalid request. {0}")]
    InvalidRequest(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::PaymentNotFound(_) => ErrorKind::PaymentNotFound,
            SettlementError::TransientInfra(_) => ErrorKind::Transient,
            SettlementError::PaymentAlreadyExists(_)
            | SettlementError::OrderAlreadyExists(_)
            | SettlementError::ProviderMismatch { .. }
            | SettlementError::MissingProviderPaymentId(_)
            | SettlementError::DeliveryNotFound(_)
            | SettlementError::DatabaseError(_)
            | SettlementError::ProviderRejected(_)
            | SettlementError::UnknownProviderStatus(_)
            | SettlementError::ProviderNotConfigured(_)
            | SettlementError::InvalidRequest(_) => ErrorKind::Permanent,
        }
    }
}

/// SQLite primary result codes (and their extended forms) that clear up on their own.
/// 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED, 261 = SQLITE_BUSY_RECOVERY, 262 = SQLITE_LOCKED_SHAREDCACHE,
/// 517 = SQLITE_BUSY_SNAPSHOT, 773 = SQLITE_BUSY_TIMEOUT
const TRANSIENT_SQLITE_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                SettlementError::TransientInfra(e.to_string())
            },
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if TRANSIENT_SQLITE_CODES.contains(&code.as_ref()) => {
                    SettlementError::TransientInfra(e.to_string())
                },
                _ => SettlementError::DatabaseError(e.to_string()),
            },
            _ => SettlementError::DatabaseError(e.to_string()),
        }
    }
}
