//! # Backend contracts
//!
//! The settlement pipeline never talks to a database or a payment network directly. Everything it needs from the
//! outside world is expressed by the traits in this module, and the concrete backends (the SQLite store, the HTTP
//! status clients in the server crate, mocks in tests) implement them.
//!
//! * [`SettlementDatabase`] owns the payment/order aggregate and the transactional settlement transition.
//! * [`DeliveryLedger`] is the durable record of every inbound webhook delivery, and doubles as the retry queue.
//! * [`IdempotencyLedger`] stores responses to client-initiated verification calls, keyed by idempotency key.
//! * [`PaymentStatusProvider`] asks a payment network for the current status of a payment.
mod data_objects;
mod delivery_ledger;
mod idempotency_ledger;
mod settlement_database;
mod status_provider;

pub use data_objects::{
    AttachResult,
    DeliveryQueryFilter,
    IdempotencyClaim,
    OutcomeUpdate,
    ProviderPaymentStatus,
    SettlementChange,
    SettlementRequest,
    SettlementResult,
};
pub use delivery_ledger::DeliveryLedger;
pub use idempotency_ledger::IdempotencyLedger;
pub use settlement_database::{SettlementDatabase, SettlementError};
pub use status_provider::PaymentStatusProvider;
