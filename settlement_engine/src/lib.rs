//! Settlement Engine
//!
//! The settlement engine turns asynchronous, untrusted payment webhooks from several payment networks into exactly-once
//! state changes on the platform's own payment and order records. It is provider-agnostic and knows nothing about HTTP.
//!
//! The library is divided into the following sections:
//! 1. Data types ([`mod@db_types`]) shared by every layer.
//! 2. Provider adapters ([`mod@providers`]), which verify signatures and normalize each network's payloads into a
//!    canonical [`SettlementEvent`].
//! 3. Backend contracts ([`mod@traits`]) and the SQLite backend that implements them.
//! 4. The public API ([`mod@sge_api`]): the webhook pipeline, the settlement transition, client verification and
//!    payment queries.
//!
//! Terminal settlements are announced through the hooks in [`mod@events`], after the transaction that produced them
//! has committed.
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod providers;
pub mod traits;

pub mod sge_api;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use providers::{ProviderAdapter, ProviderRegistry, SettlementEvent};
pub use sge_api::{
    errors::{VerificationError, VerifyApiError, WebhookError},
    payments_api::{PaymentView, PaymentsApi},
    retry::{RetryDecision, RetryPolicy},
    settlement_api::SettlementApi,
    verification_api::{VerificationApi, VerifyPaymentRequest, VerifyPaymentResponse, VerifyReply},
    webhook_api::{
        DeliveryFailure,
        DeliveryOutcome,
        DeliveryResult,
        Disposition,
        RetrySummary,
        WebhookApi,
        DEFAULT_SETTLEMENT_DEADLINE,
    },
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{
    DeliveryLedger,
    IdempotencyLedger,
    PaymentStatusProvider,
    SettlementDatabase,
    SettlementError,
};
