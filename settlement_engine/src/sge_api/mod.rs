//! # Settlement gateway engine API
//!
//! The `sge_api` module exposes the programmatic API of the settlement engine. Each API is constructed from a backend
//! that implements the storage traits it needs, plus whatever collaborators it calls out to. Nothing here knows about
//! HTTP.
//!
//! * [`settlement_api`] applies outcomes to the payment/order aggregate and fires notifications.
//! * [`webhook_api`] is the webhook ingestion pipeline: verification, classification, deduplication, settlement and
//!   retry scheduling.
//! * [`verification_api`] handles client-initiated, idempotency-keyed status checks against the provider.
//! * [`payments_api`] registers payments and answers status and ledger queries.
//!
//! ```rust,ignore
//! use settlement_engine::{events::EventProducers, ProviderRegistry, SqliteDatabase, WebhookApi};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = WebhookApi::new(db, registry, EventProducers::default());
//! let outcome = api.process_delivery(Provider::Stripe, Some(signature), &body).await;
//! ```
pub mod errors;
pub mod payments_api;
pub mod retry;
pub mod settlement_api;
pub mod verification_api;
pub mod webhook_api;
