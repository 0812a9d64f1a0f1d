//! # Settlement gateway server
//!
//! The HTTP front end of the settlement gateway. It is responsible for:
//! * Receiving webhooks from payment providers and handing the raw bytes to the settlement engine's webhook pipeline.
//! * Client-initiated payment verification, guarded by idempotency keys.
//! * Read-only payment status queries for UI collaborators.
//! * Operator endpoints for payment registration, delivery ledger queries and manual replays.
//! * Running the retry and idempotency purge workers.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `GET /health`
//! * `POST /webhooks/{provider}`
//! * `POST /api/payments/verify`
//! * `GET /api/payments/{reference}`
//! * `POST /api/payments` (operator)
//! * `GET /api/deliveries` (operator)
//! * `POST /api/deliveries/{id}/replay` (operator)
pub mod cli;
pub mod config;
pub mod errors;
pub mod integrations;
pub mod middleware;

pub mod data_objects;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
