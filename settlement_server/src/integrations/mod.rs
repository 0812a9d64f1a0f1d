//! Clients for the payment providers' own APIs.
mod provider_status;

pub use provider_status::{HttpStatusProvider, SQUARE_API_VERSION};
