//! # Provider adapters
//!
//! Every payment network speaks its own webhook dialect: different signature headers, different envelopes and
//! different names for the same settlement outcome. An adapter hides those quirks behind [`ProviderAdapter`], so that
//! the webhook pipeline only ever sees a canonical [`SettlementEvent`].
//!
//! Adapters are pure. They never touch the database and never perform I/O, which keeps them trivially testable
//! against captured payloads.
//!
//! The [`ProviderRegistry`] maps each [`Provider`] onto its concrete adapter along with the webhook signing secret
//! configured for it.
mod errors;
mod registry;
mod settlement_event;

pub mod razorpay;
pub mod square;
pub mod stripe;

pub use errors::AdapterError;
pub use razorpay::RazorpayAdapter;
pub use registry::{ProviderRegistry, RegisteredProvider};
pub use settlement_event::{EventEnvelope, SettlementEvent};
pub use square::SquareAdapter;
pub use stripe::StripeAdapter;

use crate::db_types::{Provider, SettlementOutcome};

/// How much an event type matters to settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// The event can move a payment and must reach the settlement engine.
    Relevant,
    /// A known event type that has nothing to do with settlement (customers, refunds, invoices, ...).
    Irrelevant,
    /// An event type the adapter has never heard of. Acknowledged so that the provider stops resending it.
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventClassification {
    /// The outcome implied by the event type alone. `None` for irrelevant events, and for relevant events whose
    /// outcome depends on a status field inside the payload.
    pub outcome: Option<SettlementOutcome>,
    pub relevance: Relevance,
}

impl EventClassification {
    pub fn settles(outcome: SettlementOutcome) -> Self {
        Self { outcome: Some(outcome), relevance: Relevance::Relevant }
    }

    pub fn status_dependent() -> Self {
        Self { outcome: None, relevance: Relevance::Relevant }
    }

    pub fn irrelevant() -> Self {
        Self { outcome: None, relevance: Relevance::Irrelevant }
    }

    pub fn unrecognized() -> Self {
        Self { outcome: None, relevance: Relevance::Unrecognized }
    }

    pub fn is_relevant(&self) -> bool {
        self.relevance == Relevance::Relevant
    }
}

/// The contract every payment network integration implements.
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// The name of the HTTP header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;

    /// Checks `signature_header` against the raw, unparsed body. Must run before any JSON parsing.
    fn verify(&self, raw_body: &[u8], signature_header: &str, secret: &str) -> bool;

    /// Reads just enough of the body to identify the event for deduplication and classification.
    fn envelope(&self, raw_body: &[u8]) -> Result<EventEnvelope, AdapterError>;

    fn classify(&self, event_type: &str) -> EventClassification;

    /// Normalizes a relevant event into its canonical form.
    fn extract_event(&self, raw_body: &[u8]) -> Result<SettlementEvent, AdapterError>;

    /// Maps the provider's payment status vocabulary onto settlement outcomes. Used both for status-dependent webhook
    /// events and for explicit status look-ups against the provider's API.
    fn outcome_for_status(&self, status: &str) -> Option<SettlementOutcome>;
}
