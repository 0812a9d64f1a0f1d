use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sgw_common::{CurrencyCode, MinorUnits};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::helpers::payload_digest;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------       Provider        ---------------------------------------------------------
/// The payment networks the gateway accepts webhooks from. The lower-case name is used in URL paths, configuration and
/// the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    Razorpay,
    Square,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Stripe, Provider::Razorpay, Provider::Square];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Razorpay => "razorpay",
            Provider::Square => "square",
        }
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "razorpay" => Ok(Self::Razorpay),
            "square" => Ok(Self::Square),
            other => Err(ConversionError(format!("Unknown payment provider: {other}"))),
        }
    }
}

//--------------------------------------   SettlementOutcome   ---------------------------------------------------------
/// What a provider event says happened to a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementOutcome {
    Succeeded,
    Failed,
    Pending,
}

impl SettlementOutcome {
    /// The payment status this outcome settles to. `Pending` outcomes never move a payment.
    pub fn terminal_status(&self) -> Option<PaymentStatus> {
        match self {
            SettlementOutcome::Succeeded => Some(PaymentStatus::Succeeded),
            SettlementOutcome::Failed => Some(PaymentStatus::Failed),
            SettlementOutcome::Pending => None,
        }
    }
}

impl Display for SettlementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementOutcome::Succeeded => write!(f, "SUCCEEDED"),
            SettlementOutcome::Failed => write!(f, "FAILED"),
            SettlementOutcome::Pending => write!(f, "PENDING"),
        }
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    /// Created by the platform; no terminal event has been applied yet.
    Pending,
    /// The provider has confirmed the funds. Terminal.
    Succeeded,
    /// The provider has declined or cancelled the payment. Terminal.
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "PENDING"),
            PaymentStatus::Succeeded => write!(f, "SUCCEEDED"),
            PaymentStatus::Failed => write!(f, "FAILED"),
        }
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// Waiting on the payment.
    Pending,
    /// The payment succeeded.
    Paid,
    /// The payment failed.
    PaymentFailed,
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Pending => write!(f, "pending"),
            OrderStatusType::Paid => write!(f, "paid"),
            OrderStatusType::PaymentFailed => write!(f, "payment_failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Verified,
    Failed,
}

impl Display for OrderPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderPaymentStatus::Pending => write!(f, "pending"),
            OrderPaymentStatus::Verified => write!(f, "verified"),
            OrderPaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The order columns derived from a terminal payment status. Payment and order are always written together.
pub fn order_state_for(status: PaymentStatus) -> (OrderStatusType, OrderPaymentStatus) {
    match status {
        PaymentStatus::Pending => (OrderStatusType::Pending, OrderPaymentStatus::Pending),
        PaymentStatus::Succeeded => (OrderStatusType::Paid, OrderPaymentStatus::Verified),
        PaymentStatus::Failed => (OrderStatusType::PaymentFailed, OrderPaymentStatus::Failed),
    }
}

//--------------------------------------        Payment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// The platform's payment reference, e.g. `pay_100`.
    pub id: String,
    pub provider: Provider,
    /// The provider's own identifier, e.g. a Stripe PaymentIntent id.
    pub provider_payment_id: Option<String>,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub status: PaymentStatus,
    /// When the payment settled as `SUCCEEDED`.
    pub verified_at: Option<DateTime<Utc>>,
    /// When a client last asked the provider for the payment's status.
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPayment {
    pub reference: String,
    pub provider: Provider,
    #[serde(default)]
    pub provider_payment_id: Option<String>,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    /// The merchant order this payment pays for.
    pub order_id: String,
}

impl NewPayment {
    pub fn new(reference: &str, provider: Provider, amount: MinorUnits, currency: CurrencyCode, order_id: &str) -> Self {
        Self {
            reference: reference.to_string(),
            provider,
            provider_payment_id: None,
            amount,
            currency,
            order_id: order_id.to_string(),
        }
    }

    pub fn with_provider_payment_id(mut self, id: &str) -> Self {
        self.provider_payment_id = Some(id.to_string());
        self
    }

    pub fn is_equivalent(&self, payment: &Payment) -> bool {
        self.reference == payment.id
            && self.provider == payment.provider
            && self.provider_payment_id == payment.provider_payment_id
            && self.amount == payment.amount
            && self.currency == payment.currency
    }
}

//--------------------------------------         Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub order_id: String,
    pub payment_id: String,
    pub amount: MinorUnits,
    pub currency: CurrencyCode,
    pub status: OrderStatusType,
    pub payment_status: OrderPaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------    DeliveryStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Received,
    Verified,
    Delivered,
    Failed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Received => write!(f, "RECEIVED"),
            DeliveryStatus::Verified => write!(f, "VERIFIED"),
            DeliveryStatus::Delivered => write!(f, "DELIVERED"),
            DeliveryStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RECEIVED" => Ok(Self::Received),
            "VERIFIED" => Ok(Self::Verified),
            "DELIVERED" => Ok(Self::Delivered),
            "FAILED" => Ok(Self::Failed),
            other => Err(ConversionError(format!("Invalid delivery status: {other}"))),
        }
    }
}

//--------------------------------------       ErrorKind       ---------------------------------------------------------
/// The closed set of failure classes. Every error raised while handling a delivery maps onto exactly one of these, and
/// retry eligibility is decided on the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Signature mismatch, missing signature or missing secret.
    Verification,
    /// The body could not be parsed into an event.
    Payload,
    /// The event references a payment the platform does not know.
    PaymentNotFound,
    /// Timeouts, dropped connections, busy databases and upstream 5xx responses.
    Transient,
    /// Business-rule rejections and anything else that will fail the same way again.
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Transient => true,
            ErrorKind::Verification | ErrorKind::Payload | ErrorKind::PaymentNotFound | ErrorKind::Permanent => false,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Verification => write!(f, "verification"),
            ErrorKind::Payload => write!(f, "payload"),
            ErrorKind::PaymentNotFound => write!(f, "payment_not_found"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

//--------------------------------------    DeliveryRecord     ---------------------------------------------------------
/// One row per inbound webhook call. Rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: i64,
    pub provider: Provider,
    pub event_type: String,
    /// Set once the event has been parsed. Redeliveries keep this empty and point at the original via `duplicate_of`.
    pub provider_event_id: Option<String>,
    pub payment_reference: Option<String>,
    pub payload_digest: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub status: DeliveryStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    /// When set on a `FAILED` row, a retry is queued for this time.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// The JSON acknowledgement returned to the provider once the delivery completed.
    pub result: Option<String>,
    pub duplicate_of: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn is_retry_pending(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.next_attempt_at.is_some()
    }

    /// `FAILED` with nothing queued. Only manual reconciliation moves these rows.
    pub fn is_terminally_failed(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.next_attempt_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub provider: Provider,
    pub event_type: String,
    pub payload_digest: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl NewDelivery {
    /// The event type is unknown until the signature has been checked and the body parsed.
    pub fn new(provider: Provider, payload: &[u8]) -> Self {
        Self {
            provider,
            event_type: "unknown".to_string(),
            payload_digest: payload_digest(payload),
            payload: payload.to_vec(),
            received_at: Utc::now(),
        }
    }
}

//--------------------------------------   IdempotencyRecord   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_path: String,
    pub request_params: String,
    pub request_fingerprint: String,
    /// `None` while the first request carrying this key is still executing.
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `None` for records claimed before claim leases existed.
    pub claim_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub request_path: String,
    pub request_params: String,
    pub request_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// How long the claimant has to store a response before others may take the key over.
    pub claim_expires_at: DateTime<Utc>,
}
