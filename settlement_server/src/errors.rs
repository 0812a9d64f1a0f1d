use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use settlement_engine::{db_types::ErrorKind, SettlementError, VerifyApiError, WebhookError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Invalid request. {0}")]
    InvalidRequest(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The Idempotency-Key header is required")]
    MissingIdempotencyKey,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("The settlement backend is temporarily unavailable. {0}")]
    Unavailable(String),
    #[error("The payment provider rejected the request. {0}")]
    UpstreamError(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(String),
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingIdempotencyKey => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<SettlementError> for ServerError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::PaymentNotFound(_) | SettlementError::DeliveryNotFound(_) => {
                Self::NoRecordFound(e.to_string())
            },
            SettlementError::PaymentAlreadyExists(_) | SettlementError::OrderAlreadyExists(_) => {
                Self::Conflict(e.to_string())
            },
            SettlementError::InvalidRequest(_)
            | SettlementError::ProviderMismatch { .. }
            | SettlementError::MissingProviderPaymentId(_) => Self::InvalidRequest(e.to_string()),
            SettlementError::TransientInfra(_) => Self::Unavailable(e.to_string()),
            SettlementError::ProviderRejected(_) | SettlementError::UnknownProviderStatus(_) => {
                Self::UpstreamError(e.to_string())
            },
            SettlementError::ProviderNotConfigured(_) => Self::ConfigurationError(e.to_string()),
            SettlementError::DatabaseError(_) => Self::BackendError(e.to_string()),
        }
    }
}

impl From<VerifyApiError> for ServerError {
    fn from(e: VerifyApiError) -> Self {
        match e {
            VerifyApiError::KeyReused => Self::Unprocessable(e.to_string()),
            VerifyApiError::InProgress => Self::Conflict(e.to_string()),
            VerifyApiError::InvalidKey(_) => Self::InvalidRequest(e.to_string()),
            VerifyApiError::Settlement(e) => e.into(),
            VerifyApiError::Serialization(_) => Self::BackendError(e.to_string()),
        }
    }
}

/// The status a provider sees when a webhook delivery is not acknowledged. Anything the provider should resend is a
/// 503; everything else is a 400 so that the provider stops retrying.
pub fn webhook_status_code(error: &WebhookError, recorded: bool) -> StatusCode {
    match error {
        WebhookError::UnknownProvider(_) => StatusCode::NOT_FOUND,
        WebhookError::ReplayRejected(..) => StatusCode::CONFLICT,
        WebhookError::Settlement(SettlementError::DeliveryNotFound(_)) => StatusCode::NOT_FOUND,
        // nothing was written, so the provider has to send it again
        _ if !recorded => StatusCode::SERVICE_UNAVAILABLE,
        e if e.kind() == ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}
