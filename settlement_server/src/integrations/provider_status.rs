//! Live payment status look-ups against Stripe, Razorpay and Square.
//!
//! Each provider exposes a "retrieve payment" endpoint. The status string it returns is mapped onto a settlement
//! outcome with the same vocabulary the webhook adapters use, so a webhook and a look-up can never disagree about what
//! a status means.
use std::sync::Arc;

use log::*;
use reqwest::{header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde_json::Value;
use settlement_engine::{
    db_types::Provider,
    providers::{ProviderAdapter, RazorpayAdapter, SquareAdapter, StripeAdapter},
    traits::ProviderPaymentStatus,
    PaymentStatusProvider,
    SettlementError,
};

use crate::{config::ProvidersConfig, errors::ServerError};

pub const SQUARE_API_VERSION: &str = "2024-06-04";

#[derive(Clone)]
pub struct HttpStatusProvider {
    config: ProvidersConfig,
    client: Arc<Client>,
}

impl HttpStatusProvider {
    pub fn new(config: ProvidersConfig) -> Result<Self, ServerError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServerError::InitializeError(format!("Could not build the provider API client. {e}")))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn status_url(&self, provider: Provider, provider_payment_id: &str) -> String {
        status_url(&self.config, provider, provider_payment_id)
    }

    fn authorized_request(&self, provider: Provider, url: String) -> Result<RequestBuilder, SettlementError> {
        let request = self.client.get(url);
        match provider {
            Provider::Stripe => {
                let key = &self.config.stripe.api_key;
                if !key.is_set() {
                    return Err(SettlementError::ProviderNotConfigured(provider));
                }
                Ok(request.bearer_auth(key.reveal()))
            },
            Provider::Razorpay => {
                let razorpay = &self.config.razorpay;
                if razorpay.key_id.is_empty() || !razorpay.key_secret.is_set() {
                    return Err(SettlementError::ProviderNotConfigured(provider));
                }
                Ok(request.basic_auth(&razorpay.key_id, Some(razorpay.key_secret.reveal())))
            },
            Provider::Square => {
                let token = &self.config.square.access_token;
                if !token.is_set() {
                    return Err(SettlementError::ProviderNotConfigured(provider));
                }
                let version = HeaderValue::from_static(SQUARE_API_VERSION);
                Ok(request.bearer_auth(token.reveal()).header("Square-Version", version))
            },
        }
    }
}

impl PaymentStatusProvider for HttpStatusProvider {
    async fn fetch_status(
        &self,
        provider: Provider,
        provider_payment_id: &str,
    ) -> Result<ProviderPaymentStatus, SettlementError> {
        validate_payment_id(provider_payment_id)?;
        let url = self.status_url(provider, provider_payment_id);
        let request = self.authorized_request(provider, url)?;
        trace!("🔄️ Fetching {provider} status for {provider_payment_id}");
        let response = request.send().await.map_err(|e| {
            warn!("🔄️ {provider} status request for {provider_payment_id} failed. {e}");
            SettlementError::TransientInfra(format!("{provider} could not be reached. {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("🔄️ {provider} answered the status request for {provider_payment_id} with {status}");
            return Err(http_error(provider, status, &message));
        }
        let body = response.json::<Value>().await.map_err(|e| {
            SettlementError::TransientInfra(format!("{provider} returned an unreadable status response. {e}"))
        })?;
        let provider_status = extract_status(provider, &body)
            .ok_or_else(|| SettlementError::UnknownProviderStatus(format!("{provider} response has no status")))?;
        let result = to_payment_status(provider, provider_status)?;
        debug!("🔄️ {provider} reports {provider_payment_id} as {} ({:?})", result.provider_status, result.outcome);
        Ok(result)
    }
}

/// Provider payment ids go into the URL path, so only the characters the providers actually use are allowed.
fn validate_payment_id(id: &str) -> Result<(), SettlementError> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(SettlementError::InvalidRequest(format!("'{id}' is not a valid provider payment id")));
    }
    Ok(())
}

fn status_url(config: &ProvidersConfig, provider: Provider, id: &str) -> String {
    match provider {
        Provider::Stripe => format!("{}/v1/payment_intents/{id}", config.stripe.api_url.trim_end_matches('/')),
        Provider::Razorpay => format!("{}/v1/payments/{id}", config.razorpay.api_url.trim_end_matches('/')),
        Provider::Square => format!("{}/v2/payments/{id}", config.square.api_url.trim_end_matches('/')),
    }
}

fn extract_status(provider: Provider, body: &Value) -> Option<&str> {
    match provider {
        Provider::Stripe | Provider::Razorpay => body["status"].as_str(),
        Provider::Square => body["payment"]["status"].as_str(),
    }
}

fn to_payment_status(provider: Provider, status: &str) -> Result<ProviderPaymentStatus, SettlementError> {
    let outcome = match provider {
        Provider::Stripe => StripeAdapter::default().outcome_for_status(status),
        Provider::Razorpay => RazorpayAdapter.outcome_for_status(status),
        Provider::Square => SquareAdapter::new("").outcome_for_status(status),
    }
    .ok_or_else(|| SettlementError::UnknownProviderStatus(format!("{provider} status '{status}'")))?;
    Ok(ProviderPaymentStatus { provider_status: status.to_string(), outcome })
}

/// Rate limits and upstream outages clear up on their own. Every other 4xx means the request itself is wrong.
fn http_error(provider: Provider, status: StatusCode, message: &str) -> SettlementError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        SettlementError::TransientInfra(format!("{provider} returned {status}"))
    } else {
        SettlementError::ProviderRejected(format!("{provider} returned {status}. {message}"))
    }
}
