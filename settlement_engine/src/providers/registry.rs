use std::{collections::HashMap, fmt::Debug, sync::Arc};

use log::*;
use sgw_common::Secret;

use super::ProviderAdapter;
use crate::{db_types::Provider, sge_api::errors::VerificationError};

/// An adapter together with the webhook secret configured for its provider.
#[derive(Clone)]
pub struct RegisteredProvider {
    adapter: Arc<dyn ProviderAdapter>,
    secret: Secret<String>,
}

impl Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegisteredProvider({}, secret: {})", self.adapter.provider(), self.secret)
    }
}

impl RegisteredProvider {
    pub fn new<A: ProviderAdapter + 'static>(adapter: A, secret: Secret<String>) -> Self {
        Self { adapter: Arc::new(adapter), secret }
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    /// Checks the raw body against the signature header. A missing header or an empty secret always fails.
    pub fn verify(&self, raw_body: &[u8], signature: Option<&str>) -> Result<(), VerificationError> {
        let provider = self.adapter.provider();
        if !self.secret.is_set() {
            warn!("🔐️ No webhook secret is configured for {provider}. Rejecting the delivery.");
            return Err(VerificationError::MissingSecret(provider));
        }
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(VerificationError::MissingSignature(self.adapter.signature_header()))?;
        if self.adapter.verify(raw_body, signature, self.secret.reveal()) {
            trace!("🔐️ {provider} signature is valid");
            Ok(())
        } else {
            debug!("🔐️ {provider} signature does not match the payload");
            Err(VerificationError::InvalidSignature)
        }
    }
}

/// Maps each configured provider onto its adapter.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: ProviderAdapter + 'static>(&mut self, adapter: A, secret: Secret<String>) -> &mut Self {
        let provider = adapter.provider();
        info!("🔐️ Registered webhook adapter for {provider}");
        self.providers.insert(provider, RegisteredProvider::new(adapter, secret));
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&RegisteredProvider> {
        self.providers.get(&provider)
    }

    pub fn adapter(&self, provider: Provider) -> Option<&dyn ProviderAdapter> {
        self.get(provider).map(|p| p.adapter())
    }

    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL.into_iter().filter(|p| self.providers.contains_key(p)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
