use crate::{
    db_types::Provider,
    traits::{data_objects::ProviderPaymentStatus, SettlementError},
};

/// Asks a payment network for the live status of one of its payments.
///
/// Implementations map network failures, timeouts and upstream 5xx responses onto
/// [`SettlementError::TransientInfra`], and 4xx responses onto [`SettlementError::ProviderRejected`].
#[allow(async_fn_in_trait)]
pub trait PaymentStatusProvider: Clone {
    async fn fetch_status(
        &self,
        provider: Provider,
        provider_payment_id: &str,
    ) -> Result<ProviderPaymentStatus, SettlementError>;
}
