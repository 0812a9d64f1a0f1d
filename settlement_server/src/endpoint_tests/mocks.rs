use mockall::mock;
use settlement_engine::{
    db_types::Provider,
    traits::{PaymentStatusProvider, ProviderPaymentStatus},
    SettlementError,
};

mock! {
    pub StatusProvider {}
    impl Clone for StatusProvider {
        fn clone(&self) -> Self;
    }
    impl PaymentStatusProvider for StatusProvider {
        async fn fetch_status(&self, provider: Provider, provider_payment_id: &str) -> Result<ProviderPaymentStatus, SettlementError>;
    }
}
