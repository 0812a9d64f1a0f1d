use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use settlement_engine::{
    events::{DeliveryFailedEvent, EventHandlers, EventHooks, EventProducers, PaymentSettledEvent},
    PaymentsApi,
    SqliteDatabase,
    VerificationApi,
    WebhookApi,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::HttpStatusProvider,
    middleware::{AdminToken, RequestContextFactory},
    routes::{
        health,
        DeliveriesRoute,
        PaymentStatusRoute,
        RegisterPaymentRoute,
        ReplayDeliveryRoute,
        VerifyPaymentRoute,
        WebhookRoute,
    },
    workers::{start_idempotency_purge_worker, start_retry_worker, IDEMPOTENCY_PURGE_INTERVAL},
};

const EVENT_BUFFER_SIZE: usize = 128;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    if config.auto_migrate {
        db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Could not run migrations. {e}")))?;
        info!("🗃️ Database migrations are up to date");
    }
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, notifier_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let webhooks = webhook_api(&config, db.clone(), producers.clone());
    let _retries = start_retry_worker(webhooks);
    let _purge = start_idempotency_purge_worker(db.clone(), IDEMPOTENCY_PURGE_INTERVAL);

    let srv = create_server_instance(config, db, producers)?;
    srv.await.map_err(|e| ServerError::InitializeError(e.to_string()))
}

fn webhook_api(config: &ServerConfig, db: SqliteDatabase, producers: EventProducers) -> WebhookApi<SqliteDatabase> {
    WebhookApi::new(db, config.providers.registry(), producers)
        .with_retry_policy(config.retry_policy)
        .with_deadline(config.settlement_deadline)
}

/// The hand-off to the outcome notifier. Email and SMS dispatch live outside the gateway; these hooks are where they
/// are attached, and until then every notification is logged.
pub fn notifier_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_settled(|ev: PaymentSettledEvent| {
            Box::pin(async move {
                info!(
                    "📬️ Order {} ({}) settled as {:?}: {} {}",
                    ev.order_id, ev.payment_reference, ev.outcome, ev.amount, ev.currency
                );
            })
        })
        .on_delivery_failed(|ev: DeliveryFailedEvent| {
            Box::pin(async move {
                error!(
                    "📬️ Delivery #{} from {} (event {}) needs manual reconciliation. [{}] {}",
                    ev.delivery_id,
                    ev.provider,
                    ev.provider_event_id.as_deref().unwrap_or("<none>"),
                    ev.error_kind,
                    ev.message
                );
            })
        });
    hooks
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let status_provider = HttpStatusProvider::new(config.providers.clone())?;
    let registered = config.providers.registry().providers();
    info!("🪛️ Accepting webhooks from {registered:?}");
    let (host, port) = (config.host.clone(), config.port);
    let srv = HttpServer::new(move || {
        let webhook_api = webhook_api(&config, db.clone(), producers.clone());
        let verification_api = VerificationApi::new(db.clone(), status_provider.clone(), producers.clone())
            .with_retention(config.idempotency_retention)
            .with_claim_lease(config.idempotency_claim_lease);
        let payments_api = PaymentsApi::new(db.clone());
        let api_scope = web::scope("/api")
            .service(VerifyPaymentRoute::<SqliteDatabase, HttpStatusProvider>::new())
            .service(PaymentStatusRoute::<SqliteDatabase>::new())
            .service(RegisterPaymentRoute::<SqliteDatabase>::new())
            .service(DeliveriesRoute::<SqliteDatabase>::new())
            .service(ReplayDeliveryRoute::<SqliteDatabase>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("sgw::access_log"))
            .wrap(RequestContextFactory)
            .app_data(web::Data::new(webhook_api))
            .app_data(web::Data::new(verification_api))
            .app_data(web::Data::new(payments_api))
            .app_data(web::Data::new(AdminToken(config.admin_token.clone())))
            .service(health)
            .service(WebhookRoute::<SqliteDatabase>::new())
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
