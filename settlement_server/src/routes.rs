//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate module.
//!
//! Webhook handlers run on actix worker threads. Everything they wait on (the ledger, the settlement transaction, the
//! provider API) is awaited, never blocked on, so a slow settlement never stalls other deliveries on the same worker.
use actix_web::{
    get,
    http::{header::ContentType, StatusCode},
    web,
    HttpRequest,
    HttpResponse,
    Responder,
};
use log::*;
use settlement_engine::{
    db_types::NewPayment,
    traits::{DeliveryLedger, DeliveryQueryFilter, IdempotencyLedger, PaymentStatusProvider, SettlementDatabase},
    PaymentsApi,
    VerificationApi,
    VerifyPaymentRequest,
    WebhookApi,
    WebhookError,
};

use crate::{
    data_objects::WebhookErrorBody,
    errors::{webhook_status_code, ServerError},
    middleware::RequestContext,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const IDEMPOTENCY_REPLAYED_HEADER: &str = "Idempotency-Replayed";

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:path),+ where requires admin) => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>)
                    .wrap($crate::middleware::AdminTokenMiddlewareFactory);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:path),+ ; $extra:ident : $extra_bound:path) => {
        paste::paste! { pub struct [<$name:camel Route>]<A, $extra>(core::marker::PhantomData<fn() -> (A, $extra)>);}
        paste::paste! { impl<A, $extra> [<$name:camel Route>]<A, $extra> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> (A, $extra)>)
            }
        }}
        paste::paste! { impl<A, $extra> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A, $extra>
        where
            A: $($bounds +)+ 'static,
            $extra: $extra_bound + 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A, $extra>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:path),+) => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
fn webhook_error(error: &WebhookError, status: StatusCode, context: &RequestContext) -> HttpResponse {
    HttpResponse::build(status).json(WebhookErrorBody::new(error, context))
}

route!(webhook => Post "/webhooks/{provider}" impl SettlementDatabase, DeliveryLedger);
/// Inbound webhook from a payment provider.
///
/// The body is taken as raw bytes, since signatures are computed over the exact bytes the provider sent. The response
/// is `200` once the delivery is settled, ignored or recognised as a redelivery. Failures return `400` when resending
/// cannot help, and `503` when the provider should try again.
pub async fn webhook<B>(
    req: HttpRequest,
    context: RequestContext,
    path: web::Path<String>,
    body: web::Bytes,
    api: web::Data<WebhookApi<B>>,
) -> HttpResponse
where
    B: SettlementDatabase + DeliveryLedger,
{
    let name = path.into_inner();
    let (provider, signature_header) = match api.resolve_provider(&name) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("💻️ [{}] Webhook for unregistered provider '{name}'", context.request_id);
            return webhook_error(&e, webhook_status_code(&e, false), &context);
        },
    };
    trace!("💻️ [{}] Received {provider} webhook ({} bytes)", context.request_id, body.len());
    let signature = req.headers().get(signature_header).and_then(|v| v.to_str().ok());
    match api.process_delivery(provider, signature, &body).await {
        Ok(outcome) => {
            debug!(
                "💻️ [{}] {provider} delivery #{} acknowledged in {} ms",
                context.request_id,
                outcome.delivery_id(),
                context.elapsed_ms()
            );
            HttpResponse::Ok().insert_header(ContentType::json()).body(outcome.body())
        },
        Err(failure) => {
            let status = webhook_status_code(&failure.error, failure.delivery_id.is_some());
            info!(
                "💻️ [{}] {provider} delivery #{} answered with {status}. {} ({} ms)",
                context.request_id,
                failure.delivery_id.map(|id| id.to_string()).unwrap_or_else(|| "?".into()),
                failure.error,
                context.elapsed_ms()
            );
            webhook_error(&failure.error, status, &context)
        },
    }
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(verify_payment => Post "/payments/verify" impl SettlementDatabase, IdempotencyLedger; P: PaymentStatusProvider);
/// Client-initiated verification. The caller supplies an `Idempotency-Key`; a repeated call with the same key and body
/// gets the first response back byte for byte, marked with `Idempotency-Replayed: true`.
pub async fn verify_payment<B, P>(
    req: HttpRequest,
    api: web::Data<VerificationApi<B, P>>,
    body: web::Json<VerifyPaymentRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + IdempotencyLedger,
    P: PaymentStatusProvider,
{
    let key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or(ServerError::MissingIdempotencyKey)?
        .to_str()
        .map_err(|e| ServerError::InvalidRequest(format!("The Idempotency-Key header is not valid ASCII. {e}")))?;
    let request = body.into_inner();
    debug!("💻️ Verification of {} requested with key {key}", request.payment_reference);
    let reply = api.verify(key, req.path(), &request).await?;
    let mut response = HttpResponse::Ok();
    response.insert_header(ContentType::json());
    if reply.replayed {
        response.insert_header((IDEMPOTENCY_REPLAYED_HEADER, "true"));
    }
    Ok(response.body(reply.body))
}

route!(payment_status => Get "/payments/{reference}" impl SettlementDatabase, DeliveryLedger);
pub async fn payment_status<B>(
    path: web::Path<String>,
    api: web::Data<PaymentsApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + DeliveryLedger,
{
    let reference = path.into_inner();
    trace!("💻️ GET payment status for {reference}");
    let view = api.payment_status(&reference).await?;
    Ok(HttpResponse::Ok().json(view))
}

route!(register_payment => Post "/payments" impl SettlementDatabase, DeliveryLedger where requires admin);
/// Registers a pending payment and its order. `201` for a new registration, `200` if the same payment was already
/// registered.
pub async fn register_payment<B>(
    api: web::Data<PaymentsApi<B>>,
    body: web::Json<NewPayment>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + DeliveryLedger,
{
    let payment = body.into_inner();
    debug!("💻️ Registering payment {} for order {}", payment.reference, payment.order_id);
    let (view, inserted) = api.register_payment(payment).await?;
    let status = if inserted { StatusCode::CREATED } else { StatusCode::OK };
    Ok(HttpResponse::build(status).json(view))
}

//----------------------------------------------   Deliveries  --------------------------------------------------
route!(deliveries => Get "/deliveries" impl SettlementDatabase, DeliveryLedger where requires admin);
pub async fn deliveries<B>(
    api: web::Data<PaymentsApi<B>>,
    query: web::Query<DeliveryQueryFilter>,
) -> Result<HttpResponse, ServerError>
where
    B: SettlementDatabase + DeliveryLedger,
{
    let filter = query.into_inner();
    trace!("💻️ GET deliveries for {filter:?}");
    let records = api.deliveries(filter).await?;
    Ok(HttpResponse::Ok().json(records))
}

route!(replay_delivery => Post "/deliveries/{id}/replay" impl SettlementDatabase, DeliveryLedger where requires admin);
/// Manual reconciliation: re-runs a terminally failed delivery from its stored payload.
pub async fn replay_delivery<B>(
    context: RequestContext,
    path: web::Path<i64>,
    api: web::Data<WebhookApi<B>>,
) -> HttpResponse
where
    B: SettlementDatabase + DeliveryLedger,
{
    let id = path.into_inner();
    info!("💻️ [{}] Operator replay of delivery #{id}", context.request_id);
    match api.replay_delivery(id).await {
        Ok(outcome) => HttpResponse::Ok().insert_header(ContentType::json()).body(outcome.body()),
        Err(failure) => {
            let status = webhook_status_code(&failure.error, true);
            warn!("💻️ [{}] Replay of delivery #{id} failed. {}", context.request_id, failure.error);
            webhook_error(&failure.error, status, &context)
        },
    }
}
