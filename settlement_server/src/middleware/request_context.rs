//! Tags every request with an id and a start time.
//!
//! The id is taken from an incoming `X-Request-Id` header when the caller supplies one, and generated otherwise. It is
//! echoed back on every response, and handlers can extract the [`RequestContext`] to report it in error bodies.
use std::{
    future::{ready, Ready},
    rc::Rc,
    time::Instant,
};

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
    FromRequest,
    HttpMessage,
    HttpRequest,
};
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use log::trace;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
const MAX_REQUEST_ID_LENGTH: usize = 128;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
    started: Instant,
}

impl RequestContext {
    pub fn new(request_id: String) -> Self {
        Self { request_id, received_at: Utc::now(), started: Instant::now() }
    }

    pub fn generate() -> Self {
        Self::new(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }
}

/// Accepts a caller-supplied id only if it is short and printable.
fn incoming_request_id(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LENGTH && id.chars().all(|c| c.is_ascii_graphic()))
        .map(String::from)
}

impl FromRequest for RequestContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let context = req.extensions().get::<RequestContext>().cloned().unwrap_or_else(RequestContext::generate);
        ready(Ok(context))
    }
}

pub struct RequestContextFactory;

impl<S, B> Transform<S, ServiceRequest> for RequestContextFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = RequestContextService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestContextService { service: Rc::new(service) }))
    }
}

pub struct RequestContextService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestContextService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let context = incoming_request_id(&req).map(RequestContext::new).unwrap_or_else(RequestContext::generate);
        let request_id = context.request_id.clone();
        req.extensions_mut().insert(context);
        Box::pin(async move {
            let result = service.call(req).await;
            let header_value = HeaderValue::from_str(&request_id).ok();
            match (result, header_value) {
                (Ok(mut res), Some(value)) => {
                    res.headers_mut().insert(HeaderName::from_static("x-request-id"), value);
                    Ok(res)
                },
                (Err(e), Some(value)) => {
                    // Errors raised by inner middleware still carry the id
                    let mut res = e.error_response();
                    res.headers_mut().insert(HeaderName::from_static("x-request-id"), value);
                    trace!("💻️ Request {request_id} failed in middleware: {e}");
                    Err(actix_web::error::InternalError::from_response(e, res).into())
                },
                (result, None) => result,
            }
        })
    }
}
