//! Shared-token guard for the operator endpoints.
//!
//! Operators authenticate by sending the `SGW_ADMIN_TOKEN` value in the `X-Admin-Token` header. When no token is
//! configured, every operator request is refused.
use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use settlement_engine::helpers::constant_time_eq;
use sgw_common::Secret;

use crate::errors::ServerError;

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// The configured operator token, registered as app data.
#[derive(Clone, Debug, Default)]
pub struct AdminToken(pub Secret<String>);

pub struct AdminTokenMiddlewareFactory;

impl<S, B> Transform<S, ServiceRequest> for AdminTokenMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AdminTokenMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminTokenMiddlewareService { service: Rc::new(service) }))
    }
}

pub struct AdminTokenMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminTokenMiddlewareService<S>
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
        let token = req.app_data::<web::Data<AdminToken>>().map(|t| t.0.clone()).unwrap_or_default();
        Box::pin(async move {
            if !token.is_set() {
                warn!("🔐️ Operator request to {} refused. No admin token is configured.", req.path());
                return Err(ServerError::InsufficientPermissions("Operator endpoints are disabled.".into()).into());
            }
            let supplied = req.headers().get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()).ok_or_else(|| {
                warn!("🔐️ Operator request to {} without an admin token. Denying access.", req.path());
                ServerError::AuthenticationError(format!("The {ADMIN_TOKEN_HEADER} header is required."))
            })?;
            if constant_time_eq(supplied.as_bytes(), token.reveal().as_bytes()) {
                trace!("🔐️ Admin token check for {} ✅️", req.path());
                service.call(req).await
            } else {
                warn!("🔐️ Invalid admin token for {}. Denying access.", req.path());
                Err(ServerError::AuthenticationError("Invalid admin token.".into()).into())
            }
        })
    }
}
