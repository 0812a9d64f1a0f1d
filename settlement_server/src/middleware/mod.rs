mod admin;
mod request_context;

pub use admin::{AdminToken, AdminTokenMiddlewareFactory, AdminTokenMiddlewareService, ADMIN_TOKEN_HEADER};
pub use request_context::{RequestContext, RequestContextFactory, RequestContextService, REQUEST_ID_HEADER};
