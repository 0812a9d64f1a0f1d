use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestContext;

/// The body returned to a payment provider when a webhook delivery is not acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookErrorBody {
    pub error: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time spent on the request, e.g. `"12ms"`.
    pub execution_time: String,
}

impl WebhookErrorBody {
    pub fn new<S: Display>(error: S, context: &RequestContext) -> Self {
        Self {
            error: error.to_string(),
            request_id: context.request_id.clone(),
            timestamp: context.received_at,
            execution_time: format!("{}ms", context.elapsed_ms()),
        }
    }
}
