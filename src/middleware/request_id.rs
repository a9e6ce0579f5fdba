//! Correlation id resolution.
//!
//! Every inbound request is assigned an id that ties its log records together
//! and is echoed back as `X-Request-ID`. The id is:
//!
//! - Accepted from the caller if they already provide a non-empty `X-Request-ID`
//! - Produced by the configured [`IdGenerator`] otherwise (UUID v4 by default)
//! - Stored as an axum [`Extension`](axum::Extension) so handlers can read it

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation-id factory.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub fn default_id_generator() -> IdGenerator {
    Arc::new(|| Uuid::new_v4().to_string())
}

/// Newtype wrapper carrying the assigned correlation id.
///
/// ```rust,ignore
/// async fn handler(Extension(req_id): Extension<RequestId>) { ... }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

/// The caller's `X-Request-ID` if present and non-empty, else a fresh id.
pub fn resolve(headers: &HeaderMap, generate: &IdGenerator) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| generate())
}
