//! Error types.
//!
//! - [`ConfigError`]: construction-time contract violations, raised by
//!   [`RequestLogger::new`](crate::middleware::RequestLogger::new) before any
//!   request is served.
//! - [`HttpError`]: the fault type for axum handlers. It wraps
//!   [`anyhow::Error`] so handlers can return `Result<T, HttpError>` and
//!   propagate with `?`. When it is turned into a response it leaves a marker
//!   in the response extensions; the request-logging middleware picks that up
//!   and runs its error path (log the fault, write the JSON envelope).
//!
//! # Example
//!
//! ```rust,ignore
//! async fn create(Json(body): Json<Value>) -> Result<Json<Value>, HttpError> {
//!     let name = body["name"].as_str()
//!         .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "Bad Request"))?;
//!     let saved = store(name).await?;
//!     Ok(Json(saved))
//! }
//! ```

use std::{any::Any, fmt, sync::Arc};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

/// Mutually exclusive or out-of-range options passed to the request logger.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("an external `logger` and `logger` options are mutually exclusive")]
    LoggerConflict,

    #[error("`async_logging` only applies when the request logger builds its own logger")]
    AsyncWithExternalLogger,

    #[error("invalid request logger option: {0}")]
    Invalid(String),

    #[error("failed to start the log writer thread")]
    Writer(#[source] std::io::Error),
}

/// A fault raised by a request handler (or synthesized by the middleware for
/// panics and timeouts).
///
/// Carries an optional HTTP status. Faults without one are reported to the
/// client as `500 Internal Server Error`; their message is only logged.
#[derive(Debug)]
pub struct HttpError {
    status: Option<StatusCode>,
    kind: &'static str,
    inner: anyhow::Error,
    fields: Map<String, Value>,
}

impl HttpError {
    /// A fault with an explicit status; `message` is sent to the client.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            kind: "HttpError",
            inner: anyhow::Error::msg(message.into()),
            fields: Map::new(),
        }
    }

    /// A fault with no status. The client sees a generic 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: None,
            kind: "HttpError",
            inner: anyhow::Error::msg(message.into()),
            fields: Map::new(),
        }
    }

    /// Build a fault from a panic payload caught while running a handler.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_owned());
        Self::internal(message).with_kind("Panic")
    }

    /// Attach a status to an existing fault.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Override the kind name reported as `type` in the log record.
    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    /// Attach an extra property; it is logged verbatim under `err`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// Status and JSON envelope sent to the client.
    ///
    /// Only `code` and `message` are exposed; the cause chain never is.
    pub fn envelope(&self) -> (StatusCode, Value) {
        let (status, message) = match self.status {
            Some(status) => (status, self.message()),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_owned(),
            ),
        };
        (
            status,
            json!({ "error": { "code": status.as_u16(), "message": message } }),
        )
    }

    /// The raw error object handed to the `err` serializer.
    pub fn to_raw(&self) -> Value {
        let mut raw = Map::new();
        raw.insert("message".into(), self.message().into());
        raw.insert("stack".into(), format!("{:?}", self.inner).into());
        raw.insert("type".into(), self.kind.into());
        if let Some(status) = self.status {
            raw.insert("status".into(), status.as_u16().into());
        }
        for (key, value) in &self.fields {
            raw.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(raw)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: {}", status.as_u16(), self.inner),
            None => write!(f, "{}", self.inner),
        }
    }
}

/// Marker left in response extensions so the middleware can tell a fault
/// response from a normal one.
#[derive(Clone, Debug)]
pub(crate) struct Fault(pub Arc<HttpError>);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = self.envelope();
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(Fault(Arc::new(self)));
        response
    }
}

/// Convert any `Into<anyhow::Error>` into a status-less [`HttpError`].
///
/// The concrete source type becomes the logged `type`.
impl<E> From<E> for HttpError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self {
            status: None,
            kind: short_type_name::<E>(),
            inner: e.into(),
            fields: Map::new(),
        }
    }
}

/// `std::io::Error` -> `Error`, `my_crate::BadInput<T>` -> `BadInput`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
