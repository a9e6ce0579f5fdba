//! Request/response logging middleware for axum.
//!
//! Attaches a correlation id (`X-Request-ID`), a `Date` header and an
//! `X-Response-Time` header to every response, and writes structured
//! start / completion / failure records through a [`Logger`].

pub mod config;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod serializers;
pub mod server;

pub use config::{Config, LoggerOptions, RequestLoggerOptions};
pub use error::{ConfigError, HttpError};
pub use logger::{Logger, MemorySink, Severity};
pub use middleware::{request_logger_middleware, RequestId, RequestLogger};
pub use server::serve;
