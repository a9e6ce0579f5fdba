//! Configuration types for req-logger.
//!
//! [`RequestLoggerOptions`] is what callers hand to
//! [`RequestLogger::new`](crate::middleware::RequestLogger::new). It can be
//! built in code or deserialized from the `[request_logger]` section of a TOML
//! file. It is consumed exactly once and turned into an immutable [`Settings`]
//! plus a ready [`Logger`]; conflicting options are rejected up front.
//!
//! # Example
//! ```toml
//! [server]
//! port = 3008
//!
//! [request_logger]
//! disable_date_header = true
//! always_error        = false
//! max_body_capture    = 65536
//! handler_timeout_ms  = 30000
//!
//! [request_logger.logger]
//! level          = "debug"
//! include_bodies = true
//! ```

use std::{fmt, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    logger::{LogSink, Logger, Severity},
    middleware::request_id::{default_id_generator, IdGenerator},
    serializers::Serializers,
};

/// Top-level file layout used by the demo server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub request_logger: RequestLoggerOptions,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.server.port != 0, "server.port must be non-zero");
        self.request_logger.check()?;
        Ok(())
    }
}

/// Listener and process-level logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listening port (default: 3008).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Log filter override (also controlled by `RUST_LOG`).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Output format of the process-wide `tracing` subscriber.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            log_level: None,
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Options for the logger the request logger builds for itself.
#[derive(Clone, Deserialize, Serialize)]
pub struct LoggerOptions {
    /// Name attached to every record.
    #[serde(default)]
    pub name: Option<String>,

    /// Minimum severity emitted (default: info).
    #[serde(default)]
    pub level: Severity,

    /// Set to `false` to silence the logger entirely.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Use the body-inclusive `req` / `res` serializers.
    #[serde(default)]
    pub include_bodies: bool,

    /// Serializer overrides. Code only; wins over `include_bodies`.
    #[serde(skip)]
    pub serializers: Option<Serializers>,

    /// Record destination. Code only; defaults to [`TracingSink`].
    ///
    /// [`TracingSink`]: crate::logger::TracingSink
    #[serde(skip)]
    pub sink: Option<Arc<dyn LogSink>>,
}

impl fmt::Debug for LoggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerOptions")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("enabled", &self.enabled)
            .field("include_bodies", &self.include_bodies)
            .field("serializers", &self.serializers)
            .field("sink", &self.sink.as_ref().map(|_| "<sink>"))
            .finish()
    }
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            name: None,
            level: Severity::default(),
            enabled: defaults::enabled(),
            include_bodies: false,
            serializers: None,
            sink: None,
        }
    }
}

/// Caller-facing request logger options.
///
/// At most one of `external_logger` (a pre-built [`Logger`]) and
/// `logger_options` may be set. `async_logging` is only valid without an
/// external logger.
#[derive(Clone, Deserialize)]
pub struct RequestLoggerOptions {
    /// Shortcut: disable the `X-Request-ID`, `Date` and `X-Response-Time`
    /// headers at once.
    #[serde(default)]
    pub disable_headers: bool,

    #[serde(default)]
    pub disable_id_header: bool,

    #[serde(default)]
    pub disable_date_header: bool,

    #[serde(default)]
    pub disable_response_time_header: bool,

    /// Log every response at or above 400 at error severity.
    #[serde(default)]
    pub always_error: bool,

    #[serde(default)]
    pub log_debug_request_body: bool,

    #[serde(default)]
    pub log_debug_response_body: bool,

    /// Maximum bytes captured per request or response body (default: 64 KiB).
    #[serde(default = "defaults::max_body_capture")]
    pub max_body_capture: usize,

    /// Deadline for the downstream handler chain. Unset means no deadline.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// Take the client IP from the first `X-Forwarded-For` entry.
    #[serde(default)]
    pub trust_proxy: bool,

    /// Write records from a background thread (performance mode).
    #[serde(default)]
    pub async_logging: bool,

    #[serde(default, rename = "logger")]
    pub logger_options: Option<LoggerOptions>,

    /// Pre-built logger. Code only.
    #[serde(skip)]
    pub external_logger: Option<Logger>,

    /// Correlation-id factory. Code only; defaults to UUID v4.
    #[serde(skip)]
    pub id_generator: Option<IdGenerator>,
}

impl fmt::Debug for RequestLoggerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLoggerOptions")
            .field("disable_headers", &self.disable_headers)
            .field("disable_id_header", &self.disable_id_header)
            .field("disable_date_header", &self.disable_date_header)
            .field(
                "disable_response_time_header",
                &self.disable_response_time_header,
            )
            .field("always_error", &self.always_error)
            .field("log_debug_request_body", &self.log_debug_request_body)
            .field("log_debug_response_body", &self.log_debug_response_body)
            .field("max_body_capture", &self.max_body_capture)
            .field("handler_timeout_ms", &self.handler_timeout_ms)
            .field("trust_proxy", &self.trust_proxy)
            .field("async_logging", &self.async_logging)
            .field("logger_options", &self.logger_options)
            .field("external_logger", &self.external_logger)
            .field("id_generator", &self.id_generator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for RequestLoggerOptions {
    fn default() -> Self {
        Self {
            disable_headers: false,
            disable_id_header: false,
            disable_date_header: false,
            disable_response_time_header: false,
            always_error: false,
            log_debug_request_body: false,
            log_debug_response_body: false,
            max_body_capture: defaults::max_body_capture(),
            handler_timeout_ms: None,
            trust_proxy: false,
            async_logging: false,
            logger_options: None,
            external_logger: None,
            id_generator: None,
        }
    }
}

impl RequestLoggerOptions {
    /// Use a pre-built logger (e.g. one writing to a test sink).
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.external_logger = Some(logger);
        self
    }

    /// Replace the correlation-id factory.
    pub fn with_id_generator<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.id_generator = Some(Arc::new(generate));
        self
    }

    /// Reject option combinations that cannot be honoured.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.external_logger.is_some() {
            if self.logger_options.is_some() {
                return Err(ConfigError::LoggerConflict);
            }
            if self.async_logging {
                return Err(ConfigError::AsyncWithExternalLogger);
            }
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "handler_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Validate and split into immutable settings and the logger to use.
    pub fn build(self) -> Result<(Settings, Logger), ConfigError> {
        self.check()?;

        let logger = match self.external_logger {
            Some(logger) => logger,
            None => Logger::from_options(
                &self.logger_options.unwrap_or_default(),
                self.async_logging,
            )?,
        };

        let settings = Settings {
            suppress_id_header: self.disable_headers || self.disable_id_header,
            suppress_date_header: self.disable_headers || self.disable_date_header,
            suppress_timing_header: self.disable_headers || self.disable_response_time_header,
            always_error: self.always_error,
            log_debug_request_body: self.log_debug_request_body,
            log_debug_response_body: self.log_debug_response_body,
            max_body_capture: self.max_body_capture,
            handler_timeout: self.handler_timeout_ms.map(Duration::from_millis),
            trust_proxy: self.trust_proxy,
            id_generator: self.id_generator.unwrap_or_else(default_id_generator),
        };

        Ok((settings, logger))
    }
}

/// Validated request logger settings. Immutable once built.
#[derive(Clone)]
pub struct Settings {
    pub suppress_id_header: bool,
    pub suppress_date_header: bool,
    pub suppress_timing_header: bool,
    pub always_error: bool,
    pub log_debug_request_body: bool,
    pub log_debug_response_body: bool,
    pub max_body_capture: usize,
    pub handler_timeout: Option<Duration>,
    pub trust_proxy: bool,
    pub id_generator: IdGenerator,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("suppress_id_header", &self.suppress_id_header)
            .field("suppress_date_header", &self.suppress_date_header)
            .field("suppress_timing_header", &self.suppress_timing_header)
            .field("always_error", &self.always_error)
            .field("log_debug_request_body", &self.log_debug_request_body)
            .field("log_debug_response_body", &self.log_debug_response_body)
            .field("max_body_capture", &self.max_body_capture)
            .field("handler_timeout", &self.handler_timeout)
            .field("trust_proxy", &self.trust_proxy)
            .finish_non_exhaustive()
    }
}

mod defaults {
    pub fn port() -> u16 { 3008 }
    pub fn enabled() -> bool { true }
    pub fn max_body_capture() -> usize { 64 * 1024 }
}
