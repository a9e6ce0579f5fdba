//! Structured logging backend used by the request logger.
//!
//! A [`Logger`] is a cheap, cloneable handle: a shared [`LogSink`], a minimum
//! [`Severity`], the [`Serializers`] applied to `req` / `res` / `err` payload
//! keys, and a set of bound fields. [`Logger::child`] returns a new handle with
//! extra bound fields (the request logger binds `{id}` per request); the parent
//! is untouched, so children can be created concurrently from any task.
//!
//! Sinks:
//!
//! - [`TracingSink`]: forwards every record as a `tracing` event. This is the
//!   default; the process decides formatting through `tracing-subscriber`.
//! - [`BufferedSink`]: performance mode. Records are handed to a dedicated
//!   writer thread over a channel so the request path never formats or writes.
//! - [`MemorySink`]: bounded in-memory ring buffer, for tests and inspection.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{config::LoggerOptions, error::ConfigError, serializers::Serializers};

/// Record severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// One structured log record, after serializers have run.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: Severity,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fields bound on the emitting logger (e.g. the correlation `id`).
    pub bindings: Map<String, Value>,
    /// Per-record payload.
    pub fields: Map<String, Value>,
    #[serde(rename = "msg")]
    pub message: String,
}

impl LogRecord {
    /// Look a key up in the payload first, then in the bindings.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| self.bindings.get(key))
    }
}

/// Destination for finished records.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, record: LogRecord);
}

/// Emits each record as a `tracing` event with target `req_logger`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        let id = record
            .bindings
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("-");
        let logger = record.name.as_deref().unwrap_or("req_logger");
        let fields = Value::Object(record.fields);
        let msg = record.message;

        match record.level {
            Severity::Debug => {
                tracing::debug!(target: "req_logger", logger, id, fields = %fields, "{msg}")
            }
            Severity::Info => {
                tracing::info!(target: "req_logger", logger, id, fields = %fields, "{msg}")
            }
            Severity::Warn => {
                tracing::warn!(target: "req_logger", logger, id, fields = %fields, "{msg}")
            }
            Severity::Error => {
                tracing::error!(target: "req_logger", logger, id, fields = %fields, "{msg}")
            }
        }
    }
}

/// Hands records to a background writer thread.
///
/// The channel is unbounded: emitting never blocks or drops. The writer thread
/// exits once every sender is gone.
pub struct BufferedSink {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl BufferedSink {
    /// Start the writer thread, forwarding to `inner`.
    pub fn spawn(inner: Arc<dyn LogSink>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
        std::thread::Builder::new()
            .name("req-logger-writer".into())
            .spawn(move || {
                while let Some(record) = rx.blocking_recv() {
                    inner.emit(record);
                }
            })?;
        Ok(Self { tx })
    }
}

impl LogSink for BufferedSink {
    fn emit(&self, record: LogRecord) {
        // Only fails once the writer thread is gone; nothing left to write to.
        let _ = self.tx.send(record);
    }
}

/// Fixed-capacity ring buffer of records.
///
/// Once full, the oldest record is evicted to make room for the newest.
pub struct MemorySink {
    capacity: usize,
    records: Mutex<VecDeque<LogRecord>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// All buffered records, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Records whose message starts with `prefix`, oldest first.
    pub fn find(&self, prefix: &str) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter(|r| r.message.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Records emitted at exactly `level`, oldest first.
    pub fn at_level(&self, level: Severity) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

/// Handle used to emit records. Clone freely.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    level: Severity,
    enabled: bool,
    name: Option<Arc<str>>,
    serializers: Serializers,
    bindings: Arc<Map<String, Value>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("enabled", &self.enabled)
            .field("name", &self.name)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }
}

impl Logger {
    /// A logger writing to `sink` at [`Severity::Info`] with the standard
    /// serializers.
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            level: Severity::Info,
            enabled: true,
            name: None,
            serializers: Serializers::default(),
            bindings: Arc::new(Map::new()),
        }
    }

    /// Build the logger described by `opts`.
    ///
    /// With `async_logging` the sink (by default a [`TracingSink`]) is put
    /// behind a [`BufferedSink`].
    pub fn from_options(opts: &LoggerOptions, async_logging: bool) -> Result<Self, ConfigError> {
        let sink = opts
            .sink
            .clone()
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn LogSink>);
        let sink: Arc<dyn LogSink> = if async_logging {
            Arc::new(BufferedSink::spawn(sink).map_err(ConfigError::Writer)?)
        } else {
            sink
        };

        let serializers = opts.serializers.unwrap_or_else(|| {
            if opts.include_bodies {
                Serializers::with_bodies()
            } else {
                Serializers::default()
            }
        });

        let mut logger = Self::with_sink(sink)
            .with_level(opts.level)
            .with_serializers(serializers);
        logger.enabled = opts.enabled;
        if let Some(name) = &opts.name {
            logger = logger.with_name(name);
        }
        Ok(logger)
    }

    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    pub fn with_serializers(mut self, serializers: Serializers) -> Self {
        self.serializers = serializers;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(Arc::from(name));
        self
    }

    /// Derive a logger whose records all carry `bindings` in addition to the
    /// parent's. Later bindings win on key collisions.
    pub fn child<I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut merged = (*self.bindings).clone();
        merged.extend(bindings);
        Self {
            bindings: Arc::new(merged),
            ..self.clone()
        }
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    pub fn is_enabled(&self, level: Severity) -> bool {
        self.enabled && level >= self.level
    }

    /// Emit `fields` at `level`. `fields` should be a JSON object; anything
    /// else is logged under a `value` key.
    pub fn log(&self, level: Severity, fields: Value, message: impl Into<String>) {
        if !self.is_enabled(level) {
            return;
        }

        let mut fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("value".to_owned(), other)]),
        };
        for (key, value) in fields.iter_mut() {
            if let Some(serialized) = self.serializers.apply(key, value) {
                *value = serialized;
            }
        }

        self.sink.emit(LogRecord {
            level,
            time: Utc::now(),
            name: self.name.as_deref().map(str::to_owned),
            bindings: (*self.bindings).clone(),
            fields,
            message: message.into(),
        });
    }

    pub fn debug(&self, fields: Value, message: impl Into<String>) {
        self.log(Severity::Debug, fields, message);
    }

    pub fn info(&self, fields: Value, message: impl Into<String>) {
        self.log(Severity::Info, fields, message);
    }

    pub fn warn(&self, fields: Value, message: impl Into<String>) {
        self.log(Severity::Warn, fields, message);
    }

    pub fn error(&self, fields: Value, message: impl Into<String>) {
        self.log(Severity::Error, fields, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spy(capacity: usize) -> (Arc<MemorySink>, Logger) {
        let sink = Arc::new(MemorySink::new(capacity));
        let logger = Logger::with_sink(sink.clone()).with_level(Severity::Debug);
        (sink, logger)
    }

    // -----------------------------------------------------------------------
    // Severity
    // -----------------------------------------------------------------------

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn severity_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            level: Severity,
        }
        let w: Wrap = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, Severity::Warn);
    }

    // -----------------------------------------------------------------------
    // Logger
    // -----------------------------------------------------------------------

    #[test]
    fn child_merges_bindings_without_touching_parent() {
        let (sink, parent) = spy(10);
        let parent = parent.child([("service".to_owned(), json!("api"))]);
        let child = parent.child([("id".to_owned(), json!("abc"))]);

        child.info(json!({ "k": 1 }), "hello");
        parent.info(json!({}), "parent");

        let records = sink.records();
        assert_eq!(records[0].bindings["id"], "abc");
        assert_eq!(records[0].bindings["service"], "api");
        assert_eq!(records[0].get("k"), Some(&json!(1)));
        assert!(records[1].bindings.get("id").is_none());
    }

    #[test]
    fn records_below_the_minimum_level_are_skipped() {
        let sink = Arc::new(MemorySink::new(10));
        let logger = Logger::with_sink(sink.clone()).with_level(Severity::Warn);

        logger.debug(json!({}), "d");
        logger.info(json!({}), "i");
        logger.warn(json!({}), "w");
        logger.error(json!({}), "e");

        let messages: Vec<_> = sink.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, ["w", "e"]);
    }

    #[test]
    fn disabled_logger_emits_nothing() {
        let sink = Arc::new(MemorySink::new(10));
        let opts = LoggerOptions {
            enabled: false,
            sink: Some(sink.clone() as Arc<dyn LogSink>),
            ..LoggerOptions::default()
        };
        let logger = Logger::from_options(&opts, false).unwrap();
        logger.error(json!({}), "nope");
        assert!(sink.records().is_empty());
    }

    #[test]
    fn options_name_and_sink_are_used() {
        let sink = Arc::new(MemorySink::new(10));
        let opts = LoggerOptions {
            name: Some("api".into()),
            sink: Some(sink.clone() as Arc<dyn LogSink>),
            ..LoggerOptions::default()
        };
        let logger = Logger::from_options(&opts, false).unwrap();
        logger.info(json!({}), "named");
        assert_eq!(sink.records()[0].name.as_deref(), Some("api"));

        let renamed = logger.with_name("worker");
        renamed.info(json!({}), "renamed");
        assert_eq!(sink.records()[1].name.as_deref(), Some("worker"));
    }

    #[test]
    fn serializers_run_on_req_res_and_err_keys() {
        let (sink, logger) = spy(10);
        logger.info(
            json!({
                "req": { "method": "GET", "secret": "x" },
                "res": { "statusCode": 204, "headers": {}, "body": "b" },
                "other": { "secret": "kept" },
            }),
            "msg",
        );

        let record = &sink.records()[0];
        assert_eq!(record.fields["req"], json!({ "method": "GET" }));
        assert_eq!(record.fields["res"], json!({ "status": 204, "headers": {} }));
        assert_eq!(record.fields["other"]["secret"], "kept");
    }

    #[test]
    fn body_serializers_keep_bodies() {
        let (sink, logger) = spy(10);
        let logger = logger.with_serializers(Serializers::with_bodies());
        logger.info(json!({ "res": { "statusCode": 200, "body": "b" } }), "msg");
        assert_eq!(sink.records()[0].fields["res"]["body"], "b");
    }

    #[test]
    fn non_object_payload_is_wrapped() {
        let (sink, logger) = spy(10);
        logger.warn(json!(42), "n");
        assert_eq!(sink.records()[0].fields["value"], 42);
    }

    // -----------------------------------------------------------------------
    // Sinks
    // -----------------------------------------------------------------------

    #[test]
    fn memory_sink_evicts_oldest_when_full() {
        let (sink, logger) = spy(2);
        logger.info(json!({}), "oldest");
        logger.info(json!({}), "middle");
        logger.info(json!({}), "newest");

        let messages: Vec<_> = sink.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, ["middle", "newest"]);
    }

    #[test]
    fn memory_sink_filters_by_level_and_prefix() {
        let (sink, logger) = spy(10);
        logger.info(json!({}), "GET /a");
        logger.error(json!({}), "GET /b");
        logger.info(json!({}), "POST /c");

        assert_eq!(sink.at_level(Severity::Error).len(), 1);
        assert_eq!(sink.find("GET").len(), 2);
        sink.clear();
        assert!(sink.records().is_empty());
    }

    #[test]
    fn buffered_sink_forwards_to_inner_sink() {
        let inner = Arc::new(MemorySink::new(10));
        let buffered = BufferedSink::spawn(inner.clone()).unwrap();
        let logger = Logger::with_sink(Arc::new(buffered));

        logger.info(json!({ "n": 1 }), "queued");
        drop(logger);

        // The writer thread drains asynchronously.
        for _ in 0..100 {
            if !inner.records().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(inner.records()[0].message, "queued");
    }

    #[test]
    fn log_record_serializes_message_as_msg() {
        let (sink, logger) = spy(1);
        logger.info(json!({}), "hi");
        let json = serde_json::to_value(&sink.records()[0]).unwrap();
        assert_eq!(json["msg"], "hi");
        assert_eq!(json["level"], "info");
    }
}
