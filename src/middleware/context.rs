//! Per-request state shared between the middleware and the bodies it wraps.

use std::{
    net::SocketAddr,
    sync::OnceLock,
    time::Instant,
};

use axum::{
    extract::ConnectInfo,
    http::{request::Parts, HeaderMap, Method},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::capture::CapturedBody;
use crate::logger::Logger;

/// State for one in-flight request. Never shared across requests.
#[derive(Debug)]
pub struct RequestContext {
    pub id: String,
    pub client_ip: String,
    pub method: Method,
    pub path: String,
    pub started: Instant,
    pub start_date: DateTime<Utc>,
    /// Child logger bound with `{id}`.
    pub log: Logger,
    request_body: OnceLock<CapturedBody>,
    response_time_ms: OnceLock<u64>,
}

impl RequestContext {
    pub fn new(id: String, client_ip: String, parts: &Parts, log: Logger) -> Self {
        Self {
            id,
            client_ip,
            method: parts.method.clone(),
            path: parts.uri.path().to_owned(),
            started: Instant::now(),
            start_date: Utc::now(),
            log,
            request_body: OnceLock::new(),
            response_time_ms: OnceLock::new(),
        }
    }

    /// Elapsed milliseconds since the request started.
    ///
    /// Fixed by the first call; later calls return the same value.
    pub fn response_time_ms(&self) -> u64 {
        *self.response_time_ms.get_or_init(|| {
            u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
        })
    }

    pub fn start_date_http(&self) -> String {
        http_date(&self.start_date)
    }

    /// `"<ip> - <METHOD> <path>"`, the prefix of every lifecycle message.
    pub fn summary(&self) -> String {
        format!("{} - {} {}", self.client_ip, self.method, self.path)
    }

    /// What the handler read of the request body. Set only when request-body
    /// logging is on and the body reached its end.
    pub fn request_body(&self) -> Option<&CapturedBody> {
        self.request_body.get()
    }

    /// First write wins.
    pub(crate) fn record_request_body(&self, body: CapturedBody) {
        let _ = self.request_body.set(body);
    }
}

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(t: &DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Client address: first `X-Forwarded-For` hop when trusted, else the peer
/// address from `ConnectInfo`, else `-`.
pub fn client_ip(parts: &Parts, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string())
        .unwrap_or_else(|| "-".to_owned())
}

/// Header map as JSON. Repeated headers become arrays; non-UTF-8 values are
/// replaced lossily.
pub fn headers_json(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for name in headers.keys() {
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        out.insert(name.as_str().to_owned(), value);
    }
    Value::Object(out)
}

/// Body bytes as a log value: UTF-8 text when possible, else a byte count.
pub fn body_value(bytes: &Bytes) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_owned()),
        Err(_) => json!({ "binary": true, "length": bytes.len() }),
    }
}

/// The raw request object handed to the `req` serializer.
pub fn raw_request(parts: &Parts, ctx: &RequestContext) -> Value {
    let mut raw = json!({
        "id": ctx.id,
        "method": parts.method.as_str(),
        "url": parts.uri.to_string(),
        "headers": headers_json(&parts.headers),
        "ip": ctx.client_ip,
        "httpVersion": format!("{:?}", parts.version),
    });
    if let Some(body) = ctx.request_body() {
        raw["body"] = body.to_value();
    }
    raw
}
