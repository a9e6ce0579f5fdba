//! The request logger middleware.
//!
//! For every request it:
//!
//! 1. resolves the correlation id and binds a child logger to it,
//! 2. logs `"<ip> - <METHOD> <path>"` at info with the serialized request,
//! 3. runs the downstream service (panics and an optional deadline are turned
//!    into faults), teeing the request body into the context when request-body
//!    logging is on,
//! 4. on a fault, logs it and replaces the response with the JSON envelope
//!    `{"error":{"code":..,"message":..}}`,
//! 5. stamps `X-Request-ID`, `Date` and `X-Response-Time` on the response head,
//! 6. wraps the body in a [`CapturingBody`]; once it has been fully sent the
//!    outcome is logged at a severity derived from the status code. HEAD
//!    responses, whose body the router drops unread, complete immediately.
//!
//! `X-Response-Time` is measured when the downstream service hands back the
//! response head, since headers cannot change once the body starts flowing.
//! The completion record reports the same value.
//!
//! ```rust,ignore
//! let logger = Arc::new(RequestLogger::new(RequestLoggerOptions::default())?);
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(logger, request_logger_middleware));
//! ```

use std::{panic::AssertUnwindSafe, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE, DATE},
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::FutureExt as _;
use serde_json::{json, Value};

use super::{
    capture::{BodyObserver, CapturedBody, CapturingBody},
    context::{self, http_date, RequestContext},
    request_id::{self, RequestId, X_REQUEST_ID},
};
use crate::{
    config::{RequestLoggerOptions, Settings},
    error::{ConfigError, Fault, HttpError},
    logger::{Logger, Severity},
};

pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// Request logger state. Build once at startup and share through an `Arc`.
#[derive(Debug)]
pub struct RequestLogger {
    settings: Settings,
    logger: Logger,
}

impl RequestLogger {
    /// Validate `opts` and build the logger. Fails on conflicting options.
    pub fn new(opts: RequestLoggerOptions) -> Result<Self, ConfigError> {
        let (settings, logger) = opts.build()?;
        Ok(Self { settings, logger })
    }

    /// The root logger (unbound).
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn handle(&self, req: Request, next: Next) -> Response {
        let settings = &self.settings;

        let id = request_id::resolve(req.headers(), &settings.id_generator);
        let log = self.logger.child([("id".to_owned(), Value::from(id.clone()))]);

        let (mut parts, body) = req.into_parts();
        let ip = context::client_ip(&parts, settings.trust_proxy);
        let ctx = Arc::new(RequestContext::new(id.clone(), ip, &parts, log));

        // Tee the request body as the handler reads it; nothing is buffered
        // ahead of the handler.
        let body = if settings.log_debug_request_body {
            let capture = Box::new(RequestBodyCapture(Arc::clone(&ctx)));
            Body::new(CapturingBody::new(body, settings.max_body_capture, false, capture))
        } else {
            body
        };

        parts.extensions.insert(RequestId(id));
        ctx.log.info(
            json!({
                "req": context::raw_request(&parts, &ctx),
                "startDate": ctx.start_date_http(),
            }),
            ctx.summary(),
        );

        let response = match self.run(Request::from_parts(parts, body), next).await {
            Ok(mut response) => match response.extensions_mut().remove::<Fault>() {
                Some(Fault(fault)) => self.fail(&ctx, &fault, response.headers()),
                None => response,
            },
            Err(fault) => self.fail(&ctx, &fault, &HeaderMap::new()),
        };

        self.finish(ctx, response)
    }

    /// Run the downstream service, turning panics and timeouts into faults.
    async fn run(&self, req: Request, next: Next) -> Result<Response, HttpError> {
        let downstream = AssertUnwindSafe(next.run(req)).catch_unwind();
        let outcome = match self.settings.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, downstream).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(HttpError::new(StatusCode::REQUEST_TIMEOUT, "Request Timeout")
                        .with_kind("Timeout")
                        .with_field(
                            "timeoutMs",
                            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        ))
                }
            },
            None => downstream.await,
        };
        outcome.map_err(HttpError::from_panic)
    }

    /// Error path: log the fault and build the envelope response. Headers the
    /// handler set are kept, apart from the body-describing ones.
    fn fail(&self, ctx: &RequestContext, fault: &HttpError, headers: &HeaderMap) -> Response {
        ctx.log.error(
            json!({ "err": fault.to_raw() }),
            format!("{} - {}", ctx.summary(), fault.message()),
        );

        let (status, body) = fault.envelope();
        let mut response = (status, Json(body)).into_response();
        for (name, value) in headers {
            if name != CONTENT_TYPE && name != CONTENT_LENGTH {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        response
    }

    /// Stamp headers on the response head and attach the completion observer.
    fn finish(&self, ctx: Arc<RequestContext>, response: Response) -> Response {
        let settings = &self.settings;
        let (mut parts, body) = response.into_parts();
        let elapsed = ctx.response_time_ms();

        if !settings.suppress_id_header {
            match HeaderValue::from_str(&ctx.id) {
                Ok(value) => {
                    parts.headers.insert(X_REQUEST_ID, value);
                }
                Err(_) => ctx.log.warn(
                    json!({}),
                    "correlation id is not a valid header value; X-Request-ID not sent",
                ),
            }
        }

        if settings.suppress_date_header {
            parts.headers.remove(DATE);
        } else if let Ok(value) = HeaderValue::from_str(&http_date(&ctx.start_date)) {
            parts.headers.insert(DATE, value);
        }

        if !settings.suppress_timing_header {
            if let Ok(value) = HeaderValue::from_str(&format!("{elapsed}ms")) {
                parts.headers.insert(X_RESPONSE_TIME, value);
            }
        }

        let json = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let head = ctx.method == Method::HEAD;
        let observer = Completion {
            status: parts.status,
            raw_res: json!({
                "statusCode": parts.status.as_u16(),
                "headers": context::headers_json(&parts.headers),
            }),
            always_error: settings.always_error,
            log_request_body: settings.log_debug_request_body,
            log_response_body: settings.log_debug_response_body,
            ctx,
        };

        // A HEAD body is discarded by the router without ever being polled.
        if head {
            Box::new(observer).complete(CapturedBody::empty(), None);
            return Response::from_parts(parts, body);
        }

        let body = CapturingBody::new(body, settings.max_body_capture, json, Box::new(observer));
        Response::from_parts(parts, Body::new(body))
    }
}

/// Axum middleware entry point.
///
/// Mount with `axum::middleware::from_fn_with_state(Arc<RequestLogger>, request_logger_middleware)`.
pub async fn request_logger_middleware(
    State(logger): State<Arc<RequestLogger>>,
    req: Request,
    next: Next,
) -> Response {
    logger.handle(req, next).await
}

/// Severity for a finished response.
pub fn classify(status: StatusCode, always_error: bool) -> Severity {
    if status.as_u16() < 400 {
        Severity::Info
    } else if status.is_server_error() || always_error {
        Severity::Error
    } else {
        Severity::Warn
    }
}

/// Completion path, run once the response body has been fully sent.
struct Completion {
    ctx: Arc<RequestContext>,
    status: StatusCode,
    raw_res: Value,
    always_error: bool,
    log_request_body: bool,
    log_response_body: bool,
}

impl BodyObserver for Completion {
    fn complete(self: Box<Self>, body: CapturedBody, parse_error: Option<serde_json::Error>) {
        let Completion {
            ctx,
            status,
            mut raw_res,
            always_error,
            log_request_body,
            log_response_body,
        } = *self;
        let summary = ctx.summary();

        if let Some(e) = parse_error {
            ctx.log.error(
                json!({
                    "err": {
                        "message": e.to_string(),
                        "stack": Value::Null,
                        "type": "JsonParseError",
                        "line": e.line(),
                        "column": e.column(),
                    }
                }),
                format!("{summary} - failed to parse response body as JSON"),
            );
        }

        let elapsed = ctx.response_time_ms();

        if log_request_body {
            let (raw, truncated) = match ctx.request_body() {
                Some(captured) => (captured.to_value(), captured.truncated),
                None => (Value::Null, false),
            };
            ctx.log.debug(
                json!({ "body": raw, "truncated": truncated }),
                format!("{summary} - request body"),
            );
        }
        if log_response_body {
            ctx.log.debug(
                json!({ "body": body.to_value(), "truncated": body.truncated }),
                format!("{summary} - response body"),
            );
        }

        raw_res["body"] = body.to_value();

        ctx.log.log(
            classify(status, always_error),
            json!({
                "res": raw_res,
                "responseTime": elapsed,
                "startDate": ctx.start_date_http(),
            }),
            format!("{summary} - {} {elapsed}ms", status.as_u16()),
        );
    }

    fn fault(self: Box<Self>, error: String) {
        let ctx = self.ctx;
        ctx.log.error(
            json!({
                "err": {
                    "message": error,
                    "stack": Value::Null,
                    "type": "TransportError",
                },
                "responseTime": ctx.response_time_ms(),
                "startDate": ctx.start_date_http(),
            }),
            format!("{} - response stream failed", ctx.summary()),
        );
    }
}

/// Stores what the handler read of the request body on the context.
struct RequestBodyCapture(Arc<RequestContext>);

impl BodyObserver for RequestBodyCapture {
    fn complete(self: Box<Self>, body: CapturedBody, _parse_error: Option<serde_json::Error>) {
        self.0.record_request_body(body);
    }

    // Handlers may legitimately stop reading early; the debug record then
    // shows no body.
    fn fault(self: Box<Self>, _error: String) {}
}
