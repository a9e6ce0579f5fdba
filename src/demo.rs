//! Routes served by the demo binary.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde_json::{json, Value};

use req_logger::{request_logger_middleware, HttpError, RequestId, RequestLogger};

/// Build the demo app with the request logger mounted on every route.
pub fn router(logger: Arc<RequestLogger>) -> Router {
    Router::new()
        .route("/", get(hello).post(hello))
        .route("/healthz", get(healthz))
        .route("/whoami", get(whoami))
        .route("/fail", get(fail))
        .route("/crash", get(crash))
        .layer(middleware::from_fn_with_state(
            logger,
            request_logger_middleware,
        ))
}

/// `GET /healthz`: always 200 with `{"status": "ok"}`.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn hello() -> Json<Value> {
    Json(json!({ "data": "Hello World!" }))
}

async fn whoami(Extension(RequestId(id)): Extension<RequestId>) -> Json<Value> {
    Json(json!({ "id": id }))
}

async fn fail() -> Result<Json<Value>, HttpError> {
    Err(HttpError::new(StatusCode::BAD_REQUEST, "Bad Request"))
}

async fn crash() -> Result<Json<Value>, HttpError> {
    let n: u32 = "not a number".parse()?;
    Ok(Json(json!({ "n": n })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt; // oneshot

    use req_logger::{Logger, MemorySink, RequestLogger, RequestLoggerOptions};

    fn app() -> axum::Router {
        let logger = Logger::with_sink(Arc::new(MemorySink::new(16)));
        let opts = RequestLoggerOptions::default().with_logger(logger);
        super::router(Arc::new(RequestLogger::new(opts).unwrap()))
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_200_ok() {
        let resp = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(body_json(resp.into_body()).await["status"], "ok");
    }

    #[tokio::test]
    async fn whoami_reports_the_correlation_id() {
        let resp = app()
            .oneshot(
                Request::get("/whoami")
                    .header("x-request-id", "demo-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp.into_body()).await["id"], "demo-1");
    }

    #[tokio::test]
    async fn fail_returns_400_envelope() {
        let resp = app()
            .oneshot(Request::get("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp.into_body()).await["error"]["code"], 400);
    }

    #[tokio::test]
    async fn crash_returns_generic_500() {
        let resp = app()
            .oneshot(Request::get("/crash").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(resp.into_body()).await["error"]["message"],
            "Internal Server Error"
        );
    }
}
