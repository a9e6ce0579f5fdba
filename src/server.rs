//! Accept loop for serving a router with control over hyper's own `Date`
//! header.
//!
//! `axum::serve` always lets hyper stamp `Date` on every response, so a
//! request logger configured to suppress it would still leak one onto the
//! wire. [`serve`] drives connections through `hyper_util`'s auto (HTTP/1 +
//! HTTP/2) builder instead, with the connection-level date header switched by
//! `date_header`. Each request carries `ConnectInfo<SocketAddr>` like
//! `into_make_service_with_connect_info` would provide.

use std::{future::Future, pin::pin};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use tokio::net::TcpListener;
use tower::ServiceExt as _;
use tracing::{debug, info, warn};

/// Serve `app` on `listener` until `shutdown` resolves, then wait for open
/// connections to finish.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    date_header: bool,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let mut builder = Builder::new(TokioExecutor::new());
    builder.http1().auto_date_header(date_header);
    builder.http2().auto_date_header(date_header);

    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let service = app.clone().map_request(move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ConnectInfo(remote));
            req.map(Body::new)
        });

        let conn = builder
            .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
            .into_owned();
        let conn = graceful.watch(conn);

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(%remote, error = %e, "connection closed with error");
            }
        });
    }

    info!(open = graceful.count(), "draining connections");
    graceful.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use axum::{middleware::from_fn_with_state, routing::get};

    use super::*;
    use crate::{
        request_logger_middleware, Logger, MemorySink, RequestLogger, RequestLoggerOptions,
    };

    async fn spawn_app(opts: RequestLoggerOptions) -> SocketAddr {
        let logger = Arc::new(RequestLogger::new(opts).expect("valid options"));
        let date_header = !logger.settings().suppress_date_header;
        let app = Router::new()
            .route("/", get(|| async { "hello" }))
            .layer(from_fn_with_state(logger, request_logger_middleware));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, app, date_header, std::future::pending()));
        addr
    }

    #[tokio::test]
    async fn suppressed_headers_stay_off_the_wire() {
        let sink = Arc::new(MemorySink::new(8));
        let opts = RequestLoggerOptions {
            disable_headers: true,
            ..RequestLoggerOptions::default()
        }
        .with_logger(Logger::with_sink(sink));
        let addr = spawn_app(opts).await;

        let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert!(resp.headers().get("date").is_none());
        assert!(resp.headers().get("x-request-id").is_none());
        assert!(resp.headers().get("x-response-time").is_none());
        assert_eq!(resp.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn default_headers_and_peer_address_over_tcp() {
        let sink = Arc::new(MemorySink::new(8));
        let opts = RequestLoggerOptions::default().with_logger(Logger::with_sink(sink.clone()));
        let addr = spawn_app(opts).await;

        let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert!(resp.headers().contains_key("date"));
        assert!(resp.headers().contains_key("x-request-id"));
        resp.text().await.unwrap();

        assert!(!sink.find("127.0.0.1 - GET /").is_empty());
    }
}
