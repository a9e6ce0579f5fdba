use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use req_logger::{config::LogFormat, Config, RequestLogger};

mod demo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    // Config is optional for the demo; defaults serve on :3008.
    let config = match std::env::var("REQLOG_CONFIG").map(PathBuf::from) {
        Ok(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        Err(_) => Config::default(),
    };

    init_tracing(&config);

    let port = config.server.port;
    let logger = Arc::new(
        RequestLogger::new(config.request_logger).context("invalid [request_logger] options")?,
    );
    // hyper writes its own `Date` unless told not to.
    let date_header = !logger.settings().suppress_date_header;

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!(%addr, date_header, "req-logger demo listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Transport-level spans; the request logger emits the per-request records.
    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::DEBUG))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::DEBUG));

    let app = demo::router(logger).layer(trace_layer);

    req_logger::serve(listener, app, date_header, shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = config
        .server
        .log_level
        .as_deref()
        .map(tracing_subscriber::EnvFilter::new)
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| "req_logger=info,tower_http=warn".into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.server.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
            let _ = signal::ctrl_c().await;
        }
    }

    #[cfg(not(unix))]
    let _ = signal::ctrl_c().await;

    info!("shutdown signal received");
}

/// `--healthcheck`: probe the running demo's `/healthz`. A non-2xx answer or
/// a connection failure exits non-zero through `main`'s error.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("REQLOG_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3008);

    let status = reqwest::get(format!("http://127.0.0.1:{port}/healthz"))
        .await
        .context("healthz unreachable")?
        .status();
    anyhow::ensure!(status.is_success(), "healthz answered {status}");
    Ok(())
}
