use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;

use crate::cgroup::{self, Monitor};
use crate::metrics::{self, Exporter};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to poll the cgroup hierarchy: {0}")]
    Poll(#[from] cgroup::Error),
    #[error("failed to export metrics: {0}")]
    Metrics(#[from] metrics::Error),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server failure: {0}")]
    Serve(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Polls the monitor and renders the result through the exporter.
pub struct Scraper {
    monitor: Monitor,
    exporter: Exporter,
    lock: Mutex<()>,
}

impl Scraper {
    pub fn new(monitor: Monitor, exporter: Exporter) -> Self {
        Self {
            monitor,
            exporter,
            lock: Mutex::new(()),
        }
    }

    /// Runs one poll and returns the exposition of its samples.
    ///
    /// The published values are left untouched if the poll fails.
    pub fn scrape(&self) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let samples = self.monitor.poll()?;
        self.exporter.publish(&samples);
        Ok(self.exporter.encode()?)
    }
}

#[derive(Clone)]
struct AppState {
    scraper: Arc<Scraper>,
    timeout: Duration,
}

async fn serve_metrics(State(state): State<AppState>) -> Response {
    let scraper = Arc::clone(&state.scraper);
    let scrape = tokio::task::spawn_blocking(move || scraper.scrape());

    match tokio::time::timeout(state.timeout, scrape).await {
        Ok(Ok(Ok(body))) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Ok(Err(err))) => {
            log::error!("Failed to collect metrics: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to collect metrics").into_response()
        }
        Ok(Err(err)) => {
            log::error!("Metrics collection task failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to collect metrics").into_response()
        }
        Err(_) => {
            log::warn!(
                "Metrics collection hasn't finished within {:?}.",
                state.timeout
            );
            (StatusCode::SERVICE_UNAVAILABLE, "metrics collection timed out").into_response()
        }
    }
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(scraper: Arc<Scraper>, timeout: Duration) -> Self {
        let router = axum::Router::new()
            .route("/metrics", get(serve_metrics))
            .with_state(AppState { scraper, timeout });
        Self { router }
    }

    /// Serves until interrupted with Ctrl-C.
    pub async fn listen(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        log::info!("Serving metrics on http://{addr}/metrics");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for the shutdown signal: {err}");
                }
            })
            .await
            .map_err(Error::Serve)
    }
}
