//! HTTP listener: `GET /metrics` and `GET /healthy`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::promutil;

use super::telemetry::Telemetry;
use super::SnapshotStore;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Serves the exporter's HTTP surface until the token cancels.
pub struct MetricsServer {
    addr: String,
    store: Arc<SnapshotStore>,
    telemetry: Arc<Telemetry>,
    /// Liveness window for /healthy (2 × scrape interval).
    healthy_window: Duration,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

struct AppState {
    store: Arc<SnapshotStore>,
    telemetry: Arc<Telemetry>,
    healthy_window: Duration,
}

impl MetricsServer {
    pub fn new(
        addr: impl Into<String>,
        store: Arc<SnapshotStore>,
        telemetry: Arc<Telemetry>,
        healthy_window: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            store,
            telemetry,
            healthy_window,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listener and starts serving. Bind failures surface here
    /// so the caller can map them to its exit code.
    pub async fn start(&self) -> Result<()> {
        // Accept ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let state = Arc::new(AppState {
            store: Arc::clone(&self.store),
            telemetry: Arc::clone(&self.telemetry),
            healthy_window: self.healthy_window,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthy", get(healthy_handler))
            .with_state(state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                error!(error = %e, "metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }
}

/// GET /metrics: the last good snapshot plus exporter self-metrics.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = String::new();

    if let Some(snapshot) = state.store.latest() {
        match promutil::encode_text(&snapshot.metrics) {
            Ok(text) => body.push_str(&text),
            Err(e) => {
                error!(error = %e, "encoding snapshot");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, CONTENT_TYPE)],
                    "encoding error".to_string(),
                );
            }
        }
    }

    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&state.telemetry.registry().gather(), &mut buf) {
        error!(error = %e, "encoding exporter telemetry");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            "encoding error".to_string(),
        );
    }
    body.push_str(&String::from_utf8_lossy(&buf));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        body,
    )
}

/// GET /healthy: 200 while scrapes keep completing, 503 otherwise.
async fn healthy_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.store.healthy(state.healthy_window, Utc::now()) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no recent scrape")
    }
}
