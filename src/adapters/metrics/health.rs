//! Health Server - Probes, Feed Status and Metrics Export
//!
//! Serves `/live`, `/ready`, `/status` and `/metrics` via axum 0.7.
//! Readiness requires a feed that has not given up reconnecting and a
//! usable ledger; it flips to 503 as soon as shutdown begins.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use super::prometheus::EngineMetrics;
use crate::adapters::feeds::{FeedState, PriceCache};
use crate::ports::ledger::PositionLedger;

/// Shared state polled by the health endpoints.
pub struct HealthState {
    pub cache: Arc<PriceCache>,
    pub ledger: Arc<dyn PositionLedger>,
    pub metrics: Arc<EngineMetrics>,
    /// Cleared when graceful shutdown starts.
    accepting: AtomicBool,
}

impl HealthState {
    pub fn new(
        cache: Arc<PriceCache>,
        ledger: Arc<dyn PositionLedger>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            cache,
            ledger,
            metrics,
            accepting: AtomicBool::new(true),
        }
    }

    /// Mark the engine as draining; readiness fails from now on.
    pub fn begin_shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Whether the engine can take placements right now.
    pub async fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
            && self.cache.state() != FeedState::Degraded
            && self.ledger.is_healthy().await
    }
}

/// Axum-based health and metrics server.
pub struct HealthServer {
    state: Arc<HealthState>,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// Build the router; split out so handlers can be exercised without a socket.
    pub fn router(state: Arc<HealthState>) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .route("/metrics", get(Self::metrics))
            .with_state(state)
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::router(Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!(address = %self.bind_address, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness: always 200 while the process runs.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready().await {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    /// Feed connectivity, tracked instruments and retry count.
    async fn status(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        Json(state.cache.status())
    }

    async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        match state.metrics.render() {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "Failed to render metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
            }
        }
    }
}
