//! Timed Position Engine - Entry Point
//!
//! Initializes configuration, logging, the price feed, the ledger and
//! the settlement sweeper. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Open the ledger (file snapshot + journal, or in-memory)
//! 4. Create the price cache and ticker feed, warm the cache over REST
//! 5. Spawn health server (/live, /ready, /status, /metrics)
//! 6. Spawn the ticker feed (auto-reconnect WebSocket)
//! 7. Spawn the settlement sweeper (interval timer)
//! 8. Wait for SIGINT → graceful shutdown (stop ticking → finish sweep → exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use timed_position_engine::adapters::feeds::{PriceCache, TickerFeed};
use timed_position_engine::adapters::metrics::{EngineMetrics, HealthServer, HealthState};
use timed_position_engine::adapters::persistence::{FileLedger, MemoryLedger};
use timed_position_engine::config::{self, AppConfig, LedgerBackend};
use timed_position_engine::ports::ledger::PositionLedger;
use timed_position_engine::usecases::SettlementProcessor;

/// Config path, overridable with `TIMED_ENGINE_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
  // ── 1. Load configuration ───────────────────────────────
  let config_path =
    std::env::var("TIMED_ENGINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
  let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

  // ── 2. Initialize structured JSON logging ───────────────
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.engine.log_level)),
    )
    .json()
    .init();

  info!(
    name = %config.engine.name,
    version = env!("CARGO_PKG_VERSION"),
    instruments = ?config.feed.instruments,
    backend = ?config.persistence.backend,
    "Starting timed position engine"
  );

  let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

  // ── 3. Ledger ───────────────────────────────────────────
  let ledger = open_ledger(&config).await?;

  // ── 4. Price cache + feed ───────────────────────────────
  let metrics = Arc::new(EngineMetrics::new().context("Failed to register metrics")?);
  let cache = Arc::new(PriceCache::new(config.feed.instruments.clone()));
  let feed = Arc::new(
    TickerFeed::new(Arc::clone(&cache), Arc::clone(&metrics), &config.feed)
      .context("Failed to create ticker feed")?,
  );

  if let Err(e) = feed.seed_from_rest().await {
    warn!(error = %e, "REST warm-up failed, waiting for stream quotes");
  }

  // ── 5. Health server ────────────────────────────────────
  let health_state = Arc::new(HealthState::new(
    Arc::clone(&cache),
    Arc::clone(&ledger),
    Arc::clone(&metrics),
  ));
  let health_server = HealthServer::new(
    Arc::clone(&health_state),
    config.health.bind_address.clone(),
  );
  let health_shutdown = shutdown_tx.subscribe();
  let health_handle = tokio::spawn(async move {
    if let Err(e) = health_server.run(health_shutdown).await {
      error!(error = %e, "Health server failed");
    }
  });

  // ── 6. Ticker feed ──────────────────────────────────────
  let feed_shutdown = shutdown_tx.subscribe();
  let feed_ref = Arc::clone(&feed);
  let feed_handle = tokio::spawn(async move {
    if let Err(e) = feed_ref.run(feed_shutdown).await {
      error!(error = %e, "Ticker feed task failed");
    }
  });

  // ── 7. Settlement sweeper ───────────────────────────────
  let processor = Arc::new(SettlementProcessor::new(
    Arc::clone(&ledger),
    Arc::clone(&cache),
    Arc::clone(&metrics),
    &config.positions,
    &config.settlement,
  ));
  let sweeper_handle = tokio::spawn(processor.run(shutdown_tx.subscribe()));

  info!("All tasks spawned, engine is running");

  // ── 8. Wait for SIGINT ──────────────────────────────────
  if let Err(e) = signal::ctrl_c().await {
    error!(error = %e, "Failed to listen for SIGINT, shutting down");
  } else {
    info!("SIGINT received, initiating graceful shutdown");
  }

  // Readiness → 503 before anything stops
  health_state.begin_shutdown();
  let _ = shutdown_tx.send(());
  info!("Shutdown signal broadcast to all tasks");

  // The sweeper waits for its in-flight sweep, so give it the longest grace
  if tokio::time::timeout(Duration::from_secs(30), sweeper_handle)
    .await
    .is_err()
  {
    warn!("Settlement sweeper did not stop within 30s");
  }

  let _ = tokio::time::timeout(Duration::from_secs(5), feed_handle).await;
  let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

  info!("Shutdown complete");
  Ok(())
}

/// Open the configured ledger backend.
async fn open_ledger(config: &AppConfig) -> Result<Arc<dyn PositionLedger>> {
  match config.persistence.backend {
    LedgerBackend::File => {
      let ledger = FileLedger::open(&config.persistence.data_dir)
        .await
        .context("Failed to open file ledger")?;
      Ok(Arc::new(ledger))
    }
    LedgerBackend::Memory => {
      warn!("In-memory ledger selected, balances and positions are lost on restart");
      Ok(Arc::new(MemoryLedger::new()))
    }
  }
}
