//! Ticker WebSocket Feed - Live 24h Ticker Stream into the Price Cache
//!
//! Connects to a Binance-compatible `<symbol>@ticker` stream for every
//! tracked instrument and applies each frame to the `PriceCache`.
//!
//! Reconnects with a linear backoff (`base × attempt`). After
//! `max_retries` consecutive failures the cache is marked degraded and
//! the feed stops; quotes already cached stay readable.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use super::price_cache::{FeedState, PriceCache};
use crate::adapters::metrics::EngineMetrics;
use crate::config::FeedConfig;
use crate::domain::{Quote, TickerUpdate};

/// 24h ticker stream payload.
#[derive(Debug, Deserialize)]
struct TickerMsg {
    /// Event time (Unix ms).
    #[serde(rename = "E")]
    event_time: i64,
    /// Symbol.
    s: String,
    /// Last price.
    c: String,
    /// Open price 24h ago.
    o: String,
    /// High price.
    h: String,
    /// Low price.
    l: String,
    /// Base asset volume.
    v: String,
}

/// REST 24h ticker payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestTicker {
    symbol: String,
    last_price: String,
    open_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    close_time: i64,
}

/// Delay before reconnect attempt `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// Streaming client that keeps the price cache current.
pub struct TickerFeed {
    cache: Arc<PriceCache>,
    metrics: Arc<EngineMetrics>,
    http: reqwest::Client,
    ws_url: String,
    rest_url: String,
    quote_asset: String,
    retry_base_delay: Duration,
    max_retries: u32,
}

impl TickerFeed {
    /// Create a feed writing into `cache`.
    pub fn new(
        cache: Arc<PriceCache>,
        metrics: Arc<EngineMetrics>,
        config: &FeedConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.rest_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            cache,
            metrics,
            http,
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            quote_asset: config.quote_asset.to_ascii_uppercase(),
            retry_base_delay: config.retry_base_delay(),
            max_retries: config.max_retries,
        })
    }

    /// Venue symbol for an engine instrument ("BTC" → "BTCUSDT").
    pub fn symbol_for(&self, instrument: &str) -> String {
        format!("{}{}", instrument.to_ascii_uppercase(), self.quote_asset)
    }

    /// Engine instrument for a venue symbol, if tracked.
    pub fn instrument_for(&self, symbol: &str) -> Option<String> {
        let instrument = symbol.strip_suffix(self.quote_asset.as_str())?;
        self.cache
            .tracks(instrument)
            .then(|| instrument.to_string())
    }

    /// Combined raw-stream URL for all tracked instruments.
    pub fn stream_url(&self) -> String {
        use crate::ports::price_source::PriceSource;

        let streams: Vec<String> = self
            .cache
            .instruments()
            .iter()
            .map(|i| format!("{}@ticker", self.symbol_for(i).to_ascii_lowercase()))
            .collect();
        format!("{}/ws/{}", self.ws_url, streams.join("/"))
    }

    /// Parse one stream frame into a ticker update.
    pub fn parse_ticker(&self, text: &str) -> Result<TickerUpdate> {
        let msg: TickerMsg = serde_json::from_str(text).context("Invalid ticker JSON")?;

        let instrument = self
            .instrument_for(&msg.s)
            .with_context(|| format!("Untracked symbol {}", msg.s))?;

        Ok(TickerUpdate {
            instrument,
            last_price: parse_decimal(&msg.c, "last price")?,
            open_24h: parse_decimal(&msg.o, "open price")?,
            high_24h: parse_decimal(&msg.h, "high price")?,
            low_24h: parse_decimal(&msg.l, "low price")?,
            volume_24h: parse_decimal(&msg.v, "volume")?,
            timestamp: millis_to_utc(msg.event_time)?,
        })
    }

    /// Parse a raw frame and apply it to the cache.
    pub fn handle_message(&self, text: &str) -> Result<Option<Quote>> {
        let tick = self.parse_ticker(text)?;
        let quote = self.cache.apply_tick(tick);
        if let Some(q) = &quote {
            self.metrics
                .quote_updates
                .with_label_values(&[q.instrument.as_str()])
                .inc();
        }
        Ok(quote)
    }

    /// Warm the cache from the REST 24h ticker endpoint.
    ///
    /// Returns the number of quotes applied.
    #[instrument(skip(self))]
    pub async fn seed_from_rest(&self) -> Result<usize> {
        use crate::ports::price_source::PriceSource;

        let symbols: Vec<String> = self
            .cache
            .instruments()
            .iter()
            .map(|i| format!("%22{}%22", self.symbol_for(i)))
            .collect();
        let url = format!(
            "{}/api/v3/ticker/24hr?symbols=%5B{}%5D",
            self.rest_url,
            symbols.join(",")
        );

        let tickers: Vec<RestTicker> = self
            .http
            .get(&url)
            .send()
            .await
            .context("REST ticker request failed")?
            .error_for_status()
            .context("REST ticker returned error status")?
            .json()
            .await
            .context("Invalid REST ticker body")?;

        let mut applied = 0;
        for t in tickers {
            let Some(instrument) = self.instrument_for(&t.symbol) else {
                continue;
            };
            let tick = TickerUpdate {
                instrument,
                last_price: parse_decimal(&t.last_price, "last price")?,
                open_24h: parse_decimal(&t.open_price, "open price")?,
                high_24h: parse_decimal(&t.high_price, "high price")?,
                low_24h: parse_decimal(&t.low_price, "low price")?,
                volume_24h: parse_decimal(&t.volume, "volume")?,
                timestamp: millis_to_utc(t.close_time)?,
            };
            if self.cache.apply_tick(tick).is_some() {
                applied += 1;
            }
        }

        info!(applied, "Price cache seeded from REST");
        Ok(applied)
    }

    /// Run the WebSocket connection loop until shutdown or retries run out.
    ///
    /// Never returns an error for connectivity problems: those end in
    /// the `Degraded` state instead.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let url = self.stream_url();
        info!(url = %url, "Connecting to ticker stream");

        let mut attempt: u32 = 0;

        loop {
            match self.connect_and_stream(&url, &mut attempt, &mut shutdown_rx).await {
                Ok(()) => {
                    info!("Ticker feed shut down gracefully");
                    return Ok(());
                }
                Err(e) => {
                    self.metrics.feed_connected.set(0);
                    attempt += 1;
                    self.cache.set_retry_count(attempt);

                    if attempt > self.max_retries {
                        self.cache.set_state(FeedState::Degraded);
                        error!(
                            error = %e,
                            attempts = attempt,
                            "Ticker feed retries exhausted, serving last known quotes"
                        );
                        return Ok(());
                    }

                    self.cache.set_state(FeedState::Reconnecting);
                    self.metrics.feed_reconnects.inc();
                    let delay = backoff_delay(self.retry_base_delay, attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Ticker stream disconnected, reconnecting"
                    );

                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Shutdown during reconnect backoff");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Single connection session: connect, stream, exit on error or shutdown.
    async fn connect_and_stream(
        &self,
        url: &str,
        attempt: &mut u32,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Ticker WebSocket connection failed")?;

        let (_write, mut read) = ws_stream.split();

        *attempt = 0;
        self.cache.set_retry_count(0);
        self.cache.set_state(FeedState::Connected);
        self.metrics.feed_connected.set(1);
        info!("Ticker WebSocket connected");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received in ticker feed");
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text) {
                                debug!(error = %e, "Failed to apply ticker frame");
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            // Pong is handled automatically by tungstenite
                            debug!(len = data.len(), "Ticker ping received");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(anyhow::anyhow!("Ticker stream closed by venue: {frame:?}"));
                        }
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("WebSocket error: {e}"));
                        }
                        None => {
                            return Err(anyhow::anyhow!("WebSocket stream ended"));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal> {
    raw.parse::<Decimal>()
        .with_context(|| format!("Invalid {field}: {raw}"))
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).with_context(|| format!("Invalid timestamp {ms}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::price_source::PriceSource;
    use rust_decimal_macros::dec;

    fn feed_with(config: &FeedConfig) -> (TickerFeed, Arc<PriceCache>) {
        let cache = Arc::new(PriceCache::new(config.instruments.clone()));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let feed = TickerFeed::new(Arc::clone(&cache), metrics, config).unwrap();
        (feed, cache)
    }

    const FRAME: &str = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"1000.00","P":"2.04","c":"50000.00","o":"49000.00","h":"50500.00","l":"48800.00","v":"1234.5","q":"61725000.0"}"#;

    #[test]
    fn test_backoff_is_linear() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(2000));
    }

    #[test]
    fn test_symbol_mapping() {
        let (feed, _) = feed_with(&FeedConfig::default());
        assert_eq!(feed.symbol_for("btc"), "BTCUSDT");
        assert_eq!(feed.instrument_for("ETHUSDT").as_deref(), Some("ETH"));
        assert_eq!(feed.instrument_for("SOLUSDT"), None);
        assert_eq!(feed.instrument_for("BTCEUR"), None);
    }

    #[test]
    fn test_lowercase_configured_instruments_receive_ticks() {
        let config =
            crate::config::loader::parse_config("[feed]\ninstruments = [\"btc\"]\n").unwrap();
        let (feed, cache) = feed_with(&config.feed);

        feed.handle_message(FRAME).unwrap().unwrap();
        assert_eq!(cache.get_price("BTC").unwrap().price, dec!(50000.00));
        assert_eq!(cache.instruments(), vec!["BTC"]);
    }

    #[test]
    fn test_stream_url() {
        let (feed, _) = feed_with(&FeedConfig::default());
        assert_eq!(
            feed.stream_url(),
            "wss://stream.binance.com:9443/ws/btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[test]
    fn test_handle_message_updates_cache() {
        let (feed, cache) = feed_with(&FeedConfig::default());
        let quote = feed.handle_message(FRAME).unwrap().unwrap();

        assert_eq!(quote.instrument, "BTC");
        assert_eq!(quote.price, dec!(50000.00));
        assert_eq!(quote.change_24h_pct, dec!(2.04));
        assert_eq!(quote.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(cache.get_price("BTC").unwrap(), quote);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let (feed, cache) = feed_with(&FeedConfig::default());
        assert!(feed.handle_message("{\"result\":null,\"id\":1}").is_err());
        assert!(feed.handle_message("not json").is_err());
        assert!(cache.get_price("BTC").is_none());
    }

    #[tokio::test]
    async fn test_run_degrades_after_max_retries_and_keeps_quotes() {
        let config = FeedConfig {
            // Nothing listens on port 1, so every attempt fails fast.
            ws_url: "ws://127.0.0.1:1".to_string(),
            retry_base_delay_ms: 1,
            max_retries: 2,
            ..FeedConfig::default()
        };
        let (feed, cache) = feed_with(&config);
        feed.handle_message(FRAME).unwrap();

        let (_tx, rx) = broadcast::channel(1);
        feed.run(rx).await.unwrap();

        let status = cache.status();
        assert_eq!(status.state, FeedState::Degraded);
        assert_eq!(status.retry_count, 3);
        assert_eq!(cache.get_price("BTC").unwrap().price, dec!(50000.00));
    }
}
