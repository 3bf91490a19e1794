//! Price Cache - Latest Quote per Instrument
//!
//! Single source of truth for "current price". One writer (the ticker
//! feed) replaces whole quotes under a short write lock; readers take a
//! read lock, clone, and never observe a half-applied update. Every
//! applied tick fans the full snapshot out over a broadcast channel.
//!
//! Quotes are never cleared on disconnect: callers keep reading the last
//! known (possibly stale) value and judge freshness themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{Quote, TickerUpdate};
use crate::ports::price_source::PriceSource;

/// Connectivity of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; quotes are frozen at their last values.
    Degraded,
}

impl FeedState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Reconnecting => 2,
            Self::Degraded => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connected,
            2 => Self::Reconnecting,
            3 => Self::Degraded,
            _ => Self::Connecting,
        }
    }
}

/// Health snapshot exposed on `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub state: FeedState,
    pub instruments: Vec<String>,
    pub retry_count: u32,
    pub quotes_cached: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Shared in-memory quote cache.
pub struct PriceCache {
    quotes: RwLock<HashMap<String, Quote>>,
    instruments: Vec<String>,
    state: AtomicU8,
    retry_count: AtomicU32,
    snapshot_tx: broadcast::Sender<Vec<Quote>>,
}

impl PriceCache {
    /// Create an empty cache tracking `instruments`.
    pub fn new(instruments: Vec<String>) -> Self {
        let (snapshot_tx, _) = broadcast::channel(256);
        Self {
            quotes: RwLock::new(HashMap::new()),
            instruments,
            state: AtomicU8::new(FeedState::Connecting.as_u8()),
            retry_count: AtomicU32::new(0),
            snapshot_tx,
        }
    }

    /// Whether `instrument` is one of the tracked instruments.
    pub fn tracks(&self, instrument: &str) -> bool {
        self.instruments.iter().any(|i| i == instrument)
    }

    /// Replace the instrument's quote and publish the new snapshot.
    ///
    /// Ticks for untracked instruments or with a non-positive price are
    /// dropped and return `None`.
    pub fn apply_tick(&self, tick: TickerUpdate) -> Option<Quote> {
        if !self.tracks(&tick.instrument) {
            debug!(instrument = %tick.instrument, "Dropping tick for untracked instrument");
            return None;
        }
        if tick.last_price.is_sign_negative() || tick.last_price.is_zero() {
            debug!(instrument = %tick.instrument, price = %tick.last_price, "Dropping non-positive tick");
            return None;
        }

        let quote = Quote::from_ticker(tick);

        let snapshot = {
            let mut quotes = self.quotes.write().unwrap_or_else(PoisonError::into_inner);
            quotes.insert(quote.instrument.clone(), quote.clone());
            Self::sorted(&quotes)
        };

        // No subscribers is fine
        let _ = self.snapshot_tx.send(snapshot);

        Some(quote)
    }

    /// Receive the full cache snapshot after every applied tick.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Quote>> {
        self.snapshot_tx.subscribe()
    }

    /// All cached quotes, ordered by instrument.
    pub fn snapshot(&self) -> Vec<Quote> {
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        Self::sorted(&quotes)
    }

    pub fn set_state(&self, state: FeedState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> FeedState {
        FeedState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_retry_count(&self, retries: u32) {
        self.retry_count.store(retries, Ordering::Relaxed);
    }

    /// Connectivity, tracked instruments and retry count for health checks.
    pub fn status(&self) -> FeedStatus {
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        FeedStatus {
            state: self.state(),
            instruments: self.instruments.clone(),
            retry_count: self.retry_count.load(Ordering::Relaxed),
            quotes_cached: quotes.len(),
            last_update: quotes.values().map(|q| q.timestamp).max(),
        }
    }

    fn sorted(quotes: &HashMap<String, Quote>) -> Vec<Quote> {
        let mut all: Vec<Quote> = quotes.values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }
}

impl PriceSource for PriceCache {
    fn get_price(&self, instrument: &str) -> Option<Quote> {
        self.quotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instrument)
            .cloned()
    }

    fn instruments(&self) -> Vec<String> {
        self.instruments.clone()
    }
}
