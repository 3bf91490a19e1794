//! Price quotes held by the cache.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A parsed 24h ticker update, before it becomes a cached quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerUpdate {
    /// Engine instrument name (e.g. "BTC").
    pub instrument: String,
    pub last_price: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Latest known price snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: String,
    pub price: Decimal,
    pub open_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    /// Percent change of `price` against `open_24h`.
    pub change_24h_pct: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Derive a quote from a ticker update.
    pub fn from_ticker(tick: TickerUpdate) -> Self {
        let change_24h_pct = change_pct(tick.open_24h, tick.last_price);
        Self {
            instrument: tick.instrument,
            price: tick.last_price,
            open_24h: tick.open_24h,
            high_24h: tick.high_24h,
            low_24h: tick.low_24h,
            volume_24h: tick.volume_24h,
            change_24h_pct,
            timestamp: tick.timestamp,
        }
    }

    /// Whether the quote is no older than `max_age` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.timestamp <= max_age
    }
}

/// Percent change from `open` to `current`, rounded to 2 dp; zero when open is zero.
pub fn change_pct(open: Decimal, current: Decimal) -> Decimal {
    if open.is_zero() {
        return Decimal::ZERO;
    }
    ((current - open) / open * dec!(100)).round_dp(2)
}
