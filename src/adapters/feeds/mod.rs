//! Market Data Feed Adapters - Live Price Cache
//!
//! - `price_cache`: latest quote per instrument, shared by every reader
//! - `ticker`: reconnecting WebSocket ticker stream feeding the cache

pub mod price_cache;
pub mod ticker;

pub use price_cache::{FeedState, FeedStatus, PriceCache};
pub use ticker::TickerFeed;
