//! Price Source Port - Point Lookups of the Latest Quote
//!
//! Synchronous on purpose: lookups are served from memory and must never
//! wait on the feed. `None` means "no price", which callers must not
//! confuse with a zero price.

use crate::domain::Quote;

/// Read side of the price cache.
pub trait PriceSource: Send + Sync + 'static {
  /// Last known quote for `instrument`, if any tick was ever applied.
  fn get_price(&self, instrument: &str) -> Option<Quote>;

  /// Instruments the source is tracking.
  fn instruments(&self) -> Vec<String>;
}
