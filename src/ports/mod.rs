//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `PriceSource`: Non-blocking latest-quote lookups
//! - `PositionLedger`: Positions and balances, with atomic transitions

pub mod ledger;
pub mod price_source;
