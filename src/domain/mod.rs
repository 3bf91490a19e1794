//! Domain layer - Core business logic and models.
//!
//! Pure types and arithmetic for timed positions: placement terms,
//! settlement math, quotes and account balances. No I/O happens here
//! (hexagonal architecture inner ring).

pub mod account;
pub mod error;
pub mod position;
pub mod pricing;
pub mod quote;

// Re-export core types for convenience
pub use account::{Account, EntryKind, LedgerEntry, TradeStats};
pub use error::EngineError;
pub use position::{AccountId, Direction, Position, PositionId, PositionStatus, TradeResult};
pub use pricing::{PlacementTerms, SettlementAmounts};
pub use quote::{Quote, TickerUpdate};
