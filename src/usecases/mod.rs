//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the engine's workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `PositionLifecycle`: placement, cancellation and position queries
//! - `SettlementProcessor`: periodic and on-demand expiry sweeps
//! - `AccountService`: operator account administration

pub mod accounts;
pub mod position_lifecycle;
pub mod settlement;

pub use accounts::AccountService;
pub use position_lifecycle::{
  ActivePositionView, CancelReceipt, HistoryFilter, Page, PlaceRequest, PositionLifecycle,
};
pub use settlement::{
  SettlementProcessor, SettlementResult, SettlementStatus, SweepOutcome, SweepReport,
};
