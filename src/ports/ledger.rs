//! Ledger Port - Positions and Account Balances
//!
//! The engine's only durable state. Positions and the balances they move
//! live behind one port so that "change balance + change status" is a
//! single call, applied together or not at all.
//!
//! The close transition is a conditional update keyed on the position
//! still being `Active`. Whoever gets there first (sweep or cancel) wins;
//! the loser gets `CloseOutcome::AlreadyClosed` and nothing is mutated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{
  Account, AccountId, EngineError, LedgerEntry, Position, PositionId, PositionStatus,
  SettlementAmounts,
};

/// Failures raised by ledger mutations.
#[derive(Debug, Error)]
pub enum LedgerError {
  #[error("account {0} not found")]
  AccountNotFound(AccountId),

  #[error("account {0} is blocked")]
  AccountBlocked(AccountId),

  #[error("insufficient balance: required {required}, available {available}")]
  InsufficientBalance { required: Decimal, available: Decimal },

  #[error("{asset} balance of account {account_id} would overflow")]
  BalanceOverflow { account_id: AccountId, asset: String },

  #[error("position {0} already exists")]
  DuplicatePosition(PositionId),

  #[error("position {0} not found")]
  PositionNotFound(PositionId),

  #[error(transparent)]
  Storage(#[from] anyhow::Error),
}

impl From<LedgerError> for EngineError {
  fn from(err: LedgerError) -> Self {
    match err {
      LedgerError::AccountNotFound(id) => Self::AccountNotFound(id),
      LedgerError::AccountBlocked(id) => Self::AccountBlocked(id),
      LedgerError::InsufficientBalance { required, available } => {
        Self::InsufficientBalance { required, available }
      }
      LedgerError::PositionNotFound(id) => Self::PositionNotFound(id.to_string()),
      LedgerError::DuplicatePosition(id) => {
        Self::Storage(anyhow::anyhow!("position {id} already exists"))
      }
      e @ LedgerError::BalanceOverflow { .. } => Self::Storage(anyhow::Error::new(e)),
      LedgerError::Storage(e) => Self::Storage(e),
    }
  }
}

/// Terminal transition requested for an active position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionClose {
  /// Expiry settlement: credit the payout and record the outcome.
  Settle {
    exit_price: Decimal,
    amounts: SettlementAmounts,
    /// `Completed` or `Expired`.
    status: PositionStatus,
    asset: String,
    at: DateTime<Utc>,
  },
  /// Early cancellation: refund stake plus fee in full.
  Cancel {
    reason: Option<String>,
    asset: String,
    at: DateTime<Utc>,
  },
}

/// Result of a conditional close.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
  /// This call performed the transition.
  Applied {
    position: Position,
    account: Account,
    entry: LedgerEntry,
  },
  /// Someone else already moved the position to this terminal status.
  AlreadyClosed(PositionStatus),
}

/// Persistence port for positions and account balances.
#[async_trait]
pub trait PositionLedger: Send + Sync + 'static {
  /// Look up an account.
  async fn account(&self, id: &str) -> anyhow::Result<Option<Account>>;

  /// Create the account if missing; returns the stored account either way.
  async fn ensure_account(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<Account>;

  /// Credit an operator top-up to an existing account.
  async fn deposit(
    &self,
    account_id: &str,
    asset: &str,
    amount: Decimal,
    at: DateTime<Utc>,
  ) -> Result<LedgerEntry, LedgerError>;

  /// Block or unblock an account for new placements.
  async fn set_blocked(&self, account_id: &str, blocked: bool) -> Result<Account, LedgerError>;

  /// Debit `stake + fee` in `asset` and store the position, atomically.
  async fn open_position(
    &self,
    position: &Position,
    asset: &str,
  ) -> Result<LedgerEntry, LedgerError>;

  /// Move an active position to a terminal status and apply its balance effect.
  async fn close_position(
    &self,
    id: PositionId,
    close: PositionClose,
  ) -> Result<CloseOutcome, LedgerError>;

  /// Look up a position.
  async fn position(&self, id: PositionId) -> anyhow::Result<Option<Position>>;

  /// All positions owned by an account, any status.
  async fn positions_for(&self, owner: &str) -> anyhow::Result<Vec<Position>>;

  /// Active positions whose end time is at or before `now`.
  async fn due_positions(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Position>>;

  /// Journal entries recorded for one position, oldest first.
  async fn entries_for(&self, position_id: PositionId) -> anyhow::Result<Vec<LedgerEntry>>;

  /// Whether the backing store is usable.
  async fn is_healthy(&self) -> bool;
}
