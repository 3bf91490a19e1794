//! Account Service Use Case - Operator Account Administration
//!
//! Thin glue over the ledger for opening accounts, topping up the
//! settlement asset and blocking accounts from new placements. Balances
//! themselves only ever move inside the ledger.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::{Account, EngineError, LedgerEntry};
use crate::ports::ledger::{LedgerError, PositionLedger};

/// Operator-facing account administration.
pub struct AccountService<L: PositionLedger + ?Sized> {
  ledger: Arc<L>,
  /// Asset credited by `deposit`.
  settlement_asset: String,
}

impl<L: PositionLedger + ?Sized> AccountService<L> {
  pub fn new(ledger: Arc<L>, settlement_asset: impl Into<String>) -> Self {
    Self {
      ledger,
      settlement_asset: settlement_asset.into(),
    }
  }

  /// Create an account, or return the existing one unchanged.
  pub async fn open_account(&self, account_id: &str) -> Result<Account, EngineError> {
    let account = self
      .ledger
      .ensure_account(account_id, Utc::now())
      .await
      .map_err(EngineError::Storage)?;
    info!(account_id = %account_id, "Account ready");
    Ok(account)
  }

  /// Credit the settlement asset to an existing account.
  pub async fn deposit(
    &self,
    account_id: &str,
    amount: Decimal,
  ) -> Result<LedgerEntry, EngineError> {
    if amount <= Decimal::ZERO {
      return Err(EngineError::InvalidAmount(amount));
    }
    let entry = self
      .ledger
      .deposit(account_id, &self.settlement_asset, amount, Utc::now())
      .await
      .map_err(|e| match e {
        LedgerError::BalanceOverflow { .. } => EngineError::InvalidAmount(amount),
        other => other.into(),
      })?;
    info!(
      account_id = %account_id,
      amount = %amount,
      balance_after = %entry.balance_after,
      "Deposit credited"
    );
    Ok(entry)
  }

  /// Block or unblock new placements. Open positions still settle.
  pub async fn set_blocked(&self, account_id: &str, blocked: bool) -> Result<Account, EngineError> {
    let account = self.ledger.set_blocked(account_id, blocked).await?;
    info!(account_id = %account_id, blocked, "Account block flag updated");
    Ok(account)
  }

  pub async fn account(&self, account_id: &str) -> Result<Account, EngineError> {
    self
      .ledger
      .account(account_id)
      .await
      .map_err(EngineError::Storage)?
      .ok_or_else(|| EngineError::AccountNotFound(account_id.to_string()))
  }

  /// Settlement-asset balance of an account.
  pub async fn balance(&self, account_id: &str) -> Result<Decimal, EngineError> {
    Ok(self.account(account_id).await?.balance(&self.settlement_asset))
  }
}
