//! Ledger Book - In-memory Accounts and Positions
//!
//! The state both ledger adapters share. Every mutation validates first
//! and only then writes, so a rejected call leaves the book exactly as it
//! was. Callers that need all-or-nothing persistence run mutations on a
//! clone and swap it in after the write succeeds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Account, AccountId, EntryKind, LedgerEntry, Position, PositionId, PositionStatus,
};
use crate::ports::ledger::{CloseOutcome, LedgerError, PositionClose};

/// Current snapshot format.
pub const BOOK_VERSION: u32 = 1;

/// Accounts and positions, serialisable as one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBook {
    pub version: u32,
    accounts: HashMap<AccountId, Account>,
    positions: HashMap<PositionId, Position>,
}

impl Default for LedgerBook {
    fn default() -> Self {
        Self {
            version: BOOK_VERSION,
            accounts: HashMap::new(),
            positions: HashMap::new(),
        }
    }
}

impl LedgerBook {
    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// Returns the account and whether it had to be created.
    pub fn ensure_account(&mut self, id: &str, at: DateTime<Utc>) -> (Account, bool) {
        if let Some(existing) = self.accounts.get(id) {
            return (existing.clone(), false);
        }
        let account = Account::new(id, at);
        self.accounts.insert(id.to_string(), account.clone());
        (account, true)
    }

    pub fn deposit(
        &mut self,
        account_id: &str,
        asset: &str,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let balance_after = account
            .credit(asset, amount, at)
            .ok_or_else(|| overflow(account_id, asset))?;

        Ok(LedgerEntry {
            position_id: None,
            account_id: account_id.to_string(),
            kind: EntryKind::Deposit,
            asset: asset.to_string(),
            amount,
            balance_after,
            timestamp: at,
        })
    }

    pub fn set_blocked(&mut self, account_id: &str, blocked: bool) -> Result<Account, LedgerError> {
        let account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        account.blocked = blocked;
        Ok(account.clone())
    }

    /// Debit the position's total cost and store it.
    ///
    /// The blocked flag is checked here, under the same lock as the debit,
    /// so a concurrent block cannot slip a placement through.
    pub fn open(&mut self, position: &Position, asset: &str) -> Result<LedgerEntry, LedgerError> {
        if self.positions.contains_key(&position.id) {
            return Err(LedgerError::DuplicatePosition(position.id));
        }

        let account = self
            .accounts
            .get_mut(&position.owner)
            .ok_or_else(|| LedgerError::AccountNotFound(position.owner.clone()))?;
        if account.blocked {
            return Err(LedgerError::AccountBlocked(account.id.clone()));
        }

        let required = position.total_cost();
        let balance_after = account
            .debit(asset, required, position.created_at)
            .map_err(|available| LedgerError::InsufficientBalance {
                required,
                available,
            })?;

        self.positions.insert(position.id, position.clone());

        Ok(LedgerEntry {
            position_id: Some(position.id),
            account_id: position.owner.clone(),
            kind: EntryKind::Debit,
            asset: asset.to_string(),
            amount: required,
            balance_after,
            timestamp: position.created_at,
        })
    }

    /// Conditional close: applies only while the position is still active.
    pub fn close(&mut self, id: PositionId, close: PositionClose) -> Result<CloseOutcome, LedgerError> {
        let current = self
            .positions
            .get(&id)
            .ok_or(LedgerError::PositionNotFound(id))?;

        if current.status.is_terminal() {
            return Ok(CloseOutcome::AlreadyClosed(current.status));
        }

        let mut position = current.clone();
        let mut account = self
            .accounts
            .get(&position.owner)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(position.owner.clone()))?;

        let entry = match close {
            PositionClose::Settle {
                exit_price,
                amounts,
                status,
                asset,
                at,
            } => {
                position.exit_price = Some(exit_price);
                position.profit = Some(amounts.profit);
                position.profit_percent = Some(amounts.percent);
                position.result = Some(amounts.result);
                position.status = status;
                position.completed_at = Some(at);

                let balance_after = account
                    .credit(&asset, amounts.payout, at)
                    .ok_or_else(|| overflow(&account.id, &asset))?;
                account.stats.record(amounts.profit, amounts.result);

                LedgerEntry {
                    position_id: Some(id),
                    account_id: account.id.clone(),
                    kind: EntryKind::Credit,
                    asset,
                    amount: amounts.payout,
                    balance_after,
                    timestamp: at,
                }
            }
            PositionClose::Cancel { reason, asset, at } => {
                let refund = position.total_cost();
                position.status = PositionStatus::Cancelled;
                position.cancel_reason = reason;
                position.completed_at = Some(at);

                let balance_after = account
                    .credit(&asset, refund, at)
                    .ok_or_else(|| overflow(&account.id, &asset))?;

                LedgerEntry {
                    position_id: Some(id),
                    account_id: account.id.clone(),
                    kind: EntryKind::Refund,
                    asset,
                    amount: refund,
                    balance_after,
                    timestamp: at,
                }
            }
        };

        self.positions.insert(id, position.clone());
        self.accounts.insert(account.id.clone(), account.clone());

        Ok(CloseOutcome::Applied {
            position,
            account,
            entry,
        })
    }

    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn positions_for(&self, owner: &str) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect()
    }

    /// Active positions due at `now`, earliest expiry first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Position> {
        let mut due: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Active && p.is_expired_at(now))
            .cloned()
            .collect();
        due.sort_by_key(|p| p.end_time);
        due
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

fn overflow(account_id: &str, asset: &str) -> LedgerError {
    LedgerError::BalanceOverflow {
        account_id: account_id.to_string(),
        asset: asset.to_string(),
    }
}
