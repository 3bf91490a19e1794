//! Account balances, trade statistics and the balance journal record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::{AccountId, PositionId, TradeResult};

/// Running trade counters for an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub break_evens: u64,
    /// Sum of positive profits.
    pub total_profit: Decimal,
    /// Sum of absolute losses.
    pub total_loss: Decimal,
}

impl TradeStats {
    /// Fold one settled position into the counters.
    pub fn record(&mut self, profit: Decimal, result: TradeResult) {
        self.total_trades += 1;
        match result {
            TradeResult::Win => {
                self.wins += 1;
                self.total_profit = self.total_profit.saturating_add(profit);
            }
            TradeResult::Loss => {
                self.losses += 1;
                self.total_loss = self.total_loss.saturating_add(profit.abs());
            }
            TradeResult::BreakEven => self.break_evens += 1,
        }
    }

    /// Net realised profit across all settled positions.
    pub fn net(&self) -> Decimal {
        self.total_profit - self.total_loss
    }
}

/// An account as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Balance per asset symbol.
    pub balances: HashMap<String, Decimal>,
    /// Blocked accounts cannot open new positions.
    pub blocked: bool,
    pub stats: TradeStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            balances: HashMap::new(),
            blocked: false,
            stats: TradeStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance held in `asset`, zero if the asset was never credited.
    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Add `amount` to `asset` and return the new balance.
    ///
    /// `None` if the balance would overflow; the account is left untouched.
    pub fn credit(&mut self, asset: &str, amount: Decimal, now: DateTime<Utc>) -> Option<Decimal> {
        let updated = self.balance(asset).checked_add(amount)?;
        self.balances.insert(asset.to_string(), updated);
        self.updated_at = now;
        Some(updated)
    }

    /// Remove `amount` from `asset`.
    ///
    /// Fails with the available balance when funds are short; the
    /// account is left untouched in that case.
    pub fn debit(
        &mut self,
        asset: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, Decimal> {
        let available = self.balance(asset);
        if available < amount {
            return Err(available);
        }
        let remaining = available - amount;
        self.balances.insert(asset.to_string(), remaining);
        self.updated_at = now;
        Ok(remaining)
    }
}

/// Kind of balance movement recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Stake plus fee taken at placement.
    Debit,
    /// Settlement payout.
    Credit,
    /// Stake plus fee returned on cancellation.
    Refund,
    /// Out-of-band top-up by an operator.
    Deposit,
}

/// One balance movement, appended to the audit journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Absent for deposits.
    pub position_id: Option<PositionId>,
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub asset: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
}
