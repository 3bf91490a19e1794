//! In-memory ledger adapter.
//!
//! Same transition semantics as `FileLedger` without touching disk.
//! Used by tests and by `backend = "memory"` deployments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::book::LedgerBook;
use crate::domain::{Account, LedgerEntry, Position, PositionId};
use crate::ports::ledger::{CloseOutcome, LedgerError, PositionClose, PositionLedger};

#[derive(Default)]
struct Inner {
    book: LedgerBook,
    journal: Vec<LedgerEntry>,
}

/// Mutex-guarded ledger held entirely in memory.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every journal entry recorded so far.
    pub async fn journal(&self) -> Vec<LedgerEntry> {
        self.inner.lock().await.journal.clone()
    }
}

#[async_trait]
impl PositionLedger for MemoryLedger {
    async fn account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.inner.lock().await.book.account(id).cloned())
    }

    async fn ensure_account(&self, id: &str, at: DateTime<Utc>) -> Result<Account> {
        Ok(self.inner.lock().await.book.ensure_account(id, at).0)
    }

    async fn deposit(
        &self,
        account_id: &str,
        asset: &str,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.book.deposit(account_id, asset, amount, at)?;
        inner.journal.push(entry.clone());
        Ok(entry)
    }

    async fn set_blocked(&self, account_id: &str, blocked: bool) -> Result<Account, LedgerError> {
        self.inner.lock().await.book.set_blocked(account_id, blocked)
    }

    async fn open_position(
        &self,
        position: &Position,
        asset: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.book.open(position, asset)?;
        inner.journal.push(entry.clone());
        Ok(entry)
    }

    async fn close_position(
        &self,
        id: PositionId,
        close: PositionClose,
    ) -> Result<CloseOutcome, LedgerError> {
        let mut inner = self.inner.lock().await;
        let outcome = inner.book.close(id, close)?;
        if let CloseOutcome::Applied { entry, .. } = &outcome {
            inner.journal.push(entry.clone());
        }
        Ok(outcome)
    }

    async fn position(&self, id: PositionId) -> Result<Option<Position>> {
        Ok(self.inner.lock().await.book.position(id).cloned())
    }

    async fn positions_for(&self, owner: &str) -> Result<Vec<Position>> {
        Ok(self.inner.lock().await.book.positions_for(owner))
    }

    async fn due_positions(&self, now: DateTime<Utc>) -> Result<Vec<Position>> {
        Ok(self.inner.lock().await.book.due(now))
    }

    async fn entries_for(&self, position_id: PositionId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .inner
            .lock()
            .await
            .journal
            .iter()
            .filter(|e| e.position_id == Some(position_id))
            .cloned()
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
