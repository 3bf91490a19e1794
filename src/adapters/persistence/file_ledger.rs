//! File Ledger - Durable Adapter for the PositionLedger Port
//!
//! Combines `StateStore` (atomic JSON snapshots) and `JournalLogger`
//! (JSONL balance journal) behind the `PositionLedger` trait.
//!
//! Each mutation runs against a clone of the book. The snapshot write is
//! the commit point: the in-memory book is swapped only after it succeeds,
//! so a failed write leaves both balance and status unchanged.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::book::LedgerBook;
use super::journal::JournalLogger;
use super::state::StateStore;
use crate::domain::{Account, LedgerEntry, Position, PositionId};
use crate::ports::ledger::{CloseOutcome, LedgerError, PositionClose, PositionLedger};

/// What a book mutation produced.
struct Applied<T> {
    value: T,
    /// Whether the book changed and must be persisted.
    dirty: bool,
    entry: Option<LedgerEntry>,
}

/// Snapshot-plus-journal ledger on the local filesystem.
pub struct FileLedger {
    book: Mutex<LedgerBook>,
    store: StateStore,
    journal: JournalLogger,
}

impl FileLedger {
    /// Open (or initialise) a ledger in `data_dir`, reloading any snapshot.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let store = StateStore::new(data_dir).await?;
        let journal = JournalLogger::new(data_dir).await?;
        let book = store.load().await?.unwrap_or_default();

        info!(
            data_dir = %data_dir.display(),
            positions = book.position_count(),
            "File ledger opened"
        );

        Ok(Self {
            book: Mutex::new(book),
            store,
            journal,
        })
    }

    async fn mutate<T, F>(&self, apply: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerBook) -> Result<Applied<T>, LedgerError>,
    {
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let applied = apply(&mut next)?;

        if applied.dirty {
            self.store.save(&next).await?;
            *book = next;
        }

        // The snapshot is authoritative; a journal failure is reported, not rolled back.
        if let Some(entry) = &applied.entry {
            if let Err(e) = self.journal.append(entry).await {
                error!(
                    error = %e,
                    account_id = %entry.account_id,
                    kind = ?entry.kind,
                    "Failed to append journal entry"
                );
            }
        }

        Ok(applied.value)
    }
}

#[async_trait]
impl PositionLedger for FileLedger {
    async fn account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.book.lock().await.account(id).cloned())
    }

    async fn ensure_account(&self, id: &str, at: DateTime<Utc>) -> Result<Account> {
        let account = self
            .mutate(|book| {
                let (account, created) = book.ensure_account(id, at);
                Ok(Applied {
                    value: account,
                    dirty: created,
                    entry: None,
                })
            })
            .await?;
        Ok(account)
    }

    async fn deposit(
        &self,
        account_id: &str,
        asset: &str,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.mutate(|book| {
            let entry = book.deposit(account_id, asset, amount, at)?;
            Ok(Applied {
                value: entry.clone(),
                dirty: true,
                entry: Some(entry),
            })
        })
        .await
    }

    async fn set_blocked(&self, account_id: &str, blocked: bool) -> Result<Account, LedgerError> {
        self.mutate(|book| {
            let account = book.set_blocked(account_id, blocked)?;
            Ok(Applied {
                value: account,
                dirty: true,
                entry: None,
            })
        })
        .await
    }

    async fn open_position(
        &self,
        position: &Position,
        asset: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.mutate(|book| {
            let entry = book.open(position, asset)?;
            Ok(Applied {
                value: entry.clone(),
                dirty: true,
                entry: Some(entry),
            })
        })
        .await
    }

    async fn close_position(
        &self,
        id: PositionId,
        close: PositionClose,
    ) -> Result<CloseOutcome, LedgerError> {
        self.mutate(|book| {
            let outcome = book.close(id, close)?;
            let entry = match &outcome {
                CloseOutcome::Applied { entry, .. } => Some(entry.clone()),
                CloseOutcome::AlreadyClosed(_) => None,
            };
            Ok(Applied {
                dirty: entry.is_some(),
                value: outcome,
                entry,
            })
        })
        .await
    }

    async fn position(&self, id: PositionId) -> Result<Option<Position>> {
        Ok(self.book.lock().await.position(id).cloned())
    }

    async fn positions_for(&self, owner: &str) -> Result<Vec<Position>> {
        Ok(self.book.lock().await.positions_for(owner))
    }

    async fn due_positions(&self, now: DateTime<Utc>) -> Result<Vec<Position>> {
        Ok(self.book.lock().await.due(now))
    }

    async fn entries_for(&self, position_id: PositionId) -> Result<Vec<LedgerEntry>> {
        self.journal.entries_for(position_id).await
    }

    async fn is_healthy(&self) -> bool {
        self.store.is_healthy().await && self.journal.is_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::placement_terms;
    use crate::domain::{Direction, EntryKind, PositionStatus};
    use rust_decimal_macros::dec;

    fn scratch_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("timed-ledger-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_file_ledger_survives_reopen() {
        let dir = scratch_dir();
        let now = Utc::now();
        let terms = placement_terms(dec!(100), 60).unwrap();
        let position = Position::open(
            "bob".to_string(),
            "ETH".to_string(),
            Direction::Short,
            dec!(100),
            1,
            dec!(3000),
            &terms,
            now,
        );

        {
            let ledger = FileLedger::open(&dir).await.unwrap();
            ledger.ensure_account("bob", now).await.unwrap();
            ledger.deposit("bob", "USDT", dec!(500), now).await.unwrap();
            ledger.open_position(&position, "USDT").await.unwrap();
        }

        let reopened = FileLedger::open(&dir).await.unwrap();
        let stored = reopened.position(position.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Active);
        let account = reopened.account("bob").await.unwrap().unwrap();
        assert_eq!(account.balance("USDT"), dec!(398));

        let entries = reopened.entries_for(position.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Debit);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_rejected_open_persists_nothing() {
        let dir = scratch_dir();
        let now = Utc::now();
        let ledger = FileLedger::open(&dir).await.unwrap();
        ledger.ensure_account("carol", now).await.unwrap();

        let terms = placement_terms(dec!(100), 30).unwrap();
        let position = Position::open(
            "carol".to_string(),
            "BTC".to_string(),
            Direction::Long,
            dec!(100),
            1,
            dec!(50000),
            &terms,
            now,
        );

        let err = ledger.open_position(&position, "USDT").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert!(ledger.position(position.id).await.unwrap().is_none());
        assert!(ledger.is_healthy().await);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
