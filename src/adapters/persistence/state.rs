//! State Store - Atomic JSON Ledger Snapshots
//!
//! Saves the ledger book to `ledger.json` using atomic writes
//! (write to tmp file, then rename). The file is always either the
//! old or the new version, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, instrument};

use super::book::LedgerBook;

/// Atomic JSON snapshot store for the ledger book.
pub struct StateStore {
    /// Path to ledger.json.
    state_path: PathBuf,
    /// Temporary path for atomic writes.
    tmp_path: PathBuf,
}

impl StateStore {
    /// Create a new state store in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            state_path: data_dir.join("ledger.json"),
            tmp_path: data_dir.join("ledger.json.tmp"),
        })
    }

    /// Save a snapshot atomically (tmp → rename).
    #[instrument(skip(self, book))]
    pub async fn save(&self, book: &LedgerBook) -> Result<()> {
        let json = serde_json::to_vec_pretty(book).context("Failed to serialize ledger")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp ledger file")?;

        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename ledger file")?;

        debug!(
            path = %self.state_path.display(),
            positions = book.position_count(),
            "Ledger snapshot saved"
        );

        Ok(())
    }

    /// Load the most recent snapshot.
    ///
    /// Returns `None` if no snapshot exists (first startup).
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<LedgerBook>> {
        if !fs::try_exists(&self.state_path).await.unwrap_or(false) {
            info!("No ledger snapshot found, starting fresh");
            return Ok(None);
        }

        let json = fs::read(&self.state_path)
            .await
            .context("Failed to read ledger file")?;

        let book: LedgerBook =
            serde_json::from_slice(&json).context("Failed to parse ledger JSON")?;

        info!(
            version = book.version,
            positions = book.position_count(),
            "Ledger snapshot loaded"
        );

        Ok(Some(book))
    }

    /// Check that the data directory accepts writes.
    pub async fn is_healthy(&self) -> bool {
        let marker = self.tmp_path.with_extension("health");
        let ok = fs::write(&marker, b"ok").await.is_ok();
        let _ = fs::remove_file(&marker).await;
        ok
    }
}
