//! Balance Journal - Append-only JSONL Ledger Entries
//!
//! Persists every balance movement to daily JSONL files named
//! `journal/YYYY-MM-DD.jsonl`. Each line is a self-contained JSON
//! record, so the journal can be streamed, grepped and audited
//! independently of the snapshot.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};

use crate::domain::{LedgerEntry, PositionId};

/// Append-only JSONL journal with daily file rotation.
pub struct JournalLogger {
    /// Directory holding the daily files.
    journal_dir: PathBuf,
}

impl JournalLogger {
    /// Create a new journal in the given data directory.
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let journal_dir = data_dir.join("journal");

        fs::create_dir_all(&journal_dir)
            .await
            .context("Failed to create journal directory")?;

        Ok(Self { journal_dir })
    }

    /// Append an entry to the file for the entry's date.
    #[instrument(skip(self, entry), fields(account_id = %entry.account_id, kind = ?entry.kind))]
    pub async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let date = entry.timestamp.format("%Y-%m-%d").to_string();
        let path = self.journal_dir.join(format!("{date}.jsonl"));

        let mut json = serde_json::to_string(entry).context("Failed to serialize ledger entry")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open journal file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write ledger entry")?;

        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    /// Load every entry from every daily file, oldest first.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.journal_dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                let content = fs::read_to_string(&path).await?;
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LedgerEntry>(line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            warn!(
                                file = %path.display(),
                                error = %e,
                                "Skipping malformed journal line"
                            );
                        }
                    }
                }
            }
        }

        entries.sort_by_key(|e| e.timestamp);
        info!(count = entries.len(), "Loaded journal entries");
        Ok(entries)
    }

    /// Entries that belong to one position.
    pub async fn entries_for(&self, position_id: PositionId) -> Result<Vec<LedgerEntry>> {
        let all = self.load_all().await?;
        Ok(all
            .into_iter()
            .filter(|e| e.position_id == Some(position_id))
            .collect())
    }

    /// Check if the journal directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.journal_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}
