//! Persistence Adapters - Ledger Storage
//!
//! Implements the PositionLedger port twice over one shared
//! `LedgerBook`: purely in memory, and on disk as atomic JSON
//! snapshots plus an append-only JSONL balance journal.
//! No database dependency; a snapshot reload recovers after a crash.

pub mod book;
pub mod file_ledger;
pub mod journal;
pub mod memory;
pub mod state;

pub use book::LedgerBook;
pub use file_ledger::FileLedger;
pub use journal::JournalLogger;
pub use memory::MemoryLedger;
pub use state::StateStore;
