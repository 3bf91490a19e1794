//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: live ticker stream and the in-memory price cache
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: ledger snapshots and the JSONL balance journal

pub mod feeds;
pub mod metrics;
pub mod persistence;
