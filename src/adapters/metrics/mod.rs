//! Metrics and Monitoring Adapters
//!
//! Prometheus registry for engine counters plus the axum server exposing
//! `/live`, `/ready`, `/status` and `/metrics`.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::EngineMetrics;
