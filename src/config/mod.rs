//! Configuration Module - TOML-based Engine Configuration
//!
//! Loads and validates configuration from `config.toml`. Every section
//! has defaults, so a minimal file only needs what differs from them.
//! Feed endpoints, stake bands and sweep timing are externalized here;
//! the placement rates and fee stay fixed in the domain layer.

pub mod loader;

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Engine identity and logging.
  pub engine: EngineConfig,
  /// Upstream ticker feed.
  pub feed: FeedConfig,
  /// Placement rules.
  pub positions: PositionsConfig,
  /// Settlement sweep timing and price freshness.
  pub settlement: SettlementConfig,
  /// Ledger storage.
  pub persistence: PersistenceConfig,
  /// Health/status/metrics server.
  pub health: HealthConfig,
}

/// Engine identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Human-readable instance name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
    }
  }
}

/// Ticker feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
  /// WebSocket base URL; streams are appended as `/ws/<a>/<b>`.
  #[serde(default = "default_ws_url")]
  pub ws_url: String,
  /// REST base URL used to warm the cache at startup.
  #[serde(default = "default_rest_url")]
  pub rest_url: String,
  /// Engine instrument names (e.g. "BTC"), upper-cased on load.
  #[serde(default = "default_instruments")]
  pub instruments: Vec<String>,
  /// Quote asset appended to instruments to form venue symbols.
  #[serde(default = "default_quote_asset")]
  pub quote_asset: String,
  /// Base reconnect delay; attempt `n` waits `n × base`.
  #[serde(default = "default_retry_base_delay_ms")]
  pub retry_base_delay_ms: u64,
  /// Consecutive failures tolerated before the feed is marked degraded.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// REST request timeout.
  #[serde(default = "default_rest_timeout_ms")]
  pub rest_timeout_ms: u64,
}

impl FeedConfig {
  pub const fn retry_base_delay(&self) -> Duration {
    Duration::from_millis(self.retry_base_delay_ms)
  }

  pub const fn rest_timeout(&self) -> Duration {
    Duration::from_millis(self.rest_timeout_ms)
  }
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      ws_url: default_ws_url(),
      rest_url: default_rest_url(),
      instruments: default_instruments(),
      quote_asset: default_quote_asset(),
      retry_base_delay_ms: default_retry_base_delay_ms(),
      max_retries: default_max_retries(),
      rest_timeout_ms: default_rest_timeout_ms(),
    }
  }
}

/// Stake band for one duration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StakeLimit {
  pub duration_secs: u32,
  pub min_stake: Decimal,
  pub max_stake: Decimal,
}

/// Placement rules.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsConfig {
  /// Asset debited on placement and credited on settlement.
  #[serde(default = "default_settlement_asset")]
  pub settlement_asset: String,
  /// Minimum time left for a cancellation to be accepted.
  #[serde(default = "default_min_cancel_remaining_secs")]
  pub min_cancel_remaining_secs: i64,
  /// Per-duration stake bands.
  #[serde(default = "default_stake_limits")]
  pub stake_limits: Vec<StakeLimit>,
  /// How far (percent) a caller-supplied entry price may sit from a fresh quote.
  #[serde(default = "default_max_entry_deviation_pct")]
  pub max_entry_deviation_pct: Decimal,
}

impl PositionsConfig {
  /// Stake band configured for `duration_secs`.
  pub fn stake_limit(&self, duration_secs: u32) -> Option<&StakeLimit> {
    self
      .stake_limits
      .iter()
      .find(|l| l.duration_secs == duration_secs)
  }
}

impl Default for PositionsConfig {
  fn default() -> Self {
    Self {
      settlement_asset: default_settlement_asset(),
      min_cancel_remaining_secs: default_min_cancel_remaining_secs(),
      stake_limits: default_stake_limits(),
      max_entry_deviation_pct: default_max_entry_deviation_pct(),
    }
  }
}

/// Settlement sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
  /// Interval between timer-driven sweeps.
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  /// Quotes older than this are not used for entry or exit pricing.
  #[serde(default = "default_max_quote_age_secs")]
  pub max_quote_age_secs: i64,
}

impl SettlementConfig {
  pub const fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }

  pub fn max_quote_age(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.max_quote_age_secs)
  }
}

impl Default for SettlementConfig {
  fn default() -> Self {
    Self {
      sweep_interval_secs: default_sweep_interval_secs(),
      max_quote_age_secs: default_max_quote_age_secs(),
    }
  }
}

/// Ledger storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
  /// JSON snapshot plus JSONL journal under `data_dir`.
  File,
  /// Process memory only; state is lost on restart.
  Memory,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  #[serde(default = "default_backend")]
  pub backend: LedgerBackend,
  /// Directory for the ledger snapshot and journal.
  #[serde(default = "default_data_dir")]
  pub data_dir: PathBuf,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      backend: default_backend(),
      data_dir: default_data_dir(),
    }
  }
}

/// Health server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
  /// Bind address for `/live`, `/ready`, `/status` and `/metrics`.
  #[serde(default = "default_bind_address")]
  pub bind_address: String,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      bind_address: default_bind_address(),
    }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "timed-position-engine".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_ws_url() -> String {
  "wss://stream.binance.com:9443".to_string()
}

fn default_rest_url() -> String {
  "https://api.binance.com".to_string()
}

fn default_instruments() -> Vec<String> {
  vec!["BTC".to_string(), "ETH".to_string()]
}

fn default_quote_asset() -> String {
  "USDT".to_string()
}

fn default_retry_base_delay_ms() -> u64 {
  5_000
}

fn default_max_retries() -> u32 {
  10
}

fn default_rest_timeout_ms() -> u64 {
  10_000
}

fn default_settlement_asset() -> String {
  "USDT".to_string()
}

fn default_min_cancel_remaining_secs() -> i64 {
  5
}

fn default_stake_limits() -> Vec<StakeLimit> {
  [
    (30, dec!(10), dec!(5000)),
    (50, dec!(10), dec!(10000)),
    (60, dec!(10), dec!(20000)),
    (120, dec!(10), dec!(50000)),
  ]
  .into_iter()
  .map(|(duration_secs, min_stake, max_stake)| StakeLimit {
    duration_secs,
    min_stake,
    max_stake,
  })
  .collect()
}

fn default_max_entry_deviation_pct() -> Decimal {
  dec!(5)
}

fn default_sweep_interval_secs() -> u64 {
  10
}

fn default_max_quote_age_secs() -> i64 {
  30
}

fn default_backend() -> LedgerBackend {
  LedgerBackend::File
}

fn default_data_dir() -> PathBuf {
  PathBuf::from("data")
}

fn default_bind_address() -> String {
  "0.0.0.0:9090".to_string()
}
