//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::domain::pricing::ALLOWED_DURATIONS;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    instruments = ?config.feed.instruments,
    sweep_interval_secs = config.settlement.sweep_interval_secs,
    backend = ?config.persistence.backend,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse, normalize and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let mut config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  normalize_config(&mut config);
  validate_config(&config)?;
  Ok(config)
}

/// Canonicalize values the rest of the engine compares exactly.
fn normalize_config(config: &mut AppConfig) {
  // Placement and the feed both match on upper-case names
  for instrument in &mut config.feed.instruments {
    *instrument = instrument.trim().to_ascii_uppercase();
  }
  config.feed.quote_asset = config.feed.quote_asset.trim().to_ascii_uppercase();
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  // Feed validation
  anyhow::ensure!(
    !config.feed.instruments.is_empty(),
    "At least one instrument must be tracked"
  );
  for instrument in &config.feed.instruments {
    anyhow::ensure!(
      !instrument.is_empty() && instrument.chars().all(|c| c.is_ascii_alphanumeric()),
      "Instrument {instrument:?} must be non-empty ASCII alphanumerics"
    );
  }
  anyhow::ensure!(
    !config.feed.ws_url.is_empty(),
    "WebSocket URL must not be empty"
  );
  anyhow::ensure!(
    !config.feed.quote_asset.is_empty(),
    "quote_asset must not be empty"
  );
  let mut seen = std::collections::HashSet::new();
  for instrument in &config.feed.instruments {
    anyhow::ensure!(
      seen.insert(instrument.as_str()),
      "Instrument {instrument:?} is listed twice"
    );
  }
  anyhow::ensure!(
    config.feed.retry_base_delay_ms > 0,
    "retry_base_delay_ms must be positive"
  );

  // Placement validation
  anyhow::ensure!(
    !config.positions.settlement_asset.is_empty(),
    "settlement_asset must not be empty"
  );
  anyhow::ensure!(
    config.positions.min_cancel_remaining_secs >= 0,
    "min_cancel_remaining_secs must not be negative, got {}",
    config.positions.min_cancel_remaining_secs
  );
  anyhow::ensure!(
    config.positions.max_entry_deviation_pct > rust_decimal::Decimal::ZERO,
    "max_entry_deviation_pct must be positive, got {}",
    config.positions.max_entry_deviation_pct
  );
  for limit in &config.positions.stake_limits {
    anyhow::ensure!(
      ALLOWED_DURATIONS.contains(&limit.duration_secs),
      "Stake limit for unsupported duration {}s",
      limit.duration_secs
    );
    anyhow::ensure!(
      limit.min_stake > rust_decimal::Decimal::ZERO && limit.min_stake <= limit.max_stake,
      "Stake band for {}s must satisfy 0 < min <= max, got [{}, {}]",
      limit.duration_secs,
      limit.min_stake,
      limit.max_stake
    );
  }
  for duration in ALLOWED_DURATIONS {
    anyhow::ensure!(
      config.positions.stake_limit(duration).is_some(),
      "Missing stake limit for {duration}s positions"
    );
  }

  // Settlement validation
  anyhow::ensure!(
    config.settlement.sweep_interval_secs > 0,
    "sweep_interval_secs must be positive"
  );
  anyhow::ensure!(
    config.settlement.max_quote_age_secs > 0,
    "max_quote_age_secs must be positive"
  );

  Ok(())
}
