//! Position Lifecycle Use Case - Placement, Cancellation and Queries
//!
//! Validates placement requests, prices them from the quote cache and
//! hands the debit plus the new position to the ledger in one call.
//! Cancellation goes through the same conditional close the settlement
//! sweep uses, so a cancel racing an expiry can never pay out twice.
//!
//! Every `*_at` variant takes the clock explicitly; the plain methods
//! call it with `Utc::now()`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::EngineMetrics;
use crate::config::{PositionsConfig, SettlementConfig};
use crate::domain::pricing::{MIN_ENTRY_PRICE, placement_terms};
use crate::domain::{
  Direction, EngineError, Position, PositionId, PositionStatus, TradeResult,
};
use crate::ports::ledger::{CloseOutcome, PositionClose, PositionLedger};
use crate::ports::price_source::PriceSource;

/// Default page size for history queries.
const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page a caller may request.
const MAX_PAGE_SIZE: u32 = 100;

/// Placement request as received from the API layer.
///
/// Fields are optional so that a missing field is reported as such
/// rather than as a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceRequest {
  pub account_id: String,
  pub instrument: Option<String>,
  /// `buy`/`long`/`up` or `sell`/`short`/`down`.
  pub direction: Option<String>,
  pub stake: Option<Decimal>,
  pub duration_secs: Option<u32>,
  /// Defaults to 1; anything else is rejected.
  pub leverage: Option<u32>,
  /// Caller-supplied entry price; the cache quote is used when absent.
  /// Must be at least one tick and, when a fresh quote exists, within
  /// `max_entry_deviation_pct` of it.
  pub entry_price: Option<Decimal>,
}

/// Confirmation of an accepted cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelReceipt {
  pub position_id: PositionId,
  /// Stake plus fee, credited back in full.
  pub refunded: Decimal,
  pub cancelled_at: DateTime<Utc>,
}

/// An active position with its countdown.
#[derive(Debug, Clone, Serialize)]
pub struct ActivePositionView {
  #[serde(flatten)]
  pub position: Position,
  pub time_left_secs: i64,
  pub progress_pct: f64,
}

/// History filter; every criterion is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
  pub instrument: Option<String>,
  pub result: Option<TradeResult>,
  pub status: Option<PositionStatus>,
  /// 1-based page number.
  pub page: Option<u32>,
  pub page_size: Option<u32>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: u32,
  pub page_size: u32,
  /// Matches across all pages.
  pub total: usize,
}

/// Placement, cancellation and read access to positions.
pub struct PositionLifecycle<L: PositionLedger + ?Sized, P: PriceSource + ?Sized> {
  ledger: Arc<L>,
  prices: Arc<P>,
  metrics: Arc<EngineMetrics>,
  positions: PositionsConfig,
  max_quote_age: chrono::Duration,
}

impl<L: PositionLedger + ?Sized, P: PriceSource + ?Sized> PositionLifecycle<L, P> {
  pub fn new(
    ledger: Arc<L>,
    prices: Arc<P>,
    metrics: Arc<EngineMetrics>,
    positions: PositionsConfig,
    settlement: &SettlementConfig,
  ) -> Self {
    Self {
      ledger,
      prices,
      metrics,
      positions,
      max_quote_age: settlement.max_quote_age(),
    }
  }

  /// Open a position starting now.
  pub async fn place(&self, request: PlaceRequest) -> Result<Position, EngineError> {
    self.place_at(request, Utc::now()).await
  }

  /// Open a position starting at `now`.
  ///
  /// # Errors
  /// Returns the first failed validation; nothing is mutated in that case.
  #[instrument(skip(self, request), fields(account_id = %request.account_id))]
  pub async fn place_at(
    &self,
    request: PlaceRequest,
    now: DateTime<Utc>,
  ) -> Result<Position, EngineError> {
    match self.try_place(request, now).await {
      Ok(position) => {
        let direction = position.direction.to_string();
        self
          .metrics
          .positions_opened
          .with_label_values(&[position.instrument.as_str(), direction.as_str()])
          .inc();
        info!(
          position_id = %position.id,
          account_id = %position.owner,
          instrument = %position.instrument,
          direction = %position.direction,
          stake = %position.stake,
          duration_secs = position.duration_secs,
          entry_price = %position.entry_price,
          end_time = %position.end_time,
          "Position opened"
        );
        Ok(position)
      }
      Err(e) => {
        self
          .metrics
          .placements_rejected
          .with_label_values(&[e.code()])
          .inc();
        if e.is_rejection() {
          debug!(reason = e.code(), error = %e, "Placement rejected");
        } else {
          warn!(error = %e, "Placement failed");
        }
        Err(e)
      }
    }
  }

  async fn try_place(
    &self,
    request: PlaceRequest,
    now: DateTime<Utc>,
  ) -> Result<Position, EngineError> {
    // 1. Presence and basic shape
    let instrument = request
      .instrument
      .as_deref()
      .map(|i| i.trim().to_ascii_uppercase())
      .filter(|i| !i.is_empty())
      .ok_or(EngineError::MissingField("instrument"))?;
    let raw_direction = request
      .direction
      .as_deref()
      .ok_or(EngineError::MissingField("direction"))?;
    let stake = request.stake.ok_or(EngineError::MissingField("stake"))?;
    let duration_secs = request
      .duration_secs
      .ok_or(EngineError::MissingField("duration_secs"))?;

    if !self.prices.instruments().iter().any(|i| *i == instrument) {
      return Err(EngineError::UnknownInstrument(instrument));
    }
    let direction = Direction::parse(raw_direction)
      .ok_or_else(|| EngineError::InvalidDirection(raw_direction.to_string()))?;
    if stake <= Decimal::ZERO {
      return Err(EngineError::InvalidStake(stake));
    }

    // 2. Duration
    let terms = placement_terms(stake, duration_secs)?;

    // 3. Stake band
    let limit = self
      .positions
      .stake_limit(duration_secs)
      .ok_or(EngineError::InvalidDuration(duration_secs))?;
    if stake < limit.min_stake || stake > limit.max_stake {
      return Err(EngineError::StakeOutOfRange {
        stake,
        min: limit.min_stake,
        max: limit.max_stake,
        duration_secs,
      });
    }

    // 4. Leverage
    let leverage = request.leverage.unwrap_or(1);
    if leverage != 1 {
      return Err(EngineError::LeverageNotAllowed(leverage));
    }

    // 5. Account
    let account = self
      .ledger
      .account(&request.account_id)
      .await
      .map_err(EngineError::Storage)?
      .ok_or_else(|| EngineError::AccountNotFound(request.account_id.clone()))?;
    if account.blocked {
      return Err(EngineError::AccountBlocked(account.id));
    }

    // 6. Entry price
    let entry_price = self.resolve_entry_price(&instrument, request.entry_price, now)?;

    // 7. Debit and store; the balance check happens inside the ledger
    let position = Position::open(
      account.id,
      instrument,
      direction,
      stake,
      leverage,
      entry_price,
      &terms,
      now,
    );
    self
      .ledger
      .open_position(&position, &self.positions.settlement_asset)
      .await?;

    Ok(position)
  }

  fn resolve_entry_price(
    &self,
    instrument: &str,
    supplied: Option<Decimal>,
    now: DateTime<Utc>,
  ) -> Result<Decimal, EngineError> {
    let fresh = self
      .prices
      .get_price(instrument)
      .filter(|q| q.price > Decimal::ZERO && q.is_fresh(now, self.max_quote_age))
      .map(|q| q.price);

    let Some(price) = supplied else {
      return fresh.ok_or_else(|| EngineError::PriceUnavailable(instrument.to_string()));
    };

    if price < MIN_ENTRY_PRICE {
      return Err(EngineError::InvalidPrice(price));
    }
    if let Some(reference) = fresh {
      let deviation_pct = (price - reference)
        .abs()
        .checked_div(reference)
        .and_then(|d| d.checked_mul(dec!(100)));
      if deviation_pct.is_none_or(|pct| pct > self.positions.max_entry_deviation_pct) {
        debug!(
          instrument,
          supplied = %price,
          quote = %reference,
          "Supplied entry price too far from quote"
        );
        return Err(EngineError::InvalidPrice(price));
      }
    }
    Ok(price)
  }

  /// Cancel an active position now.
  pub async fn cancel(
    &self,
    position_id: PositionId,
    account_id: &str,
    reason: Option<String>,
  ) -> Result<CancelReceipt, EngineError> {
    self.cancel_at(position_id, account_id, reason, Utc::now()).await
  }

  /// Cancel an active position at `now`, refunding stake plus fee.
  #[instrument(skip(self, reason))]
  pub async fn cancel_at(
    &self,
    position_id: PositionId,
    account_id: &str,
    reason: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<CancelReceipt, EngineError> {
    let position = self.owned_position(account_id, position_id).await?;

    if position.status != PositionStatus::Active {
      return Err(EngineError::PositionNotActive(position.status));
    }

    let remaining_secs = position.time_left_secs(now);
    if remaining_secs < self.positions.min_cancel_remaining_secs {
      return Err(EngineError::CancelWindowClosed {
        remaining_secs,
        min_secs: self.positions.min_cancel_remaining_secs,
      });
    }

    let close = PositionClose::Cancel {
      reason,
      asset: self.positions.settlement_asset.clone(),
      at: now,
    };

    match self.ledger.close_position(position_id, close).await? {
      CloseOutcome::Applied { position, entry, .. } => {
        self
          .metrics
          .positions_cancelled
          .with_label_values(&[position.instrument.as_str()])
          .inc();
        info!(
          position_id = %position_id,
          account_id = %account_id,
          refunded = %entry.amount,
          remaining_secs,
          "Position cancelled"
        );
        Ok(CancelReceipt {
          position_id,
          refunded: entry.amount,
          cancelled_at: now,
        })
      }
      CloseOutcome::AlreadyClosed(status) => {
        debug!(position_id = %position_id, status = ?status, "Cancel lost race to close");
        Err(EngineError::PositionNotActive(status))
      }
    }
  }

  /// Active positions of an account, soonest expiry first.
  pub async fn active_positions(
    &self,
    account_id: &str,
  ) -> Result<Vec<ActivePositionView>, EngineError> {
    self.active_positions_at(account_id, Utc::now()).await
  }

  pub async fn active_positions_at(
    &self,
    account_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Vec<ActivePositionView>, EngineError> {
    let mut active: Vec<Position> = self
      .ledger
      .positions_for(account_id)
      .await
      .map_err(EngineError::Storage)?
      .into_iter()
      .filter(|p| p.status == PositionStatus::Active)
      .collect();
    active.sort_by_key(|p| p.end_time);

    Ok(
      active
        .into_iter()
        .map(|position| ActivePositionView {
          time_left_secs: position.time_left_secs(now),
          progress_pct: position.progress_pct(now),
          position,
        })
        .collect(),
    )
  }

  /// Terminal positions of an account, newest first, filtered and paged.
  pub async fn completed_positions(
    &self,
    account_id: &str,
    filter: &HistoryFilter,
  ) -> Result<Page<Position>, EngineError> {
    let instrument = filter
      .instrument
      .as_deref()
      .map(|i| i.trim().to_ascii_uppercase());

    let mut matches: Vec<Position> = self
      .ledger
      .positions_for(account_id)
      .await
      .map_err(EngineError::Storage)?
      .into_iter()
      .filter(|p| p.status.is_terminal())
      .filter(|p| instrument.as_ref().is_none_or(|i| p.instrument == *i))
      .filter(|p| filter.result.is_none_or(|r| p.result == Some(r)))
      .filter(|p| filter.status.is_none_or(|s| p.status == s))
      .collect();

    matches.sort_by(|a, b| {
      b.completed_at
        .cmp(&a.completed_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
    });

    let page = filter.page.unwrap_or(1).max(1);
    let page_size = filter
      .page_size
      .unwrap_or(DEFAULT_PAGE_SIZE)
      .clamp(1, MAX_PAGE_SIZE);
    let total = matches.len();
    let skip = (page as usize - 1).saturating_mul(page_size as usize);

    Ok(Page {
      items: matches
        .into_iter()
        .skip(skip)
        .take(page_size as usize)
        .collect(),
      page,
      page_size,
      total,
    })
  }

  /// A single position, visible only to its owner.
  pub async fn position(
    &self,
    account_id: &str,
    position_id: PositionId,
  ) -> Result<Position, EngineError> {
    self.owned_position(account_id, position_id).await
  }

  async fn owned_position(
    &self,
    account_id: &str,
    position_id: PositionId,
  ) -> Result<Position, EngineError> {
    self
      .ledger
      .position(position_id)
      .await
      .map_err(EngineError::Storage)?
      .filter(|p| p.owner == account_id)
      .ok_or_else(|| EngineError::PositionNotFound(position_id.to_string()))
  }
}
