//! Settlement Use Case - Expiry Sweeps
//!
//! Finds active positions past their end time and settles each one
//! against the live quote. Items are independent: a failure on one is
//! reported in the sweep report and retried next sweep, never aborting
//! the rest.
//!
//! Settlement flow per position:
//! 1. Pick an exit price (fresh quote, or defer, or fall back to entry)
//! 2. Compute percent move, profit and payout (entry price on overflow)
//! 3. Conditionally close through the ledger (credit + status together)
//!
//! At most one sweep runs at a time. A trigger that arrives while one is
//! in flight is skipped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::EngineMetrics;
use crate::config::{PositionsConfig, SettlementConfig};
use crate::domain::pricing::settle_at;
use crate::domain::{Position, PositionId, PositionStatus, TradeResult};
use crate::ports::ledger::{CloseOutcome, PositionClose, PositionLedger};
use crate::ports::price_source::PriceSource;

/// What happened to one due position.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementStatus {
  /// Closed by this sweep.
  Settled {
    status: PositionStatus,
    result: TradeResult,
    exit_price: Decimal,
    profit: Decimal,
    payout: Decimal,
  },
  /// No usable exit price yet; retried next sweep.
  Deferred,
  /// Someone else closed it first.
  AlreadyTerminal(PositionStatus),
  /// Ledger failure; the position stays active and is retried.
  Failed { error: String },
}

/// Per-position entry of a sweep report.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementResult {
  pub position_id: PositionId,
  pub status: SettlementStatus,
}

/// Aggregated report from one sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
  pub results: Vec<SettlementResult>,
  pub settled: usize,
  pub deferred: usize,
  pub already_terminal: usize,
  pub failed: usize,
  /// Sum of payouts credited by this sweep.
  pub total_paid_out: Decimal,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

impl SweepReport {
  fn new(started_at: DateTime<Utc>) -> Self {
    Self {
      results: Vec::new(),
      settled: 0,
      deferred: 0,
      already_terminal: 0,
      failed: 0,
      total_paid_out: Decimal::ZERO,
      started_at,
      finished_at: started_at,
    }
  }

  fn push(&mut self, result: SettlementResult) {
    match &result.status {
      SettlementStatus::Settled { payout, .. } => {
        self.settled += 1;
        self.total_paid_out += *payout;
      }
      SettlementStatus::Deferred => self.deferred += 1,
      SettlementStatus::AlreadyTerminal(_) => self.already_terminal += 1,
      SettlementStatus::Failed { .. } => self.failed += 1,
    }
    self.results.push(result);
  }
}

/// Result of asking for a sweep.
#[derive(Debug, Clone)]
pub enum SweepOutcome {
  /// Another sweep was already running.
  Skipped,
  Completed(SweepReport),
  /// The due positions could not be listed; nothing was attempted.
  Failed(String),
}

/// Clears the in-flight flag when the sweep ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Periodic and on-demand expiry settlement.
pub struct SettlementProcessor<L: PositionLedger + ?Sized, P: PriceSource + ?Sized> {
  ledger: Arc<L>,
  prices: Arc<P>,
  metrics: Arc<EngineMetrics>,
  settlement_asset: String,
  sweep_interval: Duration,
  max_quote_age: chrono::Duration,
  in_flight: AtomicBool,
}

impl<L: PositionLedger + ?Sized, P: PriceSource + ?Sized> SettlementProcessor<L, P> {
  pub fn new(
    ledger: Arc<L>,
    prices: Arc<P>,
    metrics: Arc<EngineMetrics>,
    positions: &PositionsConfig,
    settlement: &SettlementConfig,
  ) -> Self {
    Self {
      ledger,
      prices,
      metrics,
      settlement_asset: positions.settlement_asset.clone(),
      sweep_interval: settlement.sweep_interval(),
      max_quote_age: settlement.max_quote_age(),
      in_flight: AtomicBool::new(false),
    }
  }

  /// Whether a sweep is currently running.
  pub fn is_sweeping(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  /// Run a sweep immediately.
  pub async fn sweep_now(&self) -> SweepOutcome {
    self.sweep_at(Utc::now()).await
  }

  /// Run a sweep treating `now` as the current time.
  #[instrument(skip(self))]
  pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepOutcome {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      self.metrics.sweeps_skipped.inc();
      debug!("Sweep already in flight, skipping");
      return SweepOutcome::Skipped;
    }
    let _guard = InFlight(&self.in_flight);
    let timer = self.metrics.sweep_duration_seconds.start_timer();

    let due = match self.ledger.due_positions(now).await {
      Ok(due) => due,
      Err(e) => {
        error!(error = %e, "Failed to list due positions");
        self.metrics.settlement_failures.inc();
        timer.observe_duration();
        return SweepOutcome::Failed(e.to_string());
      }
    };

    let mut report = SweepReport::new(now);
    for position in due {
      let result = self.settle_one(&position, now).await;
      report.push(result);
    }

    report.finished_at = Utc::now();
    timer.observe_duration();

    if report.results.is_empty() {
      debug!("Sweep found nothing due");
    } else {
      info!(
        settled = report.settled,
        deferred = report.deferred,
        already_terminal = report.already_terminal,
        failed = report.failed,
        total_paid_out = %report.total_paid_out,
        "Settlement sweep complete"
      );
    }

    SweepOutcome::Completed(report)
  }

  /// Settle a single due position.
  async fn settle_one(&self, position: &Position, now: DateTime<Utc>) -> SettlementResult {
    let fresh_quote = self
      .prices
      .get_price(&position.instrument)
      .filter(|q| q.price > Decimal::ZERO && q.is_fresh(now, self.max_quote_age));

    let (exit_price, status) = match fresh_quote {
      Some(quote) => (quote.price, PositionStatus::Completed),
      None if now - position.end_time < self.interval_chrono() => {
        debug!(
          position_id = %position.id,
          instrument = %position.instrument,
          "No fresh quote, deferring settlement"
        );
        return SettlementResult {
          position_id: position.id,
          status: SettlementStatus::Deferred,
        };
      }
      None => {
        warn!(
          position_id = %position.id,
          instrument = %position.instrument,
          overdue_secs = (now - position.end_time).num_seconds(),
          "No fresh quote after a full interval, expiring at entry price"
        );
        (position.entry_price, PositionStatus::Expired)
      }
    };

    let (exit_price, status, amounts) = match settle_at(position, exit_price) {
      Some(amounts) => (exit_price, status, amounts),
      None => {
        warn!(
          position_id = %position.id,
          entry_price = %position.entry_price,
          exit_price = %exit_price,
          "Settlement arithmetic overflowed, expiring at entry price"
        );
        match settle_at(position, position.entry_price) {
          Some(amounts) => (position.entry_price, PositionStatus::Expired, amounts),
          None => {
            self.metrics.settlement_failures.inc();
            error!(position_id = %position.id, "Position cannot be priced");
            return SettlementResult {
              position_id: position.id,
              status: SettlementStatus::Failed {
                error: "settlement arithmetic overflowed".to_string(),
              },
            };
          }
        }
      }
    };

    let close = PositionClose::Settle {
      exit_price,
      amounts,
      status,
      asset: self.settlement_asset.clone(),
      at: now,
    };

    let status = match self.ledger.close_position(position.id, close).await {
      Ok(CloseOutcome::Applied { account, .. }) => {
        let result = amounts.result.to_string();
        self
          .metrics
          .positions_settled
          .with_label_values(&[position.instrument.as_str(), result.as_str()])
          .inc();
        info!(
          position_id = %position.id,
          account_id = %account.id,
          instrument = %position.instrument,
          entry_price = %position.entry_price,
          exit_price = %exit_price,
          profit = %amounts.profit,
          payout = %amounts.payout,
          result = %amounts.result,
          status = ?status,
          "Position settled"
        );
        SettlementStatus::Settled {
          status,
          result: amounts.result,
          exit_price,
          profit: amounts.profit,
          payout: amounts.payout,
        }
      }
      Ok(CloseOutcome::AlreadyClosed(current)) => {
        debug!(position_id = %position.id, status = ?current, "Position already closed");
        SettlementStatus::AlreadyTerminal(current)
      }
      Err(e) => {
        self.metrics.settlement_failures.inc();
        error!(position_id = %position.id, error = %e, "Settlement failed, will retry");
        SettlementStatus::Failed {
          error: e.to_string(),
        }
      }
    };

    SettlementResult {
      position_id: position.id,
      status,
    }
  }

  fn interval_chrono(&self) -> chrono::Duration {
    chrono::Duration::from_std(self.sweep_interval).unwrap_or(chrono::Duration::MAX)
  }
}

impl<L, P> SettlementProcessor<L, P>
where
  L: PositionLedger + ?Sized,
  P: PriceSource + ?Sized,
{
  /// Sweep on a fixed interval until shutdown.
  ///
  /// Each tick runs in its own task so a slow sweep never delays the
  /// timer; ticks that land mid-sweep are skipped. On shutdown the loop
  /// stops ticking and waits for the last sweep it started.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(self.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
      interval_secs = self.sweep_interval.as_secs(),
      "Settlement sweeper started"
    );

    let mut last: Option<JoinHandle<()>> = None;

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Settlement sweeper received shutdown signal");
          break;
        }
        _ = ticker.tick() => {
          if self.is_sweeping() {
            self.metrics.sweeps_skipped.inc();
            debug!("Tick landed mid-sweep, skipping");
            continue;
          }
          let processor = Arc::clone(&self);
          last = Some(tokio::spawn(async move {
            processor.sweep_now().await;
          }));
        }
      }
    }

    if let Some(handle) = last {
      if let Err(e) = handle.await {
        error!(error = %e, "In-flight sweep task failed");
      }
    }

    info!("Settlement sweeper stopped");
  }
}
