//! Timed position domain types.
//!
//! A position is a fixed-duration wager on an instrument's price
//! direction. It is created `Active` and leaves that state exactly once,
//! into one of the terminal statuses.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pricing::PlacementTerms;

/// Account identifier as handed over by the API layer.
pub type AccountId = String;

/// Position identifier.
pub type PositionId = Uuid;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Profits when the price rises.
    Long,
    /// Profits when the price falls.
    Short,
}

impl Direction {
    /// Parse the client-facing spellings (`buy`/`sell`, `long`/`short`, `up`/`down`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" | "up" => Some(Self::Long),
            "sell" | "short" | "down" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Open and waiting for expiry.
    Active,
    /// Settled against an observed exit price.
    Completed,
    /// Settled at entry price because no exit price could be observed.
    Expired,
    /// Refunded before expiry.
    Cancelled,
}

impl PositionStatus {
    /// Terminal statuses never change again.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome classification of a settled position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeResult {
    Win,
    Loss,
    BreakEven,
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
            Self::BreakEven => write!(f, "break_even"),
        }
    }
}

/// A single timed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub owner: AccountId,
    pub instrument: String,
    pub direction: Direction,
    pub stake: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub duration_secs: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub fee: Decimal,
    pub expected_return: Decimal,
    pub total_payout: Decimal,
    pub profit: Option<Decimal>,
    pub profit_percent: Option<Decimal>,
    pub status: PositionStatus,
    pub result: Option<TradeResult>,
    /// Free-form reason recorded on cancellation.
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Build a new active position starting at `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        owner: AccountId,
        instrument: String,
        direction: Direction,
        stake: Decimal,
        leverage: u32,
        entry_price: Decimal,
        terms: &PlacementTerms,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            instrument,
            direction,
            stake,
            leverage,
            entry_price,
            exit_price: None,
            duration_secs: terms.duration_secs,
            start_time: now,
            end_time: now + Duration::seconds(i64::from(terms.duration_secs)),
            fee: terms.fee,
            expected_return: terms.expected_return,
            total_payout: terms.total_payout,
            profit: None,
            profit_percent: None,
            status: PositionStatus::Active,
            result: None,
            cancel_reason: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Amount debited at placement, and refunded on cancellation.
    pub fn total_cost(&self) -> Decimal {
        self.stake + self.fee
    }

    /// Whether the expiry has been reached at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Whole seconds until expiry, clamped at zero.
    pub fn time_left_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }

    /// Elapsed share of the position's duration in percent, clamped to [0, 100].
    pub fn progress_pct(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.end_time - self.start_time).num_milliseconds();
        if total <= 0 {
            return 100.0;
        }
        let elapsed = (now - self.start_time).num_milliseconds();
        #[allow(clippy::cast_precision_loss)]
        let pct = elapsed as f64 / total as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }
}
