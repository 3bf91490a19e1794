//! Engine rejection taxonomy.
//!
//! Every variant carries a stable machine-readable `code()` so the API
//! layer can surface the reason without string-matching messages.

use rust_decimal::Decimal;
use thiserror::Error;

use super::position::PositionStatus;

/// Reasons an engine operation can be rejected.
///
/// Every rejection is raised before any mutation happens, so a caller
/// receiving one of these can assume balances and positions are untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("instrument {0} is not tracked")]
    UnknownInstrument(String),

    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    #[error("stake must be positive, got {0}")]
    InvalidStake(Decimal),

    #[error("duration {0}s is not offered")]
    InvalidDuration(u32),

    #[error("stake {stake} outside [{min}, {max}] for {duration_secs}s positions")]
    StakeOutOfRange {
        stake: Decimal,
        min: Decimal,
        max: Decimal,
        duration_secs: u32,
    },

    #[error("leverage {0} is not allowed, only 1x positions are offered")]
    LeverageNotAllowed(u32),

    #[error("entry price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("account {0} is blocked")]
    AccountBlocked(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("no usable price for {0}")]
    PriceUnavailable(String),

    #[error("position {0} not found")]
    PositionNotFound(String),

    #[error("position is already {0}")]
    PositionNotActive(PositionStatus),

    #[error("only {remaining_secs}s left, cancellation needs at least {min_secs}s")]
    CancelWindowClosed { remaining_secs: i64, min_secs: i64 },

    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl EngineError {
    /// Stable reason code for API responses and metric labels.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::UnknownInstrument(_) => "unknown_instrument",
            Self::InvalidDirection(_) => "invalid_direction",
            Self::InvalidStake(_) => "invalid_stake",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::StakeOutOfRange { .. } => "stake_out_of_range",
            Self::LeverageNotAllowed(_) => "leverage_not_allowed",
            Self::InvalidPrice(_) => "invalid_price",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountBlocked(_) => "account_blocked",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::PriceUnavailable(_) => "price_unavailable",
            Self::PositionNotFound(_) => "position_not_found",
            Self::PositionNotActive(_) => "position_not_active",
            Self::CancelWindowClosed { .. } => "cancel_window_closed",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether this is a caller-side rejection rather than an engine fault.
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
