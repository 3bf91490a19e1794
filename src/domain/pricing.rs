//! Placement and settlement arithmetic.
//!
//! All money math runs on `Decimal` so the placement identities hold
//! exactly: `fee == stake * 0.02` and
//! `total_payout == stake + expected_return - fee`.
//!
//! Every operation is checked; `Decimal` operators panic on overflow.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::error::EngineError;
use super::position::{Direction, Position, TradeResult};

/// Durations (seconds) a position can be opened for.
pub const ALLOWED_DURATIONS: [u32; 4] = [30, 50, 60, 120];

/// Placement fee as a fraction of stake.
pub const FEE_RATE: Decimal = dec!(0.02);

/// Decimal places kept on settled profit.
const PROFIT_DP: u32 = 8;

/// Smallest entry price a caller may supply.
pub const MIN_ENTRY_PRICE: Decimal = dec!(0.00000001);

/// Expected-return rate in percent for a duration, `None` if not offered.
pub fn duration_rate(duration_secs: u32) -> Option<Decimal> {
    match duration_secs {
        30 => Some(dec!(12)),
        50 => Some(dec!(13)),
        60 => Some(dec!(14)),
        120 => Some(dec!(15)),
        _ => None,
    }
}

/// Amounts fixed at placement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementTerms {
    pub duration_secs: u32,
    pub fee: Decimal,
    pub expected_return: Decimal,
    pub total_payout: Decimal,
}

/// Compute fee, expected return and advertised payout for a stake.
pub fn placement_terms(stake: Decimal, duration_secs: u32) -> Result<PlacementTerms, EngineError> {
    let rate = duration_rate(duration_secs).ok_or(EngineError::InvalidDuration(duration_secs))?;

    let overflow = || EngineError::InvalidStake(stake);

    let fee = stake.checked_mul(FEE_RATE).ok_or_else(overflow)?;
    let expected_return = stake
        .checked_mul(rate)
        .and_then(|r| r.checked_div(dec!(100)))
        .ok_or_else(overflow)?;
    let total_payout = stake
        .checked_add(expected_return)
        .and_then(|t| t.checked_sub(fee))
        .ok_or_else(overflow)?;

    Ok(PlacementTerms {
        duration_secs,
        fee,
        expected_return,
        total_payout,
    })
}

/// Leveraged percentage move in the position's favour.
///
/// Returns zero for a non-positive entry price rather than dividing by it,
/// and `None` when the move does not fit in a `Decimal`.
pub fn price_move_percent(
    direction: Direction,
    entry: Decimal,
    exit: Decimal,
    leverage: u32,
) -> Option<Decimal> {
    if entry <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    let delta = match direction {
        Direction::Long => exit.checked_sub(entry)?,
        Direction::Short => entry.checked_sub(exit)?,
    };
    delta
        .checked_div(entry)?
        .checked_mul(dec!(100))?
        .checked_mul(Decimal::from(leverage))
}

/// Outcome of settling a stake at a given percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementAmounts {
    pub percent: Decimal,
    pub profit: Decimal,
    /// Credited to the account; never negative.
    pub payout: Decimal,
    pub result: TradeResult,
}

/// Turn a percentage outcome into profit, payout and result.
///
/// `None` on overflow.
pub fn settlement_amounts(stake: Decimal, percent: Decimal) -> Option<SettlementAmounts> {
    let profit = stake
        .checked_mul(percent)?
        .checked_div(dec!(100))?
        .round_dp(PROFIT_DP);
    let payout = stake.checked_add(profit)?.max(Decimal::ZERO);

    let result = if profit > Decimal::ZERO {
        TradeResult::Win
    } else if profit < Decimal::ZERO {
        TradeResult::Loss
    } else {
        TradeResult::BreakEven
    };

    Some(SettlementAmounts {
        percent,
        profit,
        payout,
        result,
    })
}

/// Settle a position against an exit price, `None` on overflow.
pub fn settle_at(position: &Position, exit_price: Decimal) -> Option<SettlementAmounts> {
    let percent = price_move_percent(
        position.direction,
        position.entry_price,
        exit_price,
        position.leverage,
    )?;
    settlement_amounts(position.stake, percent)
}
