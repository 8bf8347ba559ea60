// 5.0: funding. every period the gap between mark and index is charged: longs pay shorts
// when mark trades above index, shorts pay longs when below.
// 5.0 has the params/state structs. 5.1 has the settlement logic, all pure.
//
// the market keeps one cumulative premium growth number. a position remembers the value
// it last settled at, so what it owes is size * (cumulative - snapshot) no matter how many
// periods passed in between.

use crate::types::{Price, Quote, SignedSize, Timestamp, HOUR_MS};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingParams {
    pub period_ms: i64,
    /// per period cap on the premium, as a fraction of index
    pub max_funding_rate: Decimal,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            period_ms: 8 * HOUR_MS,
            max_funding_rate: dec!(0.01),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingGlobal {
    pub cumulative_premium_growth: Decimal,
    pub last_settlement: Timestamp,
    /// when the global last moved, None until the first settlement
    pub last_advanced_at: Option<Timestamp>,
}

impl FundingGlobal {
    pub fn new(start: Timestamp) -> Self {
        Self {
            cumulative_premium_growth: Decimal::ZERO,
            last_settlement: start,
            last_advanced_at: None,
        }
    }
}

/// Idle → PendingSettlement → Settled → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingPhase {
    Idle,
    PendingSettlement,
    Settled,
}

// 5.1: whole periods since the last settlement
pub fn elapsed_periods(global: &FundingGlobal, now: Timestamp, params: &FundingParams) -> i64 {
    if params.period_ms <= 0 {
        return 0;
    }
    now.millis_since(global.last_settlement).max(0) / params.period_ms
}

pub fn funding_phase(global: &FundingGlobal, now: Timestamp, params: &FundingParams) -> FundingPhase {
    if elapsed_periods(global, now, params) >= 1 {
        FundingPhase::PendingSettlement
    } else if global.last_advanced_at == Some(now) {
        FundingPhase::Settled
    } else {
        FundingPhase::Idle
    }
}

/// The [start, end) window whose SMAs price the next settlement, if one is due.
pub fn settlement_window(
    global: &FundingGlobal,
    now: Timestamp,
    params: &FundingParams,
) -> Option<(Timestamp, Timestamp)> {
    let periods = elapsed_periods(global, now, params);
    if periods < 1 {
        return None;
    }
    let end = global.last_settlement.plus_millis(periods * params.period_ms);
    Some((global.last_settlement, end))
}

// 5.2: premium per unit of base for the elapsed periods, clamped both ways
pub fn premium_increment(mark_sma: Price, index_sma: Price, periods: i64, params: &FundingParams) -> Decimal {
    let periods = Decimal::from(periods);
    let raw = (mark_sma.value() - index_sma.value()) * periods;
    let cap = params.max_funding_rate * index_sma.value() * periods;
    raw.max(-cap).min(cap)
}

/// Settles the global if at least one period passed. Same input within a period
/// returns the global unchanged.
pub fn maybe_settle(
    global: &FundingGlobal,
    mark_sma: Price,
    index_sma: Price,
    now: Timestamp,
    params: &FundingParams,
) -> FundingGlobal {
    let periods = elapsed_periods(global, now, params);
    if periods < 1 {
        return *global;
    }
    let increment = premium_increment(mark_sma, index_sma, periods, params);
    FundingGlobal {
        cumulative_premium_growth: global.cumulative_premium_growth + increment,
        last_settlement: global.last_settlement.plus_millis(periods * params.period_ms),
        last_advanced_at: Some(now),
    }
}

// 5.3: what a position owes. positive = trader pays
pub fn calculate_funding_payment(
    size: SignedSize,
    last_premium_growth: Decimal,
    cumulative_premium_growth: Decimal,
) -> Quote {
    Quote::new(size.value() * (cumulative_premium_growth - last_premium_growth))
}

/// Per period funding rate implied by an increment, as a fraction of index.
pub fn implied_rate(increment: Decimal, index_sma: Price, periods: i64) -> Decimal {
    if periods <= 0 {
        return Decimal::ZERO;
    }
    increment / (index_sma.value() * Decimal::from(periods))
}
