//! Liquidation sizing and penalties.
//!
//! An account is liquidatable once its account value drops below the
//! maintenance requirement. A liquidator takes over part of one position at
//! the valuation price. The largest allowed slice is the one that restores the
//! maintenance threshold, spread over markets by their share of total
//! absolute position value. Insolvent accounts can be closed in full.

use crate::account::AccountMetrics;
use crate::types::{Address, MarketId, Quote, SignedSize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// charged on the closed notional
    pub penalty_ratio: Decimal,
    /// part of the penalty the liquidator keeps, the rest goes to the fee receiver
    pub liquidator_share: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            penalty_ratio: dec!(0.025),
            liquidator_share: dec!(0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltySplit {
    pub total: Quote,
    pub liquidator: Quote,
    pub fee_receiver: Quote,
}

/// Largest absolute size of `position_size` a liquidator may take right now.
/// Zero when the account is healthy.
pub fn max_liquidatable_size(
    position_size: SignedSize,
    metrics: &AccountMetrics,
    maintenance_margin_ratio: Decimal,
    params: &LiquidationParams,
) -> Decimal {
    let full = position_size.abs();
    if full.is_zero() || !metrics.is_liquidatable() {
        return Decimal::ZERO;
    }

    let effective_ratio = maintenance_margin_ratio - params.penalty_ratio;
    if !metrics.account_value.is_positive() || effective_ratio <= Decimal::ZERO {
        return full;
    }

    // closing value v lowers the requirement by mmr*v and the account value by penalty*v
    let shortfall = metrics.maintenance_requirement.sub(metrics.account_value).value();
    let threshold = shortfall * full / (effective_ratio * metrics.total_abs_value.value());
    threshold.min(full)
}

/// Checks direction and returns the absolute size that will actually close.
pub fn plan_liquidation(
    trader: Address,
    market: MarketId,
    position_size: SignedSize,
    requested: SignedSize,
    max_size: Decimal,
    metrics: &AccountMetrics,
) -> Result<Decimal, LiquidationError> {
    if position_size.is_zero() {
        return Err(LiquidationError::PositionZero { trader, market });
    }
    if !position_size.opposes(requested) {
        return Err(LiquidationError::WrongDirection {
            position: position_size,
            requested,
        });
    }
    if !metrics.is_liquidatable() {
        return Err(LiquidationError::ExceedsAccountValue {
            trader,
            account_value: metrics.account_value,
            maintenance: metrics.maintenance_requirement,
        });
    }
    Ok(requested.abs().min(max_size))
}

pub fn penalty_split(closed_value: Quote, params: &LiquidationParams) -> PenaltySplit {
    let total = closed_value.abs().mul(params.penalty_ratio);
    let liquidator = total.mul(params.liquidator_share);
    PenaltySplit {
        total,
        liquidator,
        fee_receiver: total.sub(liquidator),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiquidationError {
    #[error("Liquidation of {requested} does not reduce position {position}")]
    WrongDirection {
        position: SignedSize,
        requested: SignedSize,
    },

    #[error("{trader} is not liquidatable: account value {account_value} above maintenance {maintenance}")]
    ExceedsAccountValue {
        trader: Address,
        account_value: Quote,
        maintenance: Quote,
    },

    #[error("{trader} has no position in market {market}")]
    PositionZero { trader: Address, market: MarketId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metrics(account_value: Decimal, total_abs_value: Decimal, mmr: Decimal) -> AccountMetrics {
        let total = Quote::new(total_abs_value);
        AccountMetrics {
            collateral: Quote::new(account_value),
            owed_realized_pnl: Quote::zero(),
            unrealized_pnl: Quote::zero(),
            pending_funding: Quote::zero(),
            total_abs_value: total,
            account_value: Quote::new(account_value),
            initial_requirement: total.mul(dec!(0.2)),
            maintenance_requirement: total.mul(mmr),
            free_collateral: Quote::new(account_value).sub(total.mul(dec!(0.2))),
        }
    }

    #[test]
    fn healthy_account_has_nothing_to_liquidate() {
        let m = metrics(dec!(5), dec!(10), dec!(0.1));
        let size = SignedSize::new(dec!(10));
        assert_eq!(max_liquidatable_size(size, &m, dec!(0.1), &LiquidationParams::default()), Decimal::ZERO);
    }

    #[test]
    fn partial_size_restores_threshold() {
        // value 18.5, account value 1.5, requirement 1.85
        let m = metrics(dec!(1.5), dec!(18.5), dec!(0.1));
        let size = SignedSize::new(dec!(-10));
        let params = LiquidationParams::default();
        let max = max_liquidatable_size(size, &m, dec!(0.1), &params);
        assert!(max > Decimal::ZERO && max < dec!(10));

        // after closing `max` at 1.85 the account sits on the threshold
        let closed_value = max * dec!(1.85);
        let new_value = dec!(1.5) - closed_value * params.penalty_ratio;
        let new_req = (dec!(18.5) - closed_value) * dec!(0.1);
        assert!((new_value - new_req).abs() < dec!(0.000001));
    }

    #[test]
    fn insolvent_account_closes_fully() {
        let m = metrics(dec!(-1), dec!(20), dec!(0.1));
        let size = SignedSize::new(dec!(10));
        assert_eq!(max_liquidatable_size(size, &m, dec!(0.1), &LiquidationParams::default()), dec!(10));
    }

    #[test]
    fn penalty_above_maintenance_closes_fully() {
        let m = metrics(dec!(0.5), dec!(10), dec!(0.1));
        let params = LiquidationParams {
            penalty_ratio: dec!(0.2),
            liquidator_share: dec!(0.5),
        };
        assert_eq!(max_liquidatable_size(SignedSize::new(dec!(10)), &m, dec!(0.1), &params), dec!(10));
    }

    #[test]
    fn plan_checks_direction_and_health() {
        let trader = Address::from_low_u64(1);
        let market = MarketId(Address::from_low_u64(0xb1));
        let sick = metrics(dec!(0.5), dec!(10), dec!(0.1));
        let long = SignedSize::new(dec!(10));

        assert!(matches!(
            plan_liquidation(trader, market, long, SignedSize::new(dec!(5)), dec!(10), &sick),
            Err(LiquidationError::WrongDirection { .. })
        ));
        assert_eq!(
            plan_liquidation(trader, market, SignedSize::zero(), SignedSize::new(dec!(-5)), dec!(10), &sick),
            Err(LiquidationError::PositionZero { trader, market })
        );

        let healthy = metrics(dec!(5), dec!(10), dec!(0.1));
        assert!(matches!(
            plan_liquidation(trader, market, long, SignedSize::new(dec!(-5)), dec!(10), &healthy),
            Err(LiquidationError::ExceedsAccountValue { .. })
        ));

        // capped at max
        let closed = plan_liquidation(trader, market, long, SignedSize::new(dec!(-8)), dec!(3), &sick).unwrap();
        assert_eq!(closed, dec!(3));
    }

    #[test]
    fn penalty_split_adds_up() {
        let split = penalty_split(Quote::new(dec!(100)), &LiquidationParams::default());
        assert_eq!(split.total.value(), dec!(2.5));
        assert_eq!(split.liquidator.value(), dec!(1.25));
        assert_eq!(split.liquidator.add(split.fee_receiver), split.total);
    }
}
