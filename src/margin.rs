//! Margin requirements and admission control.
//!
//! Every position is valued at the market's valuation price (the index SMA over
//! a short window). The initial requirement is total absolute position value
//! divided by max leverage. The maintenance requirement is total absolute
//! position value times the maintenance ratio. A fill is admitted only if the
//! trader still has non-negative free collateral afterwards.

use crate::types::{Address, HOUR_MS, Leverage, Price, Quote, SignedSize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginParams {
    pub max_leverage: Leverage,
    pub maintenance_margin_ratio: Decimal,
    /// index SMA window used to value positions
    pub valuation_window_ms: i64,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            max_leverage: Leverage::new_unchecked(dec!(5)),
            maintenance_margin_ratio: dec!(0.1),
            valuation_window_ms: HOUR_MS / 4,
        }
    }
}

/// Price and funding state a market is valued at right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketValuation {
    pub price: Price,
    /// cumulative premium growth as it would be after settling due funding
    pub cumulative_premium_growth: Decimal,
}

pub fn notional_value(size: SignedSize, price: Price) -> Quote {
    Quote::new(size.abs() * price.value())
}

pub fn initial_margin_requirement(total_abs_value: Quote, params: &MarginParams) -> Quote {
    total_abs_value.mul(params.max_leverage.initial_margin_fraction())
}

pub fn maintenance_margin_requirement(total_abs_value: Quote, params: &MarginParams) -> Quote {
    total_abs_value.mul(params.maintenance_margin_ratio)
}

/// account value minus initial margin
pub fn free_collateral(account_value: Quote, total_abs_value: Quote, params: &MarginParams) -> Quote {
    account_value.sub(initial_margin_requirement(total_abs_value, params))
}

pub fn check_admission(trader: Address, free: Quote) -> Result<(), MarginError> {
    if free.is_negative() {
        return Err(MarginError::InsufficientFreeCollateral { trader, free });
    }
    Ok(())
}

pub fn margin_ratio(account_value: Quote, total_abs_value: Quote) -> Decimal {
    if total_abs_value.is_zero() {
        return Decimal::MAX;
    }
    account_value.value() / total_abs_value.value()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("Insufficient free collateral for {trader}: {free}")]
    InsufficientFreeCollateral { trader: Address, free: Quote },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_calculation() {
        let size = SignedSize::new(dec!(-2));
        let price = Price::new_unchecked(dec!(50000));
        assert_eq!(notional_value(size, price).value(), dec!(100000));
    }

    #[test]
    fn requirements_at_default_params() {
        let params = MarginParams::default();
        let value = Quote::new(dec!(100));
        // 5x → 20%
        assert_eq!(initial_margin_requirement(value, &params).value(), dec!(20));
        assert_eq!(maintenance_margin_requirement(value, &params).value(), dec!(10));
    }

    #[test]
    fn free_collateral_and_admission() {
        let params = MarginParams::default();
        let trader = Address::from_low_u64(1);

        let free = free_collateral(Quote::new(dec!(10)), Quote::new(dec!(50)), &params);
        assert!(free.is_zero());
        assert!(check_admission(trader, free).is_ok());

        let free = free_collateral(Quote::new(dec!(10)), Quote::new(dec!(51)), &params);
        assert_eq!(free.value(), dec!(-0.2));
        assert_eq!(
            check_admission(trader, free),
            Err(MarginError::InsufficientFreeCollateral { trader, free })
        );
    }

    #[test]
    fn margin_ratio_calculation() {
        assert_eq!(margin_ratio(Quote::new(dec!(5)), Quote::new(dec!(50))), dec!(0.1));
        assert_eq!(margin_ratio(Quote::new(dec!(5)), Quote::zero()), Decimal::MAX);
    }
}
