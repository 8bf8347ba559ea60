//! Per-trader ledger.
//!
//! An account holds a trader's positions across markets plus the realized PnL
//! that has not been moved to the vault yet (trade PnL, funding, fees,
//! liquidation penalties and rewards). Owed PnL counts as collateral until
//! `settle_owed_realized_pnl` moves it.

use crate::margin::{
    free_collateral, maintenance_margin_requirement, initial_margin_requirement, margin_ratio, MarginParams,
    MarketValuation,
};
use crate::position::{FillOutcome, Position};
use crate::types::{Address, MarketId, Quote, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub trader: Address,
    pub positions: HashMap<MarketId, Position>,
    pub owed_realized_pnl: Quote,
}

impl Account {
    pub fn new(trader: Address) -> Self {
        Self {
            trader,
            positions: HashMap::new(),
            owed_realized_pnl: Quote::zero(),
        }
    }

    /// Flat position when the trader never traded the market.
    pub fn position(&self, market: MarketId) -> Position {
        self.positions.get(&market).copied().unwrap_or_default()
    }

    pub fn set_position(&mut self, market: MarketId, position: Position) {
        if position.is_empty() {
            self.positions.remove(&market);
        } else {
            self.positions.insert(market, position);
        }
    }

    pub fn open_positions(&self) -> impl Iterator<Item = (&MarketId, &Position)> {
        self.positions.iter().filter(|(_, p)| !p.is_empty())
    }

    pub fn has_positions(&self) -> bool {
        self.open_positions().next().is_some()
    }

    pub fn add_owed(&mut self, amount: Quote) {
        self.owed_realized_pnl = self.owed_realized_pnl.add(amount);
    }

    /// Books funding owed since the last snapshot and moves the snapshot forward.
    /// Returns the payment, positive when the trader paid.
    pub fn settle_funding(&mut self, market: MarketId, cumulative_premium_growth: Decimal) -> Quote {
        let mut position = self.position(market);
        let payment = position.pending_funding(cumulative_premium_growth);
        position.last_premium_growth = cumulative_premium_growth;
        self.set_position(market, position);
        self.owed_realized_pnl = self.owed_realized_pnl.sub(payment);
        payment
    }

    /// A position opened from flat starts its funding snapshot at `cumulative_premium_growth`.
    pub fn apply_fill(
        &mut self,
        market: MarketId,
        delta_size: SignedSize,
        delta_notional: Quote,
        cumulative_premium_growth: Decimal,
    ) -> FillOutcome {
        let current = match self.positions.get(&market) {
            Some(position) if !position.is_empty() => *position,
            _ => Position::flat(cumulative_premium_growth),
        };
        let outcome = current.apply_fill(delta_size, delta_notional);
        self.set_position(market, outcome.position);
        self.add_owed(outcome.realized_pnl);
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMetrics {
    pub collateral: Quote,
    pub owed_realized_pnl: Quote,
    pub unrealized_pnl: Quote,
    /// positive = owed by the trader
    pub pending_funding: Quote,
    pub total_abs_value: Quote,
    pub account_value: Quote,
    pub initial_requirement: Quote,
    pub maintenance_requirement: Quote,
    pub free_collateral: Quote,
}

impl AccountMetrics {
    pub fn is_liquidatable(&self) -> bool {
        self.has_exposure() && self.account_value < self.maintenance_requirement
    }

    pub fn has_exposure(&self) -> bool {
        !self.total_abs_value.is_zero()
    }

    /// Account value over total position value. `Decimal::MAX` when flat.
    pub fn margin_ratio(&self) -> Decimal {
        margin_ratio(self.account_value, self.total_abs_value)
    }
}

/// Values every open position. Markets missing from `valuations` are skipped.
pub fn calculate_account_metrics(
    account: &Account,
    collateral: Quote,
    valuations: &HashMap<MarketId, MarketValuation>,
    params: &MarginParams,
) -> AccountMetrics {
    let mut unrealized_pnl = Quote::zero();
    let mut pending_funding = Quote::zero();
    let mut total_abs_value = Quote::zero();

    for (market, position) in account.open_positions() {
        if let Some(valuation) = valuations.get(market) {
            unrealized_pnl = unrealized_pnl.add(position.unrealized_pnl(valuation.price));
            pending_funding =
                pending_funding.add(position.pending_funding(valuation.cumulative_premium_growth));
            total_abs_value = total_abs_value.add(position.notional_value(valuation.price));
        }
    }

    let account_value = collateral
        .add(account.owed_realized_pnl)
        .add(unrealized_pnl)
        .sub(pending_funding);

    AccountMetrics {
        collateral,
        owed_realized_pnl: account.owed_realized_pnl,
        unrealized_pnl,
        pending_funding,
        total_abs_value,
        account_value,
        initial_requirement: initial_margin_requirement(total_abs_value, params),
        maintenance_requirement: maintenance_margin_requirement(total_abs_value, params),
        free_collateral: free_collateral(account_value, total_abs_value, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::fill_notional;
    use crate::types::Price;
    use rust_decimal_macros::dec;

    fn market() -> MarketId {
        MarketId(Address::from_low_u64(0xb1))
    }

    fn valuations(price: Decimal, growth: Decimal) -> HashMap<MarketId, MarketValuation> {
        let mut map = HashMap::new();
        map.insert(
            market(),
            MarketValuation {
                price: Price::new_unchecked(price),
                cumulative_premium_growth: growth,
            },
        );
        map
    }

    fn long_ten(account: &mut Account) {
        let size = SignedSize::new(dec!(10));
        account.apply_fill(market(), size, fill_notional(size, Price::new_unchecked(dec!(1))), Decimal::ZERO);
    }

    #[test]
    fn new_account_is_flat() {
        let account = Account::new(Address::from_low_u64(1));
        assert!(!account.has_positions());
        assert!(account.position(market()).is_empty());
    }

    #[test]
    fn closing_removes_record_and_books_pnl() {
        let mut account = Account::new(Address::from_low_u64(1));
        long_ten(&mut account);
        let size = SignedSize::new(dec!(-10));
        account.apply_fill(market(), size, fill_notional(size, Price::new_unchecked(dec!(1.2))), Decimal::ZERO);
        assert!(!account.has_positions());
        assert_eq!(account.owed_realized_pnl.value(), dec!(2));
    }

    #[test]
    fn fresh_position_snapshots_current_growth() {
        let mut account = Account::new(Address::from_low_u64(1));
        let size = SignedSize::new(dec!(-4));
        account.apply_fill(market(), size, fill_notional(size, Price::new_unchecked(dec!(2))), dec!(0.3));
        assert_eq!(account.position(market()).last_premium_growth, dec!(0.3));
        assert!(account.settle_funding(market(), dec!(0.3)).is_zero());
    }

    #[test]
    fn funding_settlement_moves_snapshot() {
        let mut account = Account::new(Address::from_low_u64(1));
        long_ten(&mut account);
        let paid = account.settle_funding(market(), dec!(0.01));
        assert_eq!(paid.value(), dec!(0.1));
        assert_eq!(account.owed_realized_pnl.value(), dec!(-0.1));
        // second settle at the same growth pays nothing
        assert!(account.settle_funding(market(), dec!(0.01)).is_zero());
    }

    #[test]
    fn metrics_at_entry() {
        let mut account = Account::new(Address::from_low_u64(1));
        long_ten(&mut account);
        let m = calculate_account_metrics(
            &account,
            Quote::new(dec!(10)),
            &valuations(dec!(1), Decimal::ZERO),
            &MarginParams::default(),
        );
        assert!(m.unrealized_pnl.is_zero());
        assert_eq!(m.total_abs_value.value(), dec!(10));
        assert_eq!(m.account_value.value(), dec!(10));
        assert_eq!(m.free_collateral.value(), dec!(8));
        assert_eq!(m.maintenance_requirement.value(), dec!(1));
        assert!(!m.is_liquidatable());
    }

    #[test]
    fn metrics_after_drop_are_liquidatable() {
        let mut account = Account::new(Address::from_low_u64(1));
        long_ten(&mut account);
        let m = calculate_account_metrics(
            &account,
            Quote::new(dec!(1)),
            &valuations(dec!(0.95), dec!(0.01)),
            &MarginParams::default(),
        );
        // 1 - 0.5 - 0.1
        assert_eq!(m.account_value.value(), dec!(0.4));
        assert_eq!(m.maintenance_requirement.value(), dec!(0.95));
        assert!(m.is_liquidatable());
    }
}
