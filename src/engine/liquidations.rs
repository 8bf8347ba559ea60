//! Liquidation detection and execution.

use super::core::Engine;
use super::results::{EngineError, LiquidationResult};
use crate::access::AuthContext;
use crate::events::{EventPayload, PositionChangedEvent, PositionLiquidatedEvent};
use crate::liquidation::{max_liquidatable_size, penalty_split, plan_liquidation};
use crate::margin::check_admission;
use crate::order::OrderError;
use crate::position::fill_notional;
use crate::types::{Address, MarketId, Quote, SignedSize};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl Engine {
    pub fn is_liquidatable(&self, trader: Address) -> Result<bool, EngineError> {
        Ok(self.account_metrics(trader)?.is_liquidatable())
    }

    /// Largest absolute size of the trader's position in `market` a liquidator may take now.
    pub fn max_liquidatable_size(&self, trader: Address, market: MarketId) -> Result<Decimal, EngineError> {
        self.require_market(market)?;
        let account = self.account_copy(trader);
        let metrics = self.metrics_for(&account)?;
        Ok(max_liquidatable_size(
            account.position(market).size,
            &metrics,
            self.config.margin.maintenance_margin_ratio,
            &self.config.liquidation,
        ))
    }

    /// The caller takes over up to `requested` (a signed change to the trader's
    /// position, opposite to it) at the valuation price.
    pub fn liquidate(
        &mut self,
        ctx: &AuthContext,
        trader: Address,
        market: MarketId,
        requested: Decimal,
    ) -> Result<LiquidationResult, EngineError> {
        let result = self.execute_liquidation(ctx, trader, market, SignedSize::new(requested), false);
        if let Err(e) = &result {
            warn!(%trader, %market, liquidator = %ctx.caller, error = %e, "liquidation rejected");
        }
        result
    }

    /// Closes the whole position once the account is liquidatable, ignoring the
    /// partial size cap.
    pub fn liquidate_full_position(
        &mut self,
        ctx: &AuthContext,
        trader: Address,
        market: MarketId,
    ) -> Result<LiquidationResult, EngineError> {
        let requested = self.position(trader, market).size.negate();
        let result = self.execute_liquidation(ctx, trader, market, requested, true);
        if let Err(e) = &result {
            warn!(%trader, %market, liquidator = %ctx.caller, error = %e, "full liquidation rejected");
        }
        result
    }

    fn execute_liquidation(
        &mut self,
        ctx: &AuthContext,
        trader: Address,
        market: MarketId,
        requested: SignedSize,
        full: bool,
    ) -> Result<LiquidationResult, EngineError> {
        let liquidator = ctx.caller;
        self.require_market(market)?;
        if liquidator == trader {
            return Err(OrderError::CounterpartyMismatch {
                expected: trader,
                actual: liquidator,
            }
            .into());
        }

        let preview = self.funding_preview(market)?;
        let growth = preview.global.cumulative_premium_growth;

        let mut trader_account = self.account_copy(trader);
        let trader_funding = trader_account.settle_funding(market, growth);
        let trader_old = trader_account.position(market).size;
        let metrics = self.metrics_for(&trader_account)?;

        let cap = if full {
            trader_old.abs()
        } else {
            max_liquidatable_size(
                trader_old,
                &metrics,
                self.config.margin.maintenance_margin_ratio,
                &self.config.liquidation,
            )
        };
        let closed_abs = plan_liquidation(trader, market, trader_old, requested, cap, &metrics)?;
        if closed_abs.is_zero() {
            return Err(OrderError::NothingToFill.into());
        }

        let price = self.valuation(market)?.price;
        let delta = SignedSize::new(if trader_old.is_long() { -closed_abs } else { closed_abs });
        let notional = fill_notional(delta, price);
        let split = penalty_split(Quote::new(closed_abs * price.value()), &self.config.liquidation);

        let trader_outcome = trader_account.apply_fill(market, delta, notional, growth);
        trader_account.add_owed(split.total.negate());

        let mut liquidator_account = self.account_copy(liquidator);
        let liquidator_funding = liquidator_account.settle_funding(market, growth);
        let liquidator_old = liquidator_account.position(market).size;
        let liquidator_outcome =
            liquidator_account.apply_fill(market, delta.negate(), notional.negate(), growth);
        liquidator_account.add_owed(split.liquidator);

        let liquidator_metrics = self.metrics_for(&liquidator_account)?;
        check_admission(liquidator, liquidator_metrics.free_collateral)?;

        // commit
        self.commit_funding(market, preview)?;
        if let Some(state) = self.markets.get_mut(&market) {
            state.open_interest.update(trader_old, trader_outcome.position.size);
            state.open_interest.update(liquidator_old, liquidator_outcome.position.size);
        }
        self.store_account(trader_account);
        self.store_account(liquidator_account);
        if !split.fee_receiver.is_zero() {
            let mut receiver = self.account_copy(self.config.fees.fee_receiver);
            receiver.add_owed(split.fee_receiver);
            self.store_account(receiver);
        }

        self.emit_funding_payment(trader, market, trader_funding);
        self.emit_funding_payment(liquidator, market, liquidator_funding);
        self.emit_event(EventPayload::PositionChanged(PositionChangedEvent {
            trader,
            market,
            delta_size: delta,
            delta_notional: notional,
            fee: split.total,
            realized_pnl: trader_outcome.realized_pnl,
            new_size: trader_outcome.position.size,
        }));
        self.emit_event(EventPayload::PositionChanged(PositionChangedEvent {
            trader: liquidator,
            market,
            delta_size: delta.negate(),
            delta_notional: notional.negate(),
            fee: split.liquidator.negate(),
            realized_pnl: liquidator_outcome.realized_pnl,
            new_size: liquidator_outcome.position.size,
        }));
        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            trader,
            liquidator,
            market,
            closed_size: delta,
            price,
            penalty: split.total,
        }));

        info!(
            %trader,
            %liquidator,
            %market,
            closed = %delta,
            %price,
            penalty = %split.total,
            margin_ratio = %metrics.margin_ratio(),
            "position liquidated"
        );

        Ok(LiquidationResult {
            trader,
            liquidator,
            market,
            closed_size: delta,
            price,
            penalty: split.total,
            liquidator_reward: split.liquidator,
            realized_pnl: trader_outcome.realized_pnl,
        })
    }
}
