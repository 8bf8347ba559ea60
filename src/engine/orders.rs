//! Order validation, matching and cancellation.

use super::core::Engine;
use super::results::{EngineError, MatchResult, OrderCheck};
use crate::access::AuthContext;
use crate::events::{
    AllOrdersCancelledEvent, EventPayload, OrderCancelledEvent, OrdersMatchedEvent, PositionChangedEvent,
};
use crate::margin::check_admission;
use crate::matching::compute_fill;
use crate::observation::{Feed, PriceObservation};
use crate::order::{verify_signature, Order, OrderError, OrderSignature};
use crate::position::fill_notional;
use crate::types::{Address, OrderHash, Quote, SignedSize};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Engine {
    /// Checks everything about a single order that doesn't depend on its counterparty.
    /// Returns the order hash.
    fn validate_order(
        &self,
        ctx: &AuthContext,
        order: &Order,
        signature: &OrderSignature,
    ) -> Result<OrderHash, EngineError> {
        let hash = order.hash(&self.config.engine.domain);

        if order.is_expired(self.current_time) {
            return Err(OrderError::Expired {
                hash,
                deadline: order.deadline,
                now: self.current_time,
            }
            .into());
        }
        self.fills.check_not_cancelled(&hash, order)?;

        // self-submitted orders need no signature
        if ctx.caller != order.trader {
            let verifier = self.verifiers.get(&order.trader).map(|v| v.as_ref());
            verify_signature(order, &hash, signature, verifier)?;
        }

        order.validate_shape()?;
        let market = order.market();
        let Some(state) = self.markets.get(&market) else {
            return Err(OrderError::AssetMismatch(format!("{} is not a listed base token", market)).into());
        };
        if order.quote_asset().token != state.quote_token() {
            return Err(OrderError::AssetMismatch(format!(
                "market {} settles in {}, order uses {}",
                market,
                state.quote_token(),
                order.quote_asset().token
            ))
            .into());
        }

        if let Some((_, source)) = order.trigger_condition() {
            let reference = self.reference_price(market, source)?;
            order.check_trigger(reference)?;
        }

        Ok(hash)
    }

    /// Matches a resting order (left, maker) against an aggressor (right, taker).
    /// `taker` pins who the right order must belong to.
    pub fn open_position(
        &mut self,
        ctx: &AuthContext,
        left: &Order,
        left_signature: &OrderSignature,
        right: &Order,
        right_signature: &OrderSignature,
        taker: Option<Address>,
    ) -> Result<MatchResult, EngineError> {
        let result = self.try_open_position(ctx, left, left_signature, right, right_signature, taker);
        if let Err(e) = &result {
            warn!(
                left_trader = %left.trader,
                right_trader = %right.trader,
                error = %e,
                "match rejected"
            );
        }
        result
    }

    fn try_open_position(
        &mut self,
        ctx: &AuthContext,
        left: &Order,
        left_signature: &OrderSignature,
        right: &Order,
        right_signature: &OrderSignature,
        taker: Option<Address>,
    ) -> Result<MatchResult, EngineError> {
        let left_hash = self.validate_order(ctx, left, left_signature)?;
        let right_hash = self.validate_order(ctx, right, right_signature)?;

        if left.take_asset.token != right.make_asset.token
            || left.make_asset.token != right.take_asset.token
            || left.is_short == right.is_short
        {
            return Err(OrderError::AssetMismatch("orders are not opposite sides of one market".to_string()).into());
        }
        if left.trader == right.trader {
            return Err(OrderError::CounterpartyMismatch {
                expected: left.trader,
                actual: right.trader,
            }
            .into());
        }
        if let Some(expected) = taker {
            if right.trader != expected {
                return Err(OrderError::CounterpartyMismatch {
                    expected,
                    actual: right.trader,
                }
                .into());
            }
        }

        let market = left.market();
        let fill = compute_fill(
            left,
            self.fills.filled(&left_hash),
            right,
            self.fills.filled(&right_hash),
        )?;
        let price = fill.clearing_price(left).ok_or(OrderError::NothingToFill)?;
        let legs = fill.legs(left);
        let quote_amount = Quote::new(fill.quote_amount(left));
        let left_fee = self.config.fees.maker_fee(quote_amount);
        let right_fee = self.config.fees.taker_fee(quote_amount);

        // plan on copies
        let preview = self.funding_preview(market)?;
        let growth = preview.global.cumulative_premium_growth;

        let mut left_account = self.account_copy(left.trader);
        let mut right_account = self.account_copy(right.trader);
        let left_funding = left_account.settle_funding(market, growth);
        let right_funding = right_account.settle_funding(market, growth);
        let left_old = left_account.position(market).size;
        let right_old = right_account.position(market).size;

        let left_outcome = left_account.apply_fill(market, legs.left_size, legs.left_notional, growth);
        let right_outcome = right_account.apply_fill(market, legs.right_size, legs.right_notional, growth);
        left_account.add_owed(left_fee.negate());
        right_account.add_owed(right_fee.negate());

        let left_metrics = self.metrics_for(&left_account)?;
        check_admission(left.trader, left_metrics.free_collateral)?;
        let right_metrics = self.metrics_for(&right_account)?;
        check_admission(right.trader, right_metrics.free_collateral)?;

        self.observations
            .series(market, Feed::Mark)?
            .check_order(self.current_time)?;

        // commit
        self.fills.record(left_hash, left, right_hash, right, &fill);
        self.commit_funding(market, preview)?;
        if let Some(state) = self.markets.get_mut(&market) {
            state.open_interest.update(left_old, left_outcome.position.size);
            state.open_interest.update(right_old, right_outcome.position.size);
        }
        self.store_account(left_account);
        self.store_account(right_account);

        let total_fee = left_fee.add(right_fee);
        if !total_fee.is_zero() {
            let mut receiver = self.account_copy(self.config.fees.fee_receiver);
            receiver.add_owed(total_fee);
            self.store_account(receiver);
        }

        self.observations.append(
            market,
            Feed::Mark,
            PriceObservation {
                timestamp: self.current_time,
                price,
            },
        )?;

        self.emit_funding_payment(left.trader, market, left_funding);
        self.emit_funding_payment(right.trader, market, right_funding);
        for (trader, size, notional, fee, outcome) in [
            (left.trader, legs.left_size, legs.left_notional, left_fee, &left_outcome),
            (right.trader, legs.right_size, legs.right_notional, right_fee, &right_outcome),
        ] {
            self.emit_event(EventPayload::PositionChanged(PositionChangedEvent {
                trader,
                market,
                delta_size: size,
                delta_notional: notional,
                fee,
                realized_pnl: outcome.realized_pnl,
                new_size: outcome.position.size,
            }));
        }
        let base_amount = fill.base_amount(left);
        self.emit_event(EventPayload::OrdersMatched(OrdersMatchedEvent {
            market,
            left_hash,
            right_hash,
            base_amount,
            quote_amount: quote_amount.value(),
            price,
        }));

        info!(
            %market,
            maker = %left.trader,
            taker = %right.trader,
            %base_amount,
            %price,
            "orders matched"
        );

        Ok(MatchResult {
            market,
            left_hash,
            right_hash,
            fill,
            price,
            left_fee,
            right_fee,
            left_realized_pnl: left_outcome.realized_pnl,
            right_realized_pnl: right_outcome.realized_pnl,
        })
    }

    /// Read-only: would the rest of this order be accepted as a taker at its own
    /// limit price right now?
    pub fn get_order_validate(
        &self,
        ctx: &AuthContext,
        order: &Order,
        signature: &OrderSignature,
    ) -> Result<OrderCheck, EngineError> {
        let hash = self.validate_order(ctx, order, signature)?;
        let market = order.market();

        let (make, take) = order.remaining(self.fills.filled(&hash))?;
        let remaining_base = if order.is_short { make } else { take };
        if remaining_base.is_zero() {
            return Err(OrderError::NothingToFill.into());
        }
        let price = order.limit_price().ok_or(OrderError::NothingToFill)?;

        let growth = self.funding_preview(market)?.global.cumulative_premium_growth;
        let size = SignedSize::from_side(order.side(), remaining_base);
        let notional = fill_notional(size, price);

        let mut account = self.account_copy(order.trader);
        account.settle_funding(market, growth);
        account.apply_fill(market, size, notional, growth);
        account.add_owed(self.config.fees.taker_fee(notional).negate());

        let metrics = self.metrics_for(&account)?;
        check_admission(order.trader, metrics.free_collateral)?;

        Ok(OrderCheck {
            hash,
            remaining_base,
            free_collateral_after: metrics.free_collateral,
        })
    }

    /// The trader withdraws one order for good.
    pub fn cancel_order(&mut self, ctx: &AuthContext, order: &Order) -> Result<OrderHash, EngineError> {
        self.access.require_trader(ctx, order.trader)?;
        let hash = order.hash(&self.config.engine.domain);
        self.fills.cancel(hash, order);

        debug!(trader = %order.trader, %hash, "order cancelled");
        self.emit_event(EventPayload::OrderCancelled(OrderCancelledEvent {
            trader: order.trader,
            hash,
        }));
        Ok(hash)
    }

    /// Invalidates every order of the caller with a salt below `min_salt`.
    pub fn cancel_all_orders(&mut self, ctx: &AuthContext, min_salt: u64) -> Result<(), EngineError> {
        let trader = ctx.caller;
        self.fills.raise_min_salt(trader, min_salt)?;

        debug!(%trader, min_salt, "all orders cancelled below salt");
        self.emit_event(EventPayload::AllOrdersCancelled(AllOrdersCancelledEvent { trader, min_salt }));
        Ok(())
    }

    pub fn order_hash(&self, order: &Order) -> OrderHash {
        order.hash(&self.config.engine.domain)
    }

    pub fn filled_amount(&self, hash: &OrderHash) -> Decimal {
        self.fills.filled(hash)
    }
}
