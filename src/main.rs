//! Clearing core simulation.
//!
//! Walks one market through matched orders, a position flip, a funding period
//! and a liquidation. Pass a TOML config path as the first argument to override
//! the development preset.

use std::path::Path;

use perp_clearing::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const BASE: u64 = 0xb1;
const QUOTE: u64 = 0xc1;

struct Desk {
    engine: Engine,
    market: MarketId,
    governance: AuthContext,
    adder: AuthContext,
    relayer: AuthContext,
    next_salt: u64,
}

impl Desk {
    fn order(
        &mut self,
        signer: &OrderSigner,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> anyhow::Result<(Order, OrderSignature)> {
        self.next_salt += 1;
        let price = Price::new(price).ok_or_else(|| anyhow::anyhow!("price must be positive"))?;
        let order = Order::new_limit(
            signer.address(),
            self.market,
            Address::from_low_u64(QUOTE),
            side,
            size,
            price,
            self.engine.time().plus_millis(HOUR_MS),
            self.next_salt,
        );
        let signature = signer.sign(&order, &self.engine.config().engine.domain)?;
        Ok((order, signature))
    }

    fn trade(
        &mut self,
        maker: &OrderSigner,
        taker: &OrderSigner,
        maker_side: Side,
        size: Decimal,
        price: Decimal,
    ) -> anyhow::Result<MatchResult> {
        let (left, left_sig) = self.order(maker, maker_side, size, price)?;
        let (right, right_sig) = self.order(taker, maker_side.opposite(), size, price)?;
        let relayer = self.relayer;
        Ok(self
            .engine
            .open_position(&relayer, &left, &left_sig, &right, &right_sig, Some(taker.address()))?)
    }

    fn report(&self, label: &str, trader: Address) -> anyhow::Result<()> {
        let position = self.engine.position(trader, self.market);
        let metrics = self.engine.account_metrics(trader)?;
        info!(
            label,
            size = %position.size,
            open_notional = %position.open_notional,
            account_value = %metrics.account_value,
            free_collateral = %metrics.free_collateral,
            "account"
        );
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,perp_clearing=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => ClearingConfig::load(Path::new(&path))?,
        None => Environment::Development.config(),
    };
    let governance = Address::from_low_u64(0x60);
    config.engine.governance = governance;
    config.fees.fee_receiver = Address::from_low_u64(0xfe);

    let alice = OrderSigner::from_bytes(&[1u8; 32])?;
    let bob = OrderSigner::from_bytes(&[2u8; 32])?;
    let carol = OrderSigner::from_bytes(&[3u8; 32])?;

    let vault = InMemoryVault::new()
        .with_balance(alice.address(), dec!(10))
        .with_balance(bob.address(), dec!(10))
        .with_balance(carol.address(), dec!(100));
    let mut engine = Engine::with_vault(config, Box::new(vault))?;
    engine.set_time(Timestamp::now());

    let adder = Address::from_low_u64(0xa0);
    let market_config = MarketConfig::new(
        Address::from_low_u64(BASE),
        Address::from_low_u64(QUOTE),
        Price::new_unchecked(dec!(1)),
        adder,
    );
    let market = engine.create_market(&AuthContext::new(governance), market_config)?;

    let mut desk = Desk {
        engine,
        market,
        governance: AuthContext::new(governance),
        adder: AuthContext::new(adder),
        relayer: AuthContext::new(Address::from_low_u64(0x77)),
        next_salt: 0,
    };
    info!(%market, governance = %desk.governance.caller, "market listed");

    scenario_open_and_flip(&mut desk, &alice, &bob)?;
    scenario_funding(&mut desk, &alice, &bob)?;
    scenario_liquidation(&mut desk, &alice, &carol)?;

    info!(events = desk.engine.events().len(), "simulation finished");
    Ok(())
}

/// Bob rests a short, Alice lifts it. Then Alice rests a 20 unit short and
/// Bob takes it, flipping both.
fn scenario_open_and_flip(desk: &mut Desk, alice: &OrderSigner, bob: &OrderSigner) -> anyhow::Result<()> {
    info!("scenario: open and flip");
    desk.engine.add_observation(&desk.adder, desk.market, dec!(1))?;

    let result = desk.trade(bob, alice, Side::Short, dec!(10), dec!(1))?;
    info!(price = %result.price, maker_fee = %result.left_fee, taker_fee = %result.right_fee, "opened");
    desk.report("alice", alice.address())?;
    desk.report("bob", bob.address())?;

    desk.engine.advance_time(60_000);
    let result = desk.trade(alice, bob, Side::Short, dec!(20), dec!(1))?;
    info!(
        alice_realized = %result.left_realized_pnl,
        bob_realized = %result.right_realized_pnl,
        "flipped"
    );
    desk.report("alice", alice.address())?;
    desk.report("bob", bob.address())?;

    let oi = desk.engine.open_interest(desk.market)?;
    info!(long = %oi.long, short = %oi.short, "open interest");
    Ok(())
}

/// Marks trade above index for a full period; longs pay shorts.
fn scenario_funding(desk: &mut Desk, alice: &OrderSigner, bob: &OrderSigner) -> anyhow::Result<()> {
    info!("scenario: funding period");
    let period = desk
        .engine
        .market(desk.market)
        .map(|m| m.config.funding_params.period_ms)
        .unwrap_or(8 * HOUR_MS);

    desk.engine.advance_time(HOUR_MS);
    desk.engine.add_observation(&desk.adder, desk.market, dec!(1))?;
    // tiny round trip at a premium so the mark feed sits above index
    desk.trade(alice, bob, Side::Short, dec!(0.1), dec!(1.01))?;
    desk.trade(bob, alice, Side::Short, dec!(0.1), dec!(1.01))?;

    desk.engine.advance_time(period);
    info!(phase = ?desk.engine.funding_phase(desk.market)?, "before touch");
    let pending = desk.engine.get_pending_funding_payment(bob.address(), desk.market)?;
    info!(%pending, "bob pending funding");

    for trader in [alice.address(), bob.address()] {
        for settlement in desk.engine.settle_all_funding(trader)? {
            info!(%trader, payment = %settlement.payment, "funding settled");
        }
    }
    info!(phase = ?desk.engine.funding_phase(desk.market)?, "after touch");
    Ok(())
}

/// Index jumps, Alice's short falls under maintenance and Carol takes the
/// largest slice allowed.
fn scenario_liquidation(desk: &mut Desk, alice: &OrderSigner, carol: &OrderSigner) -> anyhow::Result<()> {
    info!("scenario: liquidation");
    let carol_ctx = AuthContext::new(carol.address());

    desk.engine.advance_time(20 * 60_000);
    desk.engine.add_observation(&desk.adder, desk.market, dec!(1.85))?;
    desk.report("alice", alice.address())?;

    if !desk.engine.is_liquidatable(alice.address())? {
        info!("alice still healthy, nothing to do");
        return Ok(());
    }
    let max = desk.engine.max_liquidatable_size(alice.address(), desk.market)?;
    let size = desk.engine.position(alice.address(), desk.market).size;
    let requested = if size.is_short() { max } else { -max };
    let result = desk.engine.liquidate(&carol_ctx, alice.address(), desk.market, requested)?;
    info!(
        closed = %result.closed_size,
        price = %result.price,
        penalty = %result.penalty,
        reward = %result.liquidator_reward,
        "liquidated"
    );
    desk.report("alice", alice.address())?;
    desk.report("carol", carol.address())?;

    for trader in [alice.address(), carol.address()] {
        let moved = desk.engine.settle_owed_realized_pnl(trader)?;
        info!(%trader, %moved, balance = %desk.engine.vault().balance_of(trader), "owed pnl settled");
    }
    Ok(())
}
