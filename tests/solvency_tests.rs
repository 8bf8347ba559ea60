//! Solvency invariant tests.
//!
//! Random trade sequences through the engine with fees switched off. Whatever
//! gets matched or rejected, positions, open interest and pnl must stay balanced
//! across all traders.

use perp_clearing::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const TRADERS: usize = 4;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn signers() -> Vec<OrderSigner> {
    (1..=TRADERS as u8)
        .map(|n| OrderSigner::from_bytes(&[n; 32]).unwrap())
        .collect()
}

fn setup(signers: &[OrderSigner], collateral: Decimal) -> (Engine, MarketId) {
    let mut config = ClearingConfig::default();
    config.engine.governance = addr(0x60);
    config.fees.maker_fee_bps = 0;
    config.fees.taker_fee_bps = 0;

    let mut vault = InMemoryVault::new();
    for s in signers {
        vault = vault.with_balance(s.address(), collateral);
    }
    let mut engine = Engine::with_vault(config, Box::new(vault)).unwrap();
    let market = engine
        .create_market(
            &AuthContext::new(addr(0x60)),
            MarketConfig::new(addr(0xb1), addr(0xc1), Price::new_unchecked(dec!(1)), addr(0xa0)),
        )
        .unwrap();
    engine
        .add_observation(&AuthContext::new(addr(0xa0)), market, dec!(1))
        .unwrap();
    (engine, market)
}

#[derive(Debug, Clone)]
struct TradeOp {
    maker: usize,
    taker_offset: usize,
    maker_short: bool,
    maker_size: i64,
    taker_size: i64,
    price: i64,
    improvement: i64,
}

fn trade_strategy() -> impl Strategy<Value = TradeOp> {
    (0..TRADERS, 1..TRADERS, any::<bool>(), 1i64..10_000, 1i64..10_000, 50i64..200, 0i64..20).prop_map(
        |(maker, taker_offset, maker_short, maker_size, taker_size, price, improvement)| TradeOp {
            maker,
            taker_offset,
            maker_short,
            maker_size,
            taker_size,
            price,
            improvement,
        },
    )
}

fn order(
    engine: &Engine,
    market: MarketId,
    signer: &OrderSigner,
    side: Side,
    size: Decimal,
    price: Decimal,
    salt: u64,
) -> (Order, OrderSignature) {
    let order = Order::new_limit(
        signer.address(),
        market,
        addr(0xc1),
        side,
        size,
        Price::new_unchecked(price),
        engine.time().plus_millis(HOUR_MS),
        salt,
    );
    let signature = signer.sign(&order, &engine.config().engine.domain).unwrap();
    (order, signature)
}

/// Runs one op. Rejections are fine, they must just leave no trace.
fn run(engine: &mut Engine, market: MarketId, signers: &[OrderSigner], op: &TradeOp, salt: u64) -> bool {
    let maker = &signers[op.maker];
    let taker = &signers[(op.maker + op.taker_offset) % TRADERS];
    let maker_side = if op.maker_short { Side::Short } else { Side::Long };
    let maker_price = Decimal::new(op.price, 2);
    // the aggressor quotes through the resting price
    let taker_price = match maker_side {
        Side::Short => maker_price + Decimal::new(op.improvement, 2),
        Side::Long => (maker_price - Decimal::new(op.improvement, 2)).max(dec!(0.01)),
    };

    let (left, left_sig) = order(engine, market, maker, maker_side, Decimal::new(op.maker_size, 2), maker_price, salt);
    let (right, right_sig) = order(
        engine,
        market,
        taker,
        maker_side.opposite(),
        Decimal::new(op.taker_size, 2),
        taker_price,
        salt,
    );
    engine
        .open_position(&AuthContext::new(addr(0x77)), &left, &left_sig, &right, &right_sig, None)
        .is_ok()
}

fn close_to_zero(value: Decimal) -> bool {
    value.abs() <= dec!(0.000000001)
}

fn check_balanced(engine: &Engine, market: MarketId, signers: &[OrderSigner], at: Price) -> Result<(), TestCaseError> {
    let positions: Vec<Position> = signers.iter().map(|s| engine.position(s.address(), market)).collect();

    let total_size: Decimal = positions.iter().map(|p| p.size.value()).sum();
    prop_assert!(total_size.is_zero(), "sizes sum to {}", total_size);

    let oi = engine.open_interest(market).unwrap();
    prop_assert!(oi.is_balanced(), "open interest {:?}", oi);
    let longs: Decimal = positions.iter().map(|p| p.size.value().max(Decimal::ZERO)).sum();
    prop_assert_eq!(oi.long, longs);

    // zero fees: every unit of quote one side gains the other loses
    let owed: Decimal = signers.iter().map(|s| engine.owed_realized_pnl(s.address()).value()).sum();
    let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl(at).value()).sum();
    prop_assert!(close_to_zero(owed + unrealized), "owed {} unrealized {}", owed, unrealized);
    prop_assert!(close_to_zero(engine.total_owed_realized_pnl().value() + unrealized));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Sizes, open interest and pnl stay balanced after every trade
    #[test]
    fn trades_keep_the_book_balanced(
        ops in prop::collection::vec(trade_strategy(), 1..16),
        valuation in 1i64..500i64,
    ) {
        let signers = signers();
        let (mut engine, market) = setup(&signers, dec!(1_000_000));
        let at = Price::new_unchecked(Decimal::new(valuation, 2));

        for (i, op) in ops.iter().enumerate() {
            run(&mut engine, market, &signers, op, i as u64 + 1);
            check_balanced(&engine, market, &signers, at)?;
        }
    }

    /// With little collateral many trades are rejected; the survivors still balance
    #[test]
    fn rejected_trades_leave_no_trace(
        ops in prop::collection::vec(trade_strategy(), 1..16),
    ) {
        let signers = signers();
        let (mut engine, market) = setup(&signers, dec!(20));
        let at = Price::new_unchecked(dec!(1));

        for (i, op) in ops.iter().enumerate() {
            let events_before = engine.events().len();
            let oi_before = engine.open_interest(market).unwrap();
            if !run(&mut engine, market, &signers, op, i as u64 + 1) {
                prop_assert_eq!(engine.events().len(), events_before);
                prop_assert_eq!(engine.open_interest(market).unwrap(), oi_before);
            }
            check_balanced(&engine, market, &signers, at)?;
            for s in &signers {
                prop_assert!(!engine.free_collateral(s.address()).unwrap().is_negative());
            }
        }
    }

    /// Funding owed across all traders nets to zero once a period closes
    #[test]
    fn funding_nets_to_zero(
        ops in prop::collection::vec(trade_strategy(), 1..10),
    ) {
        let signers = signers();
        let (mut engine, market) = setup(&signers, dec!(1_000_000));
        for (i, op) in ops.iter().enumerate() {
            run(&mut engine, market, &signers, op, i as u64 + 1);
        }

        engine.advance_time(8 * HOUR_MS);
        let pending: Decimal = signers
            .iter()
            .map(|s| engine.get_pending_funding_payment(s.address(), market).unwrap().value())
            .sum();
        prop_assert!(close_to_zero(pending));

        let mut settled = Decimal::ZERO;
        for s in &signers {
            for settlement in engine.settle_all_funding(s.address()).unwrap() {
                settled += settlement.payment.value();
            }
        }
        prop_assert!(close_to_zero(settled));
        check_balanced(&engine, market, &signers, Price::new_unchecked(dec!(1)))?;
    }

    /// A resting order's fill only grows, never past what it asked for
    #[test]
    fn fills_are_monotonic(
        resting in 100i64..10_000i64,
        takers in prop::collection::vec(1i64..3_000i64, 1..12),
    ) {
        let signers = signers();
        let (mut engine, market) = setup(&signers, dec!(1_000_000));
        let size = Decimal::new(resting, 2);
        let (left, left_sig) = order(&engine, market, &signers[0], Side::Short, size, dec!(1), 0);
        let hash = engine.order_hash(&left);

        let mut last = Decimal::ZERO;
        for (i, taker_size) in takers.iter().enumerate() {
            let (right, right_sig) = order(
                &engine,
                market,
                &signers[1 + i % (TRADERS - 1)],
                Side::Long,
                Decimal::new(*taker_size, 2),
                dec!(1),
                i as u64 + 1,
            );
            let result = engine.open_position(
                &AuthContext::new(addr(0x77)),
                &left,
                &left_sig,
                &right,
                &right_sig,
                None,
            );

            let filled = engine.filled_amount(&hash);
            prop_assert!(filled >= last);
            prop_assert!(filled <= left.take_asset.value);
            match result {
                Ok(m) => prop_assert_eq!(filled - last, m.fill.filled_take_left),
                Err(e) => {
                    prop_assert_eq!(e.kind(), ErrorKind::NothingToFill);
                    prop_assert_eq!(last, left.take_asset.value);
                }
            }
            last = filled;
        }
    }
}
