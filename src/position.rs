// 4.0: one trader's position in one market. size plus open notional, nothing else.
// open notional is the quote that flowed in or out to build the position, so a long
// carries negative open notional and unrealized pnl = size * price + open_notional.
// 4.1 has the fill logic: increase, reduce, close, flip.

use crate::margin::notional_value;
use crate::types::{Price, Quote, Side, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub size: SignedSize,
    pub open_notional: Quote,
    /// cumulative premium growth of the market when funding was last settled
    pub last_premium_growth: Decimal,
}

impl Position {
    pub fn new(size: SignedSize, open_notional: Quote, last_premium_growth: Decimal) -> Self {
        Self {
            size,
            open_notional,
            last_premium_growth,
        }
    }

    pub fn flat(last_premium_growth: Decimal) -> Self {
        Self {
            size: SignedSize::zero(),
            open_notional: Quote::zero(),
            last_premium_growth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_zero()
    }

    pub fn side(&self) -> Option<Side> {
        self.size.side()
    }

    pub fn unrealized_pnl(&self, price: Price) -> Quote {
        calculate_unrealized_pnl(self.size, self.open_notional, price)
    }

    pub fn notional_value(&self, price: Price) -> Quote {
        notional_value(self.size, price)
    }

    pub fn average_entry_price(&self) -> Option<Price> {
        if self.size.is_zero() {
            return None;
        }
        Price::new(-self.open_notional.value() / self.size.value())
    }

    /// Positive means the trader owes funding.
    pub fn pending_funding(&self, cumulative_premium_growth: Decimal) -> Quote {
        Quote::new(self.size.value() * (cumulative_premium_growth - self.last_premium_growth))
    }

    // 4.1: split a fill into closing and opening legs. realized pnl only on the closing leg.
    pub fn apply_fill(&self, delta_size: SignedSize, delta_notional: Quote) -> FillOutcome {
        let d = delta_size.value();
        let dn = delta_notional.value();
        let open = self.open_notional.value();
        let size = self.size.value();

        if d.is_zero() {
            return FillOutcome {
                position: *self,
                realized_pnl: Quote::zero(),
                closed_size: Decimal::ZERO,
            };
        }

        // flat or adding in the same direction
        if self.size.is_zero() || !self.size.opposes(delta_size) {
            return FillOutcome {
                position: Position {
                    size: self.size.add(d),
                    open_notional: Quote::new(open + dn),
                    last_premium_growth: self.last_premium_growth,
                },
                realized_pnl: Quote::zero(),
                closed_size: Decimal::ZERO,
            };
        }

        let closed = d.abs().min(size.abs());
        let realized = if d.abs() <= size.abs() {
            // the whole fill closes: release a proportional slice of the open notional
            open * closed / size.abs() + dn
        } else {
            // flip: the whole old position closes against part of the fill
            open + dn * closed / d.abs()
        };

        let new_size = size + d;
        let new_notional = if new_size.is_zero() {
            Decimal::ZERO
        } else {
            open + dn - realized
        };

        FillOutcome {
            position: Position {
                size: SignedSize::new(new_size),
                open_notional: Quote::new(new_notional),
                last_premium_growth: self.last_premium_growth,
            },
            realized_pnl: Quote::new(realized),
            closed_size: closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    pub position: Position,
    pub realized_pnl: Quote,
    /// absolute base units that reduced the old position
    pub closed_size: Decimal,
}

// 4.2: the pnl formula
pub fn calculate_unrealized_pnl(size: SignedSize, open_notional: Quote, price: Price) -> Quote {
    Quote::new(size.value() * price.value() + open_notional.value())
}

/// Quote flow for trading `size` at `price`: buying base costs quote.
pub fn fill_notional(delta_size: SignedSize, price: Price) -> Quote {
    Quote::new(-delta_size.value() * price.value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price(p: Decimal) -> Price {
        Price::new_unchecked(p)
    }

    fn fill(pos: &Position, size: Decimal, at: Decimal) -> FillOutcome {
        let delta = SignedSize::new(size);
        pos.apply_fill(delta, fill_notional(delta, price(at)))
    }

    #[test]
    fn open_long_from_flat() {
        let out = fill(&Position::default(), dec!(10), dec!(1));
        assert_eq!(out.position.size.value(), dec!(10));
        assert_eq!(out.position.open_notional.value(), dec!(-10));
        assert_eq!(out.position.average_entry_price().unwrap().value(), dec!(1));
        assert!(out.realized_pnl.is_zero());
    }

    #[test]
    fn increase_averages_entry() {
        let pos = fill(&Position::default(), dec!(10), dec!(100)).position;
        let out = fill(&pos, dec!(10), dec!(110));
        assert_eq!(out.position.size.value(), dec!(20));
        assert_eq!(out.position.average_entry_price().unwrap().value(), dec!(105));
    }

    #[test]
    fn partial_reduce_realizes_proportionally() {
        let pos = fill(&Position::default(), dec!(10), dec!(1)).position;
        let out = fill(&pos, dec!(-4), dec!(2));
        // 4 * (2 - 1)
        assert_eq!(out.realized_pnl.value(), dec!(4));
        assert_eq!(out.position.size.value(), dec!(6));
        assert_eq!(out.position.open_notional.value(), dec!(-6));
        assert_eq!(out.closed_size, dec!(4));
    }

    #[test]
    fn full_close_zeroes_notional() {
        let pos = fill(&Position::default(), dec!(-3), dec!(50)).position;
        let out = fill(&pos, dec!(3), dec!(40));
        // short from 50, bought back at 40
        assert_eq!(out.realized_pnl.value(), dec!(30));
        assert!(out.position.is_empty());
        assert!(out.position.open_notional.is_zero());
    }

    #[test]
    fn flip_realizes_old_and_opens_new() {
        let pos = fill(&Position::default(), dec!(10), dec!(1)).position;
        let out = fill(&pos, dec!(-20), dec!(1.5));
        assert_eq!(out.realized_pnl.value(), dec!(5));
        assert_eq!(out.position.size.value(), dec!(-10));
        assert_eq!(out.position.open_notional.value(), dec!(15));
        assert_eq!(out.position.average_entry_price().unwrap().value(), dec!(1.5));
        assert_eq!(out.closed_size, dec!(10));
    }

    #[test]
    fn unrealized_pnl_signs() {
        let long = fill(&Position::default(), dec!(2), dec!(100)).position;
        assert_eq!(long.unrealized_pnl(price(dec!(110))).value(), dec!(20));
        let short = fill(&Position::default(), dec!(-2), dec!(100)).position;
        assert_eq!(short.unrealized_pnl(price(dec!(110))).value(), dec!(-20));
    }

    #[test]
    fn pending_funding_sign() {
        let long = Position::new(SignedSize::new(dec!(5)), Quote::new(dec!(-5)), dec!(0.1));
        // growth went up: longs pay
        assert_eq!(long.pending_funding(dec!(0.3)).value(), dec!(1.0));
        let short = Position::new(SignedSize::new(dec!(-5)), Quote::new(dec!(5)), dec!(0.1));
        assert_eq!(short.pending_funding(dec!(0.3)).value(), dec!(-1.0));
    }
}
