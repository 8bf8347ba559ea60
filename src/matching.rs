// 2.5: pairing two signed orders. the left order is the resting one and its price wins,
// the right order is the aggressor and may get a better price than it quoted.
// fills are tracked per order hash in take asset units and only ever grow.

use crate::order::{Order, OrderError};
use crate::types::{Address, OrderHash, Price, Quote, SignedSize};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// token amounts carry 18 decimals on the wire; partial amounts round toward zero there
const AMOUNT_DP: u32 = 18;

/// Amounts moved by one match, named from each order's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedFill {
    pub filled_make_left: Decimal,
    pub filled_take_left: Decimal,
    pub filled_make_right: Decimal,
    pub filled_take_right: Decimal,
}

/// Position deltas a fill produces for each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillLegs {
    pub left_size: SignedSize,
    pub left_notional: Quote,
    pub right_size: SignedSize,
    pub right_notional: Quote,
}

impl MatchedFill {
    /// Base units that changed hands.
    pub fn base_amount(&self, left: &Order) -> Decimal {
        if left.is_short {
            self.filled_make_left
        } else {
            self.filled_take_left
        }
    }

    /// Quote units that changed hands.
    pub fn quote_amount(&self, left: &Order) -> Decimal {
        if left.is_short {
            self.filled_take_left
        } else {
            self.filled_make_left
        }
    }

    pub fn clearing_price(&self, left: &Order) -> Option<Price> {
        let base = self.base_amount(left);
        if base.is_zero() {
            return None;
        }
        self.quote_amount(left).checked_div(base).and_then(Price::new)
    }

    // a long receives base and pays quote, so its open notional goes negative
    pub fn legs(&self, left: &Order) -> FillLegs {
        let base = self.base_amount(left);
        let quote = self.quote_amount(left);
        let (left_size, left_notional) = if left.is_short {
            (-base, quote)
        } else {
            (base, -quote)
        };
        FillLegs {
            left_size: SignedSize::new(left_size),
            left_notional: Quote::new(left_notional),
            right_size: SignedSize::new(-left_size),
            right_notional: Quote::new(-left_notional),
        }
    }
}

fn partial_floor(a: Decimal, b: Decimal, denominator: Decimal) -> Result<Decimal, OrderError> {
    a.checked_mul(b)
        .and_then(|v| v.checked_div(denominator))
        .map(|v| v.round_dp_with_strategy(AMOUNT_DP, RoundingStrategy::ToZero))
        .ok_or(OrderError::Overflow("counter value at the resting price"))
}

/// Computes the fill between two orders given their cumulative fills.
/// Pure: the caller records the result with `FillLedger::record`.
pub fn compute_fill(
    left: &Order,
    left_filled: Decimal,
    right: &Order,
    right_filled: Decimal,
) -> Result<MatchedFill, OrderError> {
    let (left_make, left_take) = left.remaining(left_filled)?;
    let (right_make, right_take) = right.remaining(right_filled)?;

    if left_make.is_zero() || left_take.is_zero() || right_make.is_zero() || right_take.is_zero() {
        return Err(OrderError::NothingToFill);
    }

    // (what left gives, what right gives)
    let (left_value, right_value) = if right_take > left_make {
        // right wants more than left has left: left fills completely at its own price
        let right_needs = partial_floor(left_take, right.take_asset.value, right.make_asset.value)?;
        if right_needs > left_make {
            return Err(OrderError::UnfavorablePrice);
        }
        (left_make, left_take)
    } else {
        // right fills completely. left's price decides what right pays
        let maker_value = partial_floor(right_take, left.take_asset.value, left.make_asset.value)?;
        if maker_value > right_make {
            return Err(OrderError::UnfavorablePrice);
        }
        (right_take, maker_value)
    };

    if left_value.is_zero() || right_value.is_zero() {
        return Err(OrderError::NothingToFill);
    }

    Ok(MatchedFill {
        filled_make_left: left_value,
        filled_take_left: right_value,
        filled_make_right: right_value,
        filled_take_right: left_value,
    })
}

/// Cumulative fills per order hash plus the per-trader salt floor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillLedger {
    fills: HashMap<OrderHash, Decimal>,
    min_salts: HashMap<Address, u64>,
    cancelled: HashSet<OrderHash>,
}

impl FillLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filled(&self, hash: &OrderHash) -> Decimal {
        self.fills.get(hash).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn min_salt(&self, trader: Address) -> u64 {
        self.min_salts.get(&trader).copied().unwrap_or(0)
    }

    pub fn is_cancelled(&self, hash: &OrderHash, order: &Order) -> bool {
        self.cancelled.contains(hash) || order.salt < self.min_salt(order.trader)
    }

    pub fn check_not_cancelled(&self, hash: &OrderHash, order: &Order) -> Result<(), OrderError> {
        if self.is_cancelled(hash, order) {
            return Err(OrderError::Cancelled(*hash));
        }
        Ok(())
    }

    /// Adds this match to both orders. Cumulative fill never exceeds the take value.
    pub fn record(
        &mut self,
        left_hash: OrderHash,
        left: &Order,
        right_hash: OrderHash,
        right: &Order,
        fill: &MatchedFill,
    ) {
        let left_total = (self.filled(&left_hash) + fill.filled_take_left).min(left.take_asset.value);
        self.fills.insert(left_hash, left_total);
        let right_total =
            (self.filled(&right_hash) + fill.filled_take_right).min(right.take_asset.value);
        self.fills.insert(right_hash, right_total);
    }

    /// Marks the order as fully consumed so it can never match again.
    pub fn cancel(&mut self, hash: OrderHash, order: &Order) {
        self.fills.insert(hash, order.take_asset.value);
        self.cancelled.insert(hash);
    }

    /// One way ratchet: every order with a lower salt becomes unusable.
    pub fn raise_min_salt(&mut self, trader: Address, min_salt: u64) -> Result<(), OrderError> {
        let current = self.min_salt(trader);
        if min_salt <= current {
            return Err(OrderError::SaltTooLow {
                trader,
                current,
                requested: min_salt,
            });
        }
        self.min_salts.insert(trader, min_salt);
        Ok(())
    }
}
