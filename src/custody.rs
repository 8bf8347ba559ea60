// 9.4 custody.rs: the collateral vault seam. the engine only reads balances and moves
// settled pnl in or out; token transfers themselves live behind this trait.
// InMemoryVault is the mocked implementation used by the simulator and tests.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::{Address, Quote};

/// External collateral holder. Called only after the engine's ledgers are updated.
pub trait CollateralVault: fmt::Debug {
    fn balance_of(&self, trader: Address) -> Quote;
    fn debit(&mut self, trader: Address, amount: Quote) -> Result<(), CustodyError>;
    fn credit(&mut self, trader: Address, amount: Quote) -> Result<(), CustodyError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryVault {
    balances: HashMap<Address, Decimal>,
    total_credited: Decimal,
    total_debited: Decimal,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixture helper: starts a trader with `amount` of collateral.
    pub fn with_balance(mut self, trader: Address, amount: Decimal) -> Self {
        *self.balances.entry(trader).or_insert(Decimal::ZERO) += amount;
        self
    }

    pub fn total_balance(&self) -> Decimal {
        self.balances.values().sum()
    }

    pub fn total_credited(&self) -> Decimal {
        self.total_credited
    }

    pub fn total_debited(&self) -> Decimal {
        self.total_debited
    }
}

impl CollateralVault for InMemoryVault {
    fn balance_of(&self, trader: Address) -> Quote {
        Quote::new(self.balances.get(&trader).copied().unwrap_or(Decimal::ZERO))
    }

    fn debit(&mut self, trader: Address, amount: Quote) -> Result<(), CustodyError> {
        if amount.is_negative() {
            return Err(CustodyError::InvalidAmount(amount));
        }
        let available = self.balance_of(trader);
        if amount > available {
            return Err(CustodyError::InsufficientBalance {
                trader,
                available,
                requested: amount,
            });
        }
        *self.balances.entry(trader).or_insert(Decimal::ZERO) -= amount.value();
        self.total_debited += amount.value();
        Ok(())
    }

    fn credit(&mut self, trader: Address, amount: Quote) -> Result<(), CustodyError> {
        if amount.is_negative() {
            return Err(CustodyError::InvalidAmount(amount));
        }
        *self.balances.entry(trader).or_insert(Decimal::ZERO) += amount.value();
        self.total_credited += amount.value();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("Insufficient balance for {trader}: available {available}, requested {requested}")]
    InsufficientBalance {
        trader: Address,
        available: Quote,
        requested: Quote,
    },

    #[error("Invalid transfer amount {0}")]
    InvalidAmount(Quote),

    #[error("Vault rejected transfer: {0}")]
    Rejected(String),
}
