//! Account queries and owed pnl settlement.

use super::core::Engine;
use super::results::EngineError;
use crate::account::AccountMetrics;
use crate::events::{EventPayload, OwedPnlSettledEvent};
use crate::market::{MarketError, OpenInterest};
use crate::types::{Address, MarketId, Quote};
use rust_decimal::Decimal;
use tracing::{debug, warn};

impl Engine {
    pub fn account_metrics(&self, trader: Address) -> Result<AccountMetrics, EngineError> {
        let account = self.account_copy(trader);
        self.metrics_for(&account)
    }

    /// Account value minus the initial requirement of every open position.
    pub fn free_collateral(&self, trader: Address) -> Result<Quote, EngineError> {
        Ok(self.account_metrics(trader)?.free_collateral)
    }

    /// Vault balance + owed realized pnl + unrealized pnl - pending funding.
    pub fn account_value(&self, trader: Address) -> Result<Quote, EngineError> {
        Ok(self.account_metrics(trader)?.account_value)
    }

    pub fn owed_realized_pnl(&self, trader: Address) -> Quote {
        self.accounts
            .get(&trader)
            .map(|a| a.owed_realized_pnl)
            .unwrap_or_else(Quote::zero)
    }

    pub fn open_interest(&self, market: MarketId) -> Result<OpenInterest, EngineError> {
        Ok(self.market_ref(market)?.open_interest)
    }

    /// Moves owed realized pnl into the vault. Gains are credited in full, losses
    /// are debited up to the vault balance and the rest stays owed.
    /// Returns the amount moved, positive when credited.
    pub fn settle_owed_realized_pnl(&mut self, trader: Address) -> Result<Quote, EngineError> {
        let Some(previous) = self.accounts.get(&trader).cloned() else {
            return Ok(Quote::zero());
        };
        let owed = previous.owed_realized_pnl;
        if owed.is_zero() {
            return Ok(Quote::zero());
        }

        let moved = if owed.is_positive() {
            owed
        } else {
            let available = self.vault.balance_of(trader).value().max(Decimal::ZERO);
            Quote::new(-owed.abs().value().min(available))
        };
        if moved.is_zero() {
            return Ok(Quote::zero());
        }

        // ledger first, transfer last
        let mut account = previous.clone();
        account.owed_realized_pnl = owed.sub(moved);
        self.store_account(account);

        let transfer = if moved.is_positive() {
            self.vault.credit(trader, moved)
        } else {
            self.vault.debit(trader, moved.abs())
        };
        if let Err(e) = transfer {
            warn!(%trader, amount = %moved, error = %e, "vault transfer failed, owed pnl restored");
            self.store_account(previous);
            return Err(e.into());
        }

        debug!(%trader, amount = %moved, remaining = %owed.sub(moved), "owed pnl settled");
        self.emit_event(EventPayload::OwedPnlSettled(OwedPnlSettledEvent { trader, amount: moved }));
        Ok(moved)
    }

    /// Sum of every account's owed realized pnl.
    pub fn total_owed_realized_pnl(&self) -> Quote {
        self.accounts.values().map(|a| a.owed_realized_pnl).sum()
    }

    pub(super) fn require_market(&self, market: MarketId) -> Result<(), EngineError> {
        if self.markets.contains_key(&market) {
            Ok(())
        } else {
            Err(MarketError::NotFound(market).into())
        }
    }
}
