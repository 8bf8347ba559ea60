//! Funding settlement.

use super::core::Engine;
use super::results::{EngineError, FundingSettlement};
use crate::events::{EventPayload, FundingPaymentSettledEvent, FundingUpdatedEvent};
use crate::funding::{funding_phase, implied_rate, maybe_settle, settlement_window, FundingGlobal, FundingPhase};
use crate::market::MarketError;
use crate::observation::Feed;
use crate::types::{Address, MarketId, Price, Quote};
use tracing::{debug, info};

/// A market's funding global as it would be after a touch right now.
#[derive(Debug, Clone, Copy)]
pub(super) struct FundingPreview {
    pub global: FundingGlobal,
    /// (mark, index) SMAs used, None when no period elapsed
    pub smas: Option<(Price, Price)>,
}

impl Engine {
    pub(super) fn funding_preview(&self, market: MarketId) -> Result<FundingPreview, EngineError> {
        let state = self.market_ref(market)?;
        let params = &state.config.funding_params;
        let Some((start, end)) = settlement_window(&state.funding, self.current_time, params) else {
            return Ok(FundingPreview {
                global: state.funding,
                smas: None,
            });
        };

        let mark_sma = self.observations.epoch_sma(market, Feed::Mark, start, end)?;
        let index_sma = self.observations.epoch_sma(market, Feed::Index, start, end)?;
        Ok(FundingPreview {
            global: maybe_settle(&state.funding, mark_sma, index_sma, self.current_time, params),
            smas: Some((mark_sma, index_sma)),
        })
    }

    /// Writes a preview back. No-op when nothing was due.
    pub(super) fn commit_funding(&mut self, market: MarketId, preview: FundingPreview) -> Result<(), EngineError> {
        let Some((mark_sma, index_sma)) = preview.smas else {
            return Ok(());
        };
        let state = self.markets.get_mut(&market).ok_or(MarketError::NotFound(market))?;
        let increment = preview.global.cumulative_premium_growth - state.funding.cumulative_premium_growth;
        let periods = (preview.global.last_settlement.as_millis() - state.funding.last_settlement.as_millis())
            / state.config.funding_params.period_ms.max(1);
        let funding_rate = implied_rate(increment, index_sma, periods);
        state.funding = preview.global;

        info!(
            %market,
            %mark_sma,
            %index_sma,
            %increment,
            %funding_rate,
            settled_through = %preview.global.last_settlement,
            "funding settled"
        );
        self.emit_event(EventPayload::FundingUpdated(FundingUpdatedEvent {
            market,
            mark_sma,
            index_sma,
            cumulative_premium_growth: preview.global.cumulative_premium_growth,
            funding_rate,
            settled_through: preview.global.last_settlement,
        }));
        Ok(())
    }

    /// Touches the market's funding global without settling any trader.
    pub fn advance_funding(&mut self, market: MarketId) -> Result<FundingGlobal, EngineError> {
        let preview = self.funding_preview(market)?;
        self.commit_funding(market, preview)?;
        Ok(preview.global)
    }

    pub fn funding_phase(&self, market: MarketId) -> Result<FundingPhase, EngineError> {
        let state = self.market_ref(market)?;
        Ok(funding_phase(&state.funding, self.current_time, &state.config.funding_params))
    }

    /// Settles the trader's funding in every market they hold, advancing each
    /// market's global first. Payments land in owed realized pnl.
    pub fn settle_all_funding(&mut self, trader: Address) -> Result<Vec<FundingSettlement>, EngineError> {
        let mut account = self.account_copy(trader);
        let markets: Vec<MarketId> = account.open_positions().map(|(m, _)| *m).collect();

        let mut previews = Vec::with_capacity(markets.len());
        for market in &markets {
            previews.push((*market, self.funding_preview(*market)?));
        }

        let mut settlements = Vec::new();
        for (market, preview) in &previews {
            let payment = account.settle_funding(*market, preview.global.cumulative_premium_growth);
            settlements.push(FundingSettlement {
                market: *market,
                payment,
            });
        }

        // commit
        for (market, preview) in previews {
            self.commit_funding(market, preview)?;
        }
        if !markets.is_empty() {
            self.store_account(account);
        }
        for settlement in &settlements {
            self.emit_funding_payment(trader, settlement.market, settlement.payment);
        }
        Ok(settlements)
    }

    /// Read-only. Positive means the trader would pay.
    pub fn get_pending_funding_payment(&self, trader: Address, market: MarketId) -> Result<Quote, EngineError> {
        let preview = self.funding_preview(market)?;
        Ok(self
            .position(trader, market)
            .pending_funding(preview.global.cumulative_premium_growth))
    }

    pub(super) fn emit_funding_payment(&mut self, trader: Address, market: MarketId, payment: Quote) {
        if payment.is_zero() {
            return;
        }
        debug!(%trader, %market, %payment, "funding payment settled");
        self.emit_event(EventPayload::FundingPaymentSettled(FundingPaymentSettledEvent {
            trader,
            market,
            payment,
        }));
    }
}
