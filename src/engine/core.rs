// 8.0 engine/core.rs: main engine. holds markets, trader accounts, the fill ledger,
// price observations and the vault handle.

use super::results::EngineError;
use crate::access::{AccessControl, AuthContext};
use crate::account::{calculate_account_metrics, Account, AccountMetrics};
use crate::config::ClearingConfig;
use crate::custody::{CollateralVault, InMemoryVault};
use crate::events::{
    Event, EventId, EventPayload, MarketCreatedEvent, ObservationAdderChangedEvent,
};
use crate::margin::MarketValuation;
use crate::market::{Market, MarketConfig, MarketError};
use crate::matching::FillLedger;
use crate::observation::{Feed, PriceObservationLedger};
use crate::order::SignatureVerifier;
use crate::position::Position;
use crate::types::{Address, MarketId, Timestamp};
use std::collections::HashMap;
use tracing::{debug, info};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: ClearingConfig,
    pub(super) access: AccessControl,
    pub(super) markets: HashMap<MarketId, Market>,
    pub(super) accounts: HashMap<Address, Account>,
    pub(super) fills: FillLedger,
    pub(super) observations: PriceObservationLedger,
    pub(super) verifiers: HashMap<Address, Box<dyn SignatureVerifier>>,
    pub(super) vault: Box<dyn CollateralVault>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: ClearingConfig) -> Result<Self, EngineError> {
        Self::with_vault(config, Box::new(InMemoryVault::new()))
    }

    pub fn with_vault(config: ClearingConfig, vault: Box<dyn CollateralVault>) -> Result<Self, EngineError> {
        config.validate()?;
        info!(
            governance = %config.engine.governance,
            max_leverage = %config.margin.max_leverage,
            "clearing engine started"
        );
        Ok(Self {
            access: AccessControl::new(config.engine.governance),
            observations: PriceObservationLedger::new(config.observation.clone()),
            config,
            markets: HashMap::new(),
            accounts: HashMap::new(),
            fills: FillLedger::new(),
            verifiers: HashMap::new(),
            vault,
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
        })
    }

    pub fn config(&self) -> &ClearingConfig {
        &self.config
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    /// Governance only. The market id is the base token.
    pub fn create_market(&mut self, ctx: &AuthContext, config: MarketConfig) -> Result<MarketId, EngineError> {
        self.access.require_governance(ctx)?;
        config.validate()?;
        let market = config.id();
        if self.markets.contains_key(&market) {
            return Err(MarketError::AlreadyExists(market).into());
        }

        self.observations
            .register_market(market, config.seed_price, config.observation_adder);
        let quote_token = config.quote_token;
        self.markets.insert(market, Market::new(config, self.current_time));

        info!(%market, %quote_token, "market created");
        self.emit_event(EventPayload::MarketCreated(MarketCreatedEvent { market, quote_token }));
        Ok(market)
    }

    /// Governance only. Rewires who may push index observations.
    pub fn set_observation_adder(
        &mut self,
        ctx: &AuthContext,
        market: MarketId,
        adder: Address,
    ) -> Result<(), EngineError> {
        self.access.require_governance(ctx)?;
        self.market_ref(market)?;
        self.observations.set_adder(market, adder)?;
        let market_state = self.markets.get_mut(&market).ok_or(MarketError::NotFound(market))?;
        market_state.config.observation_adder = adder;

        info!(%market, %adder, "observation adder changed");
        self.emit_event(EventPayload::ObservationAdderChanged(ObservationAdderChangedEvent {
            market,
            adder,
        }));
        Ok(())
    }

    pub fn transfer_governance(&mut self, ctx: &AuthContext, new_governance: Address) -> Result<(), EngineError> {
        self.access.transfer_governance(ctx, new_governance)?;
        info!(%new_governance, "governance transferred");
        Ok(())
    }

    /// A contract trader registers the verifier its orders are checked with.
    pub fn register_signature_verifier(&mut self, ctx: &AuthContext, verifier: Box<dyn SignatureVerifier>) {
        debug!(trader = %ctx.caller, "signature verifier registered");
        self.verifiers.insert(ctx.caller, verifier);
    }

    pub fn market(&self, market: MarketId) -> Option<&Market> {
        self.markets.get(&market)
    }

    pub fn markets_iter(&self) -> impl Iterator<Item = (&MarketId, &Market)> {
        self.markets.iter()
    }

    pub fn account(&self, trader: Address) -> Option<&Account> {
        self.accounts.get(&trader)
    }

    pub fn accounts_iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    /// Flat when the trader never traded the market.
    pub fn position(&self, trader: Address, market: MarketId) -> Position {
        self.accounts
            .get(&trader)
            .map(|a| a.position(market))
            .unwrap_or_default()
    }

    pub fn vault(&self) -> &dyn CollateralVault {
        self.vault.as_ref()
    }

    pub fn vault_mut(&mut self) -> &mut dyn CollateralVault {
        self.vault.as_mut()
    }

    pub fn fill_ledger(&self) -> &FillLedger {
        &self.fills
    }

    pub fn observations(&self) -> &PriceObservationLedger {
        &self.observations
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn market_ref(&self, market: MarketId) -> Result<&Market, EngineError> {
        self.markets
            .get(&market)
            .ok_or_else(|| MarketError::NotFound(market).into())
    }

    /// Working copy of a trader's account, fresh if they have none yet.
    pub(super) fn account_copy(&self, trader: Address) -> Account {
        self.accounts
            .get(&trader)
            .cloned()
            .unwrap_or_else(|| Account::new(trader))
    }

    pub(super) fn store_account(&mut self, account: Account) {
        self.accounts.insert(account.trader, account);
    }

    /// Index SMA over the valuation window plus the funding global as it would be
    /// after settling whatever is due now.
    pub(super) fn valuation(&self, market: MarketId) -> Result<MarketValuation, EngineError> {
        let price = self.observations.sma_over(
            market,
            Feed::Index,
            self.current_time,
            self.config.margin.valuation_window_ms,
        )?;
        let preview = self.funding_preview(market)?;
        Ok(MarketValuation {
            price,
            cumulative_premium_growth: preview.global.cumulative_premium_growth,
        })
    }

    /// Valuations for every market the account holds a position in.
    pub(super) fn valuations_for(&self, account: &Account) -> Result<HashMap<MarketId, MarketValuation>, EngineError> {
        let mut out = HashMap::new();
        for (market, _) in account.open_positions() {
            out.insert(*market, self.valuation(*market)?);
        }
        Ok(out)
    }

    pub(super) fn metrics_for(&self, account: &Account) -> Result<AccountMetrics, EngineError> {
        let valuations = self.valuations_for(account)?;
        Ok(calculate_account_metrics(
            account,
            self.vault.balance_of(account.trader),
            &valuations,
            &self.config.margin,
        ))
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        debug!(id = event.id.0, payload = ?event.payload, "event");

        self.events.push(event);

        if self.events.len() > self.config.engine.max_events {
            let drain_count = self.events.len() - self.config.engine.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
