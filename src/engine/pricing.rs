//! Price observations and SMA queries.

use super::core::Engine;
use super::results::EngineError;
use crate::access::AuthContext;
use crate::events::{EventPayload, ObservationAddedEvent};
use crate::observation::{Feed, ObservationError, PriceObservation};
use crate::order::PriceSource;
use crate::types::{MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, warn};

impl Engine {
    /// Pushes an index price stamped with the engine clock.
    /// Only the market's observation adder may call this.
    pub fn add_observation(
        &mut self,
        ctx: &AuthContext,
        market: MarketId,
        price: Decimal,
    ) -> Result<Price, EngineError> {
        self.add_observation_at(ctx, market, price, self.current_time)
    }

    /// Pushes an index price observed at `timestamp`. It may not be older than the
    /// feed's latest observation nor newer than the engine clock.
    pub fn add_observation_at(
        &mut self,
        ctx: &AuthContext,
        market: MarketId,
        price: Decimal,
        timestamp: Timestamp,
    ) -> Result<Price, EngineError> {
        self.market_ref(market)?;
        if timestamp > self.current_time {
            warn!(%market, %timestamp, now = %self.current_time, "observation from the future rejected");
            return Err(ObservationError::FromFuture {
                now: self.current_time,
                got: timestamp,
            }
            .into());
        }
        let price = match self
            .observations
            .check_observation(ctx.caller, market, price, timestamp)
        {
            Ok(price) => price,
            Err(e) => {
                warn!(%market, caller = %ctx.caller, error = %e, "observation rejected");
                return Err(e.into());
            }
        };
        self.observations
            .append(market, Feed::Index, PriceObservation { timestamp, price })?;

        debug!(%market, %price, %timestamp, "index observation added");
        self.emit_event(EventPayload::ObservationAdded(ObservationAddedEvent { market, price }));
        Ok(price)
    }

    /// Index SMA over `[now - window, now]`.
    pub fn latest_sma(&self, market: MarketId, window_ms: i64) -> Result<Price, EngineError> {
        Ok(self
            .observations
            .sma_over(market, Feed::Index, self.current_time, window_ms)?)
    }

    /// Mark (trade price) SMA over `[now - window, now]`.
    pub fn latest_mark_sma(&self, market: MarketId, window_ms: i64) -> Result<Price, EngineError> {
        Ok(self
            .observations
            .sma_over(market, Feed::Mark, self.current_time, window_ms)?)
    }

    pub fn epoch_sma(
        &self,
        market: MarketId,
        feed: Feed,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Price, EngineError> {
        Ok(self.observations.epoch_sma(market, feed, start, end)?)
    }

    pub fn last_price(&self, market: MarketId, feed: Feed) -> Result<Price, EngineError> {
        Ok(self.observations.last_price(market, feed)?)
    }

    /// Price positions are margined and liquidated at.
    pub fn valuation_price(&self, market: MarketId) -> Result<Price, EngineError> {
        self.latest_sma(market, self.config.margin.valuation_window_ms)
    }

    // 8.3: what a conditional order's trigger is compared against
    pub(super) fn reference_price(&self, market: MarketId, source: PriceSource) -> Result<Price, EngineError> {
        let window = self.config.margin.valuation_window_ms;
        match source {
            PriceSource::Index => self.latest_sma(market, window),
            PriceSource::Mark => self.latest_mark_sma(market, window),
            PriceSource::Last => self.last_price(market, Feed::Mark),
        }
    }
}
