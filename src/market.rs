//! Market configuration and state.
//!
//! A market is a base token traded against a quote token. Governance creates
//! it once; after that only its funding state and open interest change.

use crate::funding::{FundingGlobal, FundingParams};
use crate::types::{Address, MarketId, Price, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static market configuration (immutable after creation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub base_token: Address,
    pub quote_token: Address,
    pub funding_params: FundingParams,
    /// price both feeds report until the first observation lands
    pub seed_price: Price,
    pub observation_adder: Address,
}

impl MarketConfig {
    pub fn new(base_token: Address, quote_token: Address, seed_price: Price, observation_adder: Address) -> Self {
        Self {
            base_token,
            quote_token,
            funding_params: FundingParams::default(),
            seed_price,
            observation_adder,
        }
    }

    pub fn with_funding(mut self, funding_params: FundingParams) -> Self {
        self.funding_params = funding_params;
        self
    }

    pub fn id(&self) -> MarketId {
        MarketId(self.base_token)
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if self.base_token == self.quote_token {
            return Err(MarketError::SameToken(self.base_token));
        }
        if self.funding_params.period_ms <= 0 {
            return Err(MarketError::InvalidFunding("period must be positive".to_string()));
        }
        if self.funding_params.max_funding_rate < Decimal::ZERO {
            return Err(MarketError::InvalidFunding("max funding rate must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Long and short open interest in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub long: Decimal,
    pub short: Decimal,
}

impl OpenInterest {
    /// Applies one trader's position change.
    pub fn update(&mut self, old: SignedSize, new: SignedSize) {
        let long_part = |s: SignedSize| s.value().max(Decimal::ZERO);
        let short_part = |s: SignedSize| (-s.value()).max(Decimal::ZERO);
        self.long += long_part(new) - long_part(old);
        self.short += short_part(new) - short_part(old);
    }

    pub fn is_balanced(&self) -> bool {
        self.long == self.short
    }
}

/// Dynamic market state (changes during trading)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub config: MarketConfig,
    pub funding: FundingGlobal,
    pub open_interest: OpenInterest,
    pub created_at: Timestamp,
}

impl Market {
    pub fn new(config: MarketConfig, now: Timestamp) -> Self {
        Self {
            config,
            funding: FundingGlobal::new(now),
            open_interest: OpenInterest::default(),
            created_at: now,
        }
    }

    pub fn id(&self) -> MarketId {
        self.config.id()
    }

    pub fn quote_token(&self) -> Address {
        self.config.quote_token
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0} not found")]
    NotFound(MarketId),

    #[error("Market {0} already exists")]
    AlreadyExists(MarketId),

    #[error("Base and quote token are both {0}")]
    SameToken(Address),

    #[error("Invalid funding config: {0}")]
    InvalidFunding(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> MarketConfig {
        MarketConfig::new(
            Address::from_low_u64(0xb1),
            Address::from_low_u64(0xc1),
            Price::new_unchecked(dec!(1)),
            Address::from_low_u64(0xa0),
        )
    }

    #[test]
    fn market_id_is_base_token() {
        assert_eq!(config().id(), MarketId(Address::from_low_u64(0xb1)));
        assert!(config().validate().is_ok());
    }

    #[test]
    fn same_token_rejected() {
        let mut c = config();
        c.quote_token = c.base_token;
        assert!(matches!(c.validate(), Err(MarketError::SameToken(_))));
    }

    #[test]
    fn open_interest_tracks_flips() {
        let mut oi = OpenInterest::default();
        // a opens long 10, b short 10
        oi.update(SignedSize::zero(), SignedSize::new(dec!(10)));
        oi.update(SignedSize::zero(), SignedSize::new(dec!(-10)));
        assert_eq!(oi.long, dec!(10));
        assert!(oi.is_balanced());

        // both flip by 20
        oi.update(SignedSize::new(dec!(10)), SignedSize::new(dec!(-10)));
        oi.update(SignedSize::new(dec!(-10)), SignedSize::new(dec!(10)));
        assert_eq!(oi.long, dec!(10));
        assert_eq!(oi.short, dec!(10));
    }
}
