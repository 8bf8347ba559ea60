// 7.0 config.rs: all settings in one place. fees, margins, liquidation, observations.
// 7.1 FeeConfig has maker/taker fees and where they go.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::EngineConfig;
use crate::funding::FundingParams;
use crate::liquidation::LiquidationParams;
use crate::margin::MarginParams;
use crate::observation::ObservationConfig;
use crate::types::{Address, Bps, Leverage, Quote};

/** 7.1: fee settings. maker/taker in bps. 100 bps = 1% */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    // Maker fee in basis points (negative = rebate)
    pub maker_fee_bps: i32,
    // Taker fee in basis points
    pub taker_fee_bps: u32,
    // Collects trading fees and the protocol cut of liquidation penalties
    pub fee_receiver: Address,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_fee_bps: 2, // 0.02%
            taker_fee_bps: 5, // 0.05%
            fee_receiver: Address::ZERO,
        }
    }
}

impl FeeConfig {
    pub fn maker_fee(&self, notional: Quote) -> Quote {
        notional.abs().mul(Bps::new(self.maker_fee_bps).as_fraction())
    }

    pub fn taker_fee(&self, notional: Quote) -> Quote {
        notional.abs().mul(Bps::new(self.taker_fee_bps as i32).as_fraction())
    }
}

// The complete clearing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearingConfig {
    pub engine: EngineConfig,
    pub margin: MarginParams,
    pub liquidation: LiquidationParams,
    pub fees: FeeConfig,
    pub observation: ObservationConfig,
    // Funding applied to markets created without explicit params
    pub default_funding: FundingParams,
}

impl ClearingConfig {
    // Create a configuration preset for testnet
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.margin.max_leverage = Leverage::new_unchecked(dec!(10)); // 10x max
        config.margin.maintenance_margin_ratio = dec!(0.05);
        config.liquidation.penalty_ratio = dec!(0.02);
        config.fees.maker_fee_bps = 0; // free makers on testnet
        config.fees.taker_fee_bps = 1; // minimal taker fee
        config
    }

    // Create a configuration preset for mainnet with conservative settings
    pub fn mainnet_conservative() -> Self {
        let mut config = Self::default();
        config.margin.max_leverage = Leverage::new_unchecked(dec!(4)); // 4x max
        config.margin.maintenance_margin_ratio = dec!(0.1);
        config.margin.valuation_window_ms = 30 * 60 * 1000; // 30 minute index SMA
        config.default_funding.max_funding_rate = dec!(0.0075);
        config
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClearingConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "loaded clearing config");
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        // margin checks
        let mmr = self.margin.maintenance_margin_ratio;
        if mmr <= Decimal::ZERO || mmr >= Decimal::ONE {
            return Err(ConfigError::InvalidMargin {
                reason: "MM ratio must be between 0 and 1".to_string(),
            });
        }
        // maintenance must sit below initial margin
        if mmr >= self.margin.max_leverage.initial_margin_fraction() {
            return Err(ConfigError::InvalidMargin {
                reason: "MM ratio must be below the initial margin fraction".to_string(),
            });
        }
        if self.margin.valuation_window_ms <= 0 {
            return Err(ConfigError::InvalidMargin {
                reason: "Valuation window must be positive".to_string(),
            });
        }

        // liquidation checks
        let liq = &self.liquidation;
        if liq.penalty_ratio < Decimal::ZERO || liq.penalty_ratio >= Decimal::ONE {
            return Err(ConfigError::InvalidLiquidation {
                reason: "Penalty ratio must be in [0, 1)".to_string(),
            });
        }
        if liq.liquidator_share < Decimal::ZERO || liq.liquidator_share > Decimal::ONE {
            return Err(ConfigError::InvalidLiquidation {
                reason: "Liquidator share must be in [0, 1]".to_string(),
            });
        }

        // fee checks
        if self.fees.taker_fee_bps > 100 {
            return Err(ConfigError::InvalidFees {
                reason: "Taker fee too high (>1%)".to_string(),
            });
        }
        if -self.fees.maker_fee_bps > self.fees.taker_fee_bps as i32 {
            return Err(ConfigError::InvalidFees {
                reason: "Maker rebate exceeds taker fee".to_string(),
            });
        }

        // funding checks
        if self.default_funding.period_ms <= 0 || self.default_funding.max_funding_rate < Decimal::ZERO {
            return Err(ConfigError::InvalidFunding {
                reason: "Funding period must be positive and cap non-negative".to_string(),
            });
        }

        // observation checks
        let obs = &self.observation;
        if obs.epoch_ms <= 0 || obs.epoch_capacity == 0 || obs.sample_capacity == 0 {
            return Err(ConfigError::InvalidObservation {
                reason: "Epoch length and ring capacities must be positive".to_string(),
            });
        }

        if self.engine.max_events == 0 {
            return Err(ConfigError::InvalidEngine {
                reason: "Event log needs room for at least one event".to_string(),
            });
        }

        Ok(())
    }

    pub fn max_leverage(&self) -> Decimal {
        self.margin.max_leverage.value()
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid margin config: {reason}")]
    InvalidMargin { reason: String },

    #[error("Invalid liquidation config: {reason}")]
    InvalidLiquidation { reason: String },

    #[error("Invalid fee config: {reason}")]
    InvalidFees { reason: String },

    #[error("Invalid funding config: {reason}")]
    InvalidFunding { reason: String },

    #[error("Invalid observation config: {reason}")]
    InvalidObservation { reason: String },

    #[error("Invalid engine config: {reason}")]
    InvalidEngine { reason: String },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Config read error: {0}")]
    Io(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ClearingConfig {
        match self {
            Environment::Development => ClearingConfig::default(),
            Environment::Testnet => ClearingConfig::testnet(),
            Environment::Mainnet => ClearingConfig::mainnet_conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ClearingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_leverage(), Decimal::new(5, 0));
    }

    #[test]
    fn test_testnet_config_valid() {
        let config = ClearingConfig::testnet();
        assert!(config.validate().is_ok());
        assert_eq!(config.fees.maker_fee_bps, 0);
        assert_eq!(config.max_leverage(), Decimal::new(10, 0));
    }

    #[test]
    fn test_mainnet_config_valid() {
        let config = ClearingConfig::mainnet_conservative();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_leverage(), Decimal::new(4, 0));
    }

    #[test]
    fn test_invalid_margin() {
        let mut config = ClearingConfig::default();
        config.margin.maintenance_margin_ratio = Decimal::new(110, 2); // 1.1
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMargin { .. })));

        // 0.25 maintenance at 5x (0.2 initial)
        let mut config = ClearingConfig::default();
        config.margin.maintenance_margin_ratio = Decimal::new(25, 2);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMargin { .. })));
    }

    #[test]
    fn test_invalid_fees() {
        let mut config = ClearingConfig::default();
        config.fees.maker_fee_bps = -10;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_fee_amounts() {
        let fees = FeeConfig::default();
        let notional = Quote::new(Decimal::new(10_000, 0));
        assert_eq!(fees.maker_fee(notional).value(), Decimal::new(2, 0));
        assert_eq!(fees.taker_fee(notional.negate()).value(), Decimal::new(5, 0));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Mainnet.config().validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ClearingConfig::testnet();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClearingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fees.taker_fee_bps, config.fees.taker_fee_bps);
        assert_eq!(back.margin.max_leverage, config.margin.max_leverage);
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            [engine]
            governance = "0x0000000000000000000000000000000000000060"

            [fees]
            maker_fee_bps = 1
            taker_fee_bps = 3
            fee_receiver = "0x00000000000000000000000000000000000000fe"
        "#;
        let config = ClearingConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.engine.governance, Address::from_low_u64(0x60));
        assert_eq!(config.fees.fee_receiver, Address::from_low_u64(0xfe));
        assert_eq!(config.fees.taker_fee_bps, 3);
        // untouched sections keep defaults
        assert_eq!(config.observation.epoch_capacity, 1_098);
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(matches!(
            ClearingConfig::from_toml_str("[fees]\ntaker_fee_bps = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
