// 8.0: clearing engine. the facade every operation goes through: matching signed orders,
// funding, margin checks, liquidations, price observations.
// deterministic with no I/O beyond the collateral vault seam. every operation plans on
// copies first and commits only when all checks passed.

mod config;
mod core;
mod orders;
mod positions;
mod pricing;
mod funding;
mod liquidations;
mod results;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{
    EngineError, ErrorKind, FundingSettlement, LiquidationResult, MatchResult, OrderCheck,
};
